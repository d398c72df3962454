use crate::domain::{Symbol, Trigger, User};
use crate::users::UserDirectory;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only view of every user's triggers, indexed by symbol.
#[derive(Clone)]
pub struct TriggerRegistry {
    users: Arc<dyn UserDirectory>,
}

impl TriggerRegistry {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    /// Loads all users once so a caller evaluates a consistent set of triggers.
    pub async fn snapshot(&self) -> anyhow::Result<TriggerSnapshot> {
        let users = self.users.all_users().await?;
        Ok(TriggerSnapshot::from_users(users))
    }

    pub async fn triggers_for(&self, symbol: &Symbol) -> anyhow::Result<Vec<(User, Trigger)>> {
        Ok(self.snapshot().await?.triggers_for(symbol).to_vec())
    }

    pub async fn tracked_symbols(&self) -> anyhow::Result<Vec<Symbol>> {
        Ok(self.snapshot().await?.symbols)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TriggerSnapshot {
    /// Symbols with at least one trigger, in first-seen order (user order, then trigger order).
    pub symbols: Vec<Symbol>,
    by_symbol: HashMap<Symbol, Vec<(User, Trigger)>>,
}

impl TriggerSnapshot {
    pub fn from_users(users: Vec<User>) -> Self {
        let mut symbols = Vec::new();
        let mut by_symbol: HashMap<Symbol, Vec<(User, Trigger)>> = HashMap::new();

        for user in users {
            for trigger in &user.triggers {
                let entry = by_symbol.entry(trigger.symbol.clone()).or_insert_with(|| {
                    symbols.push(trigger.symbol.clone());
                    Vec::new()
                });
                entry.push((user.clone(), trigger.clone()));
            }
        }

        Self { symbols, by_symbol }
    }

    pub fn triggers_for(&self, symbol: &Symbol) -> &[(User, Trigger)] {
        self.by_symbol.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::MemoryUserDirectory;

    fn symbol(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn registry() -> TriggerRegistry {
        let foo = User::new(
            "foo@bar",
            "FOO",
            vec![
                Trigger::new("DB X-TR.EO STOXX 50 ETF DR 1C", symbol("DXET.DE"), 100.0, 300.0).unwrap(),
                Trigger::new("ISHS-CO.MSCI EM.MAR.IMI UC.ETF", symbol("IS3N.DE"), 100.0, 300.0).unwrap(),
            ],
        )
        .unwrap();
        let bar = User::new(
            "bar@baz",
            "BAR",
            vec![Trigger::new("emerging", symbol("IS3N.DE"), 15.0, 25.0).unwrap()],
        )
        .unwrap();

        TriggerRegistry::new(Arc::new(MemoryUserDirectory::new(vec![foo, bar])))
    }

    #[tokio::test]
    async fn tracked_symbols_are_unique_in_first_seen_order() {
        let symbols = registry().tracked_symbols().await.unwrap();
        assert_eq!(symbols, vec![symbol("DXET.DE"), symbol("IS3N.DE")]);
    }

    #[tokio::test]
    async fn triggers_for_spans_users() {
        let reg = registry();
        let is3n = reg.triggers_for(&symbol("IS3N.DE")).await.unwrap();
        let owners: Vec<&str> = is3n.iter().map(|(u, _)| u.email.as_str()).collect();
        assert_eq!(owners, vec!["foo@bar", "bar@baz"]);

        assert!(reg.triggers_for(&symbol("NOPE.DE")).await.unwrap().is_empty());
    }
}
