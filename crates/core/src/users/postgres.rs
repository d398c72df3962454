use crate::domain::{Symbol, Trigger, User};
use crate::users::UserDirectory;
use anyhow::Context;
use std::collections::HashMap;
use uuid::Uuid;

type TriggerRow = (String, String, String, f64, f64);

/// Users and triggers stored in the `users` / `triggers` tables.
#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: sqlx::PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a user together with its triggers, replacing any previous triggers for that email.
    pub async fn create_user(&self, user: &User) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        sqlx::query(
            "INSERT INTO users (email, name) VALUES ($1, $2) \
             ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(&user.email)
        .bind(&user.name)
        .execute(&mut *tx)
        .await
        .context("upsert users failed")?;

        sqlx::query("DELETE FROM triggers WHERE user_email = $1")
            .bind(&user.email)
            .execute(&mut *tx)
            .await
            .context("delete triggers failed")?;

        for (position, trigger) in user.triggers.iter().enumerate() {
            sqlx::query(
                "INSERT INTO triggers (id, user_email, position, name, symbol, buy, sell) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(position as i32)
            .bind(&trigger.name)
            .bind(trigger.symbol.as_str())
            .bind(trigger.buy)
            .bind(trigger.sell)
            .execute(&mut *tx)
            .await
            .context("insert triggers failed")?;
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }
}

fn row_to_trigger(row: TriggerRow) -> anyhow::Result<(String, Trigger)> {
    let (email, name, symbol, buy, sell) = row;
    let symbol = Symbol::parse(&symbol)
        .with_context(|| format!("invalid trigger symbol for user {email}"))?;
    let trigger = Trigger::new(name, symbol, buy, sell)
        .with_context(|| format!("invalid trigger row for user {email}"))?;
    Ok((email, trigger))
}

#[async_trait::async_trait]
impl UserDirectory for PgUserDirectory {
    async fn all_users(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, (String, String)>(
            "SELECT email, name FROM users ORDER BY created_at ASC, email ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("select users failed")?;

        let rows = sqlx::query_as::<_, TriggerRow>(
            "SELECT user_email, name, symbol, buy, sell FROM triggers \
             ORDER BY user_email ASC, position ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("select triggers failed")?;

        let mut by_email: HashMap<String, Vec<Trigger>> = HashMap::new();
        for row in rows {
            let (email, trigger) = row_to_trigger(row)?;
            by_email.entry(email).or_default().push(trigger);
        }

        users
            .into_iter()
            .map(|(email, name)| {
                let triggers = by_email.remove(&email).unwrap_or_default();
                User::new(email, name, triggers).context("invalid users row")
            })
            .collect()
    }

    async fn user_by(&self, email: &str) -> anyhow::Result<Option<User>> {
        let email = email.trim();
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT email, name FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("select user failed")?;

        let Some((email, name)) = row else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, TriggerRow>(
            "SELECT user_email, name, symbol, buy, sell FROM triggers \
             WHERE user_email = $1 ORDER BY position ASC",
        )
        .bind(&email)
        .fetch_all(&self.pool)
        .await
        .context("select triggers failed")?;

        let triggers = rows
            .into_iter()
            .map(|row| row_to_trigger(row).map(|(_, t)| t))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Some(User::new(email, name, triggers).context("invalid users row")?))
    }
}
