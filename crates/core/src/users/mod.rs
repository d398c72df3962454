use crate::domain::User;
use tokio::sync::RwLock;

pub mod postgres;

/// Source of users and their triggers. Read-only from the recommendation side.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn all_users(&self) -> anyhow::Result<Vec<User>>;

    async fn user_by(&self, email: &str) -> anyhow::Result<Option<User>>;
}

/// Users kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<Vec<User>>,
}

impl MemoryUserDirectory {
    pub fn new(users: Vec<User>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    /// Adds or replaces the user with the same email.
    pub async fn upsert(&self, user: User) {
        let mut users = self.users.write().await;
        match users.iter_mut().find(|u| u.email == user.email) {
            Some(existing) => *existing = user,
            None => users.push(user),
        }
    }
}

#[async_trait::async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn all_users(&self) -> anyhow::Result<Vec<User>> {
        Ok(self.users.read().await.clone())
    }

    async fn user_by(&self, email: &str) -> anyhow::Result<Option<User>> {
        let email = email.trim();
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }
}
