use anyhow::Context;
use quotewatch_core::domain::{Trigger, User};
use std::path::Path;

/// Reads a JSON array of users and runs every entry through the domain constructors,
/// so a hand-edited file cannot bypass trigger validation.
pub fn load_users(path: &Path) -> anyhow::Result<Vec<User>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read users file {}", path.display()))?;
    parse_users(&text).with_context(|| format!("invalid users file {}", path.display()))
}

pub fn parse_users(text: &str) -> anyhow::Result<Vec<User>> {
    let raw: Vec<User> = serde_json::from_str(text).context("users file is not valid JSON")?;

    raw.into_iter()
        .map(|u| {
            let email = u.email.clone();
            let triggers = u
                .triggers
                .into_iter()
                .map(|t| Trigger::new(t.name, t.symbol, t.buy, t.sell))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("bad trigger for {email}"))?;
            User::new(u.email, u.name, triggers).with_context(|| format!("bad user {email}"))
        })
        .collect()
}
