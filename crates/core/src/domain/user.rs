use crate::domain::symbol::Symbol;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Buy/sell threshold pair a user keeps on one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub symbol: Symbol,
    pub buy: f64,
    pub sell: f64,
}

impl Trigger {
    pub fn new(
        name: impl Into<String>,
        symbol: Symbol,
        buy: f64,
        sell: f64,
    ) -> Result<Self, ValidationError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::Empty {
                field: "trigger.name",
            });
        }
        for (field, value) in [("trigger.buy", buy), ("trigger.sell", sell)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::NegativeOrNotFinite { field, value });
            }
        }
        if buy >= sell {
            return Err(ValidationError::Invalid {
                field: "trigger",
                reason: format!("buy ({buy}) must be below sell ({sell})"),
            });
        }

        Ok(Self {
            name,
            symbol,
            buy,
            sell,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
    pub triggers: Vec<Trigger>,
}

impl User {
    pub fn new(
        email: impl Into<String>,
        name: impl Into<String>,
        triggers: Vec<Trigger>,
    ) -> Result<Self, ValidationError> {
        let email = email.into().trim().to_string();
        if email.is_empty() {
            return Err(ValidationError::Empty { field: "email" });
        }
        if !email.contains('@') {
            return Err(ValidationError::Invalid {
                field: "email",
                reason: format!("missing '@': {email:?}"),
            });
        }

        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::Empty { field: "name" });
        }

        Ok(Self {
            email,
            name,
            triggers,
        })
    }
}
