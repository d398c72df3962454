use crate::domain::quote::Quote;
use crate::domain::symbol::Symbol;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Rejected input while building a domain value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be non-empty")]
    Empty { field: &'static str },

    #[error("{field} must be a finite, non-negative number (got {value})")]
    NegativeOrNotFinite { field: &'static str, value: f64 },

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A quote arrived for a (symbol, date) that is already stored with different values.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("conflicting quote for {symbol} on {date}: stored close {}, incoming close {}", .stored.close, .incoming.close)]
pub struct ConflictError {
    pub symbol: Symbol,
    pub date: NaiveDate,
    pub stored: Quote,
    pub incoming: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown symbol: {0}")]
pub struct UnknownSymbolError(pub Symbol);

/// Failure reported by a quote provider for a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("quote provider {provider} unavailable for {symbol}: {detail}")]
    Unavailable {
        provider: &'static str,
        symbol: Symbol,
        detail: String,
    },

    #[error("quote provider {provider} returned an invalid response for {symbol}: {detail}")]
    InvalidResponse {
        provider: &'static str,
        symbol: Symbol,
        detail: String,
    },
}

impl ProviderError {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Unavailable { symbol, .. } | Self::InvalidResponse { symbol, .. } => symbol,
        }
    }
}
