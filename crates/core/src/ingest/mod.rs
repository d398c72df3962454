pub mod fixture;
pub mod provider;
pub mod sweep;
pub mod types;

pub use provider::QuoteProvider;
pub use sweep::{CancelFlag, QuoteSweep, SweepReport, SymbolOutcome};
