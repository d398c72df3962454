pub mod quote;
pub mod recommendation;
pub mod symbol;
pub mod user;

pub use quote::{Quote, Stock};
pub use recommendation::{Action, Baseline, Recommendation};
pub use symbol::Symbol;
pub use user::{Trigger, User};
