//! Monthly owner settlements: what each owner collected, owes and nets for a
//! calendar month, frozen once validated.

mod draft;
mod engine;

pub use draft::DraftTotals;
pub use engine::{LiquidationEngine, LiquidationReview};
