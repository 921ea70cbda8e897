//! Who owns which fraction of a unit, and what discount a lease enjoys, on
//! any given day.

mod franchise;
mod shares;

pub use franchise::FranchiseEngine;
pub use shares::ShareLedger;
