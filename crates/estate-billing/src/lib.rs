//! Money flowing through a lease: ad-hoc charges and the monthly rent schedule.

mod charges;
mod payments;

pub use charges::ChargeAllocator;
pub use payments::PaymentScheduler;
