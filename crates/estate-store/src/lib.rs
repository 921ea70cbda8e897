mod clock;
mod directory;
mod memory;

pub use clock::{FixedClock, SystemClock};
pub use directory::InMemoryDirectory;
pub use memory::InMemoryStore;
