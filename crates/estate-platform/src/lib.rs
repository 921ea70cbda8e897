pub mod config;
pub mod db;
mod codec;
mod directory;
mod store;

pub use config::ServiceConfig;
pub use db::{connect_database, run_migrations};
pub use directory::PgDirectory;
pub use store::PgStore;
