//! SQLite storage for the MTD compliance engine.
//!
//! Money columns hold decimal TEXT. Period status changes are
//! compare-and-swap updates, and reopen/resubmit run inside one
//! transaction each.

mod decimal;
pub mod factory;
pub mod repository;

pub use factory::SqliteRepositoryFactory;
pub use repository::SqliteRepository;
