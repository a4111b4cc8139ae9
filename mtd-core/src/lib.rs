pub mod calculations;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;

pub use db::repository::{MtdRepository, RepositoryError, StatusChange};
pub use error::MtdError;
pub use models::*;
