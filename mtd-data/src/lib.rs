//! Data import and backend bootstrap for the `mtd` command-line tool.

pub mod loader;
pub mod registry;

pub use loader::{
    AdjustmentKind, AdjustmentRecord, ExpenseRecord, IncomeRecord, LoaderError, TransactionLoader,
};
pub use registry::build_registry;
