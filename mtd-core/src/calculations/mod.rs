//! Pure calculators for quarterly reporting.
//!
//! Nothing in this module touches storage. Every function is total over its
//! inputs: out-of-domain values such as a negative profit degrade to zero
//! rather than erroring.

pub mod common;
pub mod income_tax;
pub mod nic;
pub mod scheduler;
pub mod vat;
pub mod year_end;

pub use income_tax::{
    BandBreakdown, IncomeTaxResult, RatesError, TaxCalculator, calculate_income_tax,
};
pub use nic::{Nic4Result, calculate_nic4};
pub use scheduler::{Quarter, QuarterDates, QuarterScheme, SchedulerError};
pub use vat::{SetupTask, VatBoxes, VatRated, VatReadiness, assess_readiness, calculate_vat_boxes};
pub use year_end::{YearEndStatement, build_year_end_statement};
