mod business_profile;
mod eops_submission;
mod period_amendment;
mod tax_adjustment;
mod tax_period;
mod tax_year_rates;
mod transaction;
mod vat_submission;

pub use business_profile::BusinessProfile;
pub use eops_submission::{
    Declaration, EopsDeclarations, EopsStatus, EopsSubmission, UpsertEopsSubmission,
};
pub use period_amendment::{
    AmendmentFinalization, AmendmentType, NewPeriodAmendment, PeriodAmendment,
};
pub use tax_adjustment::{AdjustmentTotals, NewTaxAdjustment, TaxAdjustment};
pub use tax_period::{NewTaxPeriod, PeriodAction, PeriodStatus, TaxPeriod};
pub use tax_year_rates::TaxYearRates;
pub use transaction::{
    ExpenseTransaction, IncomeTransaction, NewExpenseTransaction, NewIncomeTransaction,
};
pub use vat_submission::{NewVatSubmission, VatSubmission};
