//! VAT return box derivation and filing readiness.
//!
//! Every transaction amount is VAT-inclusive, so the VAT element of a gross
//! amount at rate `r`% is `amount × r / (100 + r)` and its net value is
//! `amount / (1 + r/100)`.
//!
//! | Box | Meaning                                   | Derivation                  |
//! |-----|-------------------------------------------|-----------------------------|
//! | 1   | VAT due on sales                          | Σ income VAT element        |
//! | 2   | VAT due on EU acquisitions                | 0 (not modelled)            |
//! | 3   | Total VAT due                             | Box 1 + Box 2               |
//! | 4   | VAT reclaimed on purchases                | Σ expense VAT element       |
//! | 5   | Net VAT payable (negative means a refund) | Box 3 − Box 4               |
//! | 6   | Total sales excluding VAT                 | Σ income net value          |
//! | 7   | Total purchases excluding VAT             | Σ expense net value         |
//! | 8   | Supplies of goods to the EU               | 0 (not modelled)            |
//! | 9   | Acquisitions of goods from the EU         | 0 (not modelled)            |
//!
//! Boxes 1, 4, 6 and 7 are summed at full precision and then rounded to the
//! penny (half away from zero). Boxes 3 and 5 are derived from the rounded
//! values so that `box5 == box3 - box4` always holds exactly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::calculations::common::round_half_up;
use crate::models::{BusinessProfile, ExpenseTransaction, IncomeTransaction};

/// Anything carrying a VAT-inclusive amount and a percentage VAT rate.
pub trait VatRated {
    fn gross_amount(&self) -> Decimal;
    fn vat_rate(&self) -> Decimal;
}

impl VatRated for IncomeTransaction {
    fn gross_amount(&self) -> Decimal {
        self.amount
    }
    fn vat_rate(&self) -> Decimal {
        self.vat_rate
    }
}

impl VatRated for ExpenseTransaction {
    fn gross_amount(&self) -> Decimal {
        self.amount
    }
    fn vat_rate(&self) -> Decimal {
        self.vat_rate
    }
}

/// The nine boxes of a UK VAT return, each to two decimal places.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VatBoxes {
    pub box1: Decimal,
    pub box2: Decimal,
    pub box3: Decimal,
    pub box4: Decimal,
    pub box5: Decimal,
    pub box6: Decimal,
    pub box7: Decimal,
    pub box8: Decimal,
    pub box9: Decimal,
}

impl VatBoxes {
    /// Whether box 5 represents money owed back to the business.
    pub fn is_refund(&self) -> bool {
        self.box5 < Decimal::ZERO
    }
}

/// VAT element and net value of one VAT-inclusive amount.
///
/// A rate at or below −100% would divide by zero or flip the sign, and an
/// amount too large for the arithmetic would overflow; either way the whole
/// amount is treated as net with no VAT.
fn split_gross(item: &impl VatRated) -> (Decimal, Decimal) {
    let amount = item.gross_amount();
    let rate = item.vat_rate();

    let split = Decimal::ONE_HUNDRED
        .checked_add(rate)
        .filter(|divisor| *divisor > Decimal::ZERO)
        .and_then(|divisor| {
            let vat = amount.checked_mul(rate)?.checked_div(divisor)?;
            let net = amount
                .checked_mul(Decimal::ONE_HUNDRED)?
                .checked_div(divisor)?;
            Some((vat, net))
        });

    split.unwrap_or_else(|| {
        warn!(
            amount = %amount,
            vat_rate = %rate,
            "VAT rate cannot be applied; treating amount as net"
        );
        (Decimal::ZERO, amount)
    })
}

/// Sums saturate at the `Decimal` bounds.
fn sum_split<T: VatRated>(items: &[T]) -> (Decimal, Decimal) {
    items
        .iter()
        .map(split_gross)
        .fold((Decimal::ZERO, Decimal::ZERO), |(vat, net), (v, n)| {
            (vat.saturating_add(v), net.saturating_add(n))
        })
}

/// Derives the nine VAT boxes from a period's income and expenses.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
/// use mtd_core::IncomeTransaction;
/// use mtd_core::calculations::vat::calculate_vat_boxes;
///
/// let sale = IncomeTransaction {
///     id: 1,
///     owner_id: "owner".to_string(),
///     transaction_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
///     amount: dec!(120),
///     vat_rate: dec!(20),
///     description: None,
/// };
///
/// let boxes = calculate_vat_boxes::<_, mtd_core::ExpenseTransaction>(&[sale], &[]);
///
/// assert_eq!(boxes.box1, dec!(20.00));
/// assert_eq!(boxes.box6, dec!(100.00));
/// ```
pub fn calculate_vat_boxes<I: VatRated, E: VatRated>(
    income: &[I],
    expenses: &[E],
) -> VatBoxes {
    let (sales_vat, sales_net) = sum_split(income);
    let (purchase_vat, purchase_net) = sum_split(expenses);

    let box1 = round_half_up(sales_vat);
    let box2 = Decimal::ZERO;
    let box3 = box1.saturating_add(box2);
    let box4 = round_half_up(purchase_vat);
    let box5 = box3.saturating_sub(box4);

    VatBoxes {
        box1,
        box2,
        box3,
        box4,
        box5,
        box6: round_half_up(sales_net),
        box7: round_half_up(purchase_net),
        box8: Decimal::ZERO,
        box9: Decimal::ZERO,
    }
}

/// Onboarding step still outstanding before a VAT return can be filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupTask {
    MissingBusinessName,
    MissingVatNumber,
    HmrcNotConnected,
    NoIncomeRecorded,
}

impl SetupTask {
    pub fn description(&self) -> &'static str {
        match self {
            Self::MissingBusinessName => "Add your business name",
            Self::MissingVatNumber => "Add your VAT registration number",
            Self::HmrcNotConnected => "Connect your HMRC account",
            Self::NoIncomeRecorded => "Record at least one income transaction",
        }
    }
}

/// Advisory completeness score; never blocks a calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatReadiness {
    /// 0–100, 25 points per completed task.
    pub score: u8,
    pub outstanding: Vec<SetupTask>,
}

impl VatReadiness {
    pub fn is_ready(&self) -> bool {
        self.outstanding.is_empty()
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|s| s.trim().is_empty())
}

pub fn assess_readiness(
    profile: &BusinessProfile,
    income_count: usize,
) -> VatReadiness {
    let checks = [
        (
            !is_blank(&profile.business_name),
            SetupTask::MissingBusinessName,
        ),
        (!is_blank(&profile.vat_number), SetupTask::MissingVatNumber),
        (profile.hmrc_connected, SetupTask::HmrcNotConnected),
        (income_count > 0, SetupTask::NoIncomeRecorded),
    ];

    let outstanding: Vec<SetupTask> = checks
        .iter()
        .filter_map(|(done, task)| (!done).then_some(*task))
        .collect();
    let completed = checks.len() - outstanding.len();
    let score = u8::try_from(completed * 100 / checks.len()).unwrap_or(100);

    VatReadiness { score, outstanding }
}
