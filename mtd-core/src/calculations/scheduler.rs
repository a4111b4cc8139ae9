//! Quarterly period boundaries and filing deadlines.
//!
//! A UK tax year runs from 6 April to 5 April and is identified by the year
//! it starts in. Making Tax Digital splits it into four quarterly update
//! periods under one of two alignments:
//!
//! | Quarter | `TaxYear` scheme       | `Calendar` scheme      |
//! |---------|------------------------|------------------------|
//! | Q1      | 6 Apr – 5 Jul          | 1 Apr – 30 Jun         |
//! | Q2      | 6 Jul – 5 Oct          | 1 Jul – 30 Sep         |
//! | Q3      | 6 Oct – 5 Jan (y+1)    | 1 Oct – 31 Dec         |
//! | Q4      | 6 Jan – 5 Apr (y+1)    | 1 Jan – 31 Mar (y+1)   |
//!
//! Each quarter's deadline is its end date plus one calendar month plus two
//! days. Month addition clamps to the last day of a shorter month.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use mtd_core::calculations::scheduler::{Quarter, QuarterScheme, period_key, quarter_dates};
//!
//! let q1 = quarter_dates(2024, Quarter::Q1, QuarterScheme::TaxYear).unwrap();
//!
//! assert_eq!(q1.start, NaiveDate::from_ymd_opt(2024, 4, 6).unwrap());
//! assert_eq!(q1.end, NaiveDate::from_ymd_opt(2024, 7, 5).unwrap());
//! assert_eq!(q1.deadline, NaiveDate::from_ymd_opt(2024, 8, 7).unwrap());
//! assert_eq!(period_key(2024, Quarter::Q1), "2024Q1");
//! ```

use std::fmt;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("quarter number must be between 1 and 4, got {0}")]
    InvalidQuarter(i64),

    #[error("tax year {0} is outside the supported date range")]
    OutOfRange(i32),
}

/// How quarter boundaries are aligned within the tax year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarterScheme {
    /// Quarters end on the 5th, following the statutory tax-year boundary.
    #[default]
    TaxYear,
    /// Quarters follow calendar months (the "calendar update periods" election).
    Calendar,
}

impl QuarterScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaxYear => "tax_year",
            Self::Calendar => "calendar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tax_year" => Some(Self::TaxYear),
            "calendar" => Some(Self::Calendar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub const ALL: [Quarter; 4] = [Quarter::Q1, Quarter::Q2, Quarter::Q3, Quarter::Q4];

    pub fn number(&self) -> u8 {
        match self {
            Self::Q1 => 1,
            Self::Q2 => 2,
            Self::Q3 => 3,
            Self::Q4 => 4,
        }
    }

    pub fn from_number(n: i64) -> Result<Self, SchedulerError> {
        match n {
            1 => Ok(Self::Q1),
            2 => Ok(Self::Q2),
            3 => Ok(Self::Q3),
            4 => Ok(Self::Q4),
            other => Err(SchedulerError::InvalidQuarter(other)),
        }
    }
}

impl fmt::Display for Quarter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Q{}", self.number())
    }
}

/// Inclusive date range of a quarter and the date its update is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterDates {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub deadline: NaiveDate,
}

/// External identifier for a quarter, e.g. `2024Q3`.
pub fn period_key(
    tax_year: i32,
    quarter: Quarter,
) -> String {
    format!("{}Q{}", tax_year, quarter.number())
}

/// Start date, end date and filing deadline for a quarter.
///
/// # Errors
///
/// Returns [`SchedulerError::OutOfRange`] only when the dates fall outside
/// the range `chrono` can represent.
pub fn quarter_dates(
    tax_year: i32,
    quarter: Quarter,
    scheme: QuarterScheme,
) -> Result<QuarterDates, SchedulerError> {
    let ymd = |year: i32, month: u32, day: u32| {
        NaiveDate::from_ymd_opt(year, month, day).ok_or(SchedulerError::OutOfRange(tax_year))
    };
    let next = tax_year
        .checked_add(1)
        .ok_or(SchedulerError::OutOfRange(tax_year))?;

    let (start, end) = match (scheme, quarter) {
        (QuarterScheme::TaxYear, Quarter::Q1) => (ymd(tax_year, 4, 6)?, ymd(tax_year, 7, 5)?),
        (QuarterScheme::TaxYear, Quarter::Q2) => (ymd(tax_year, 7, 6)?, ymd(tax_year, 10, 5)?),
        (QuarterScheme::TaxYear, Quarter::Q3) => (ymd(tax_year, 10, 6)?, ymd(next, 1, 5)?),
        (QuarterScheme::TaxYear, Quarter::Q4) => (ymd(next, 1, 6)?, ymd(next, 4, 5)?),
        (QuarterScheme::Calendar, Quarter::Q1) => (ymd(tax_year, 4, 1)?, ymd(tax_year, 6, 30)?),
        (QuarterScheme::Calendar, Quarter::Q2) => (ymd(tax_year, 7, 1)?, ymd(tax_year, 9, 30)?),
        (QuarterScheme::Calendar, Quarter::Q3) => {
            (ymd(tax_year, 10, 1)?, ymd(tax_year, 12, 31)?)
        }
        (QuarterScheme::Calendar, Quarter::Q4) => (ymd(next, 1, 1)?, ymd(next, 3, 31)?),
    };

    let deadline = filing_deadline(end).ok_or(SchedulerError::OutOfRange(tax_year))?;

    Ok(QuarterDates {
        start,
        end,
        deadline,
    })
}

/// End date plus one calendar month plus two days.
pub fn filing_deadline(end: NaiveDate) -> Option<NaiveDate> {
    end.checked_add_months(Months::new(1))?
        .checked_add_days(Days::new(2))
}

/// First and last day covered by the four quarters of a tax year.
pub fn tax_year_bounds(
    tax_year: i32,
    scheme: QuarterScheme,
) -> Result<(NaiveDate, NaiveDate), SchedulerError> {
    let first = quarter_dates(tax_year, Quarter::Q1, scheme)?;
    let last = quarter_dates(tax_year, Quarter::Q4, scheme)?;
    Ok((first.start, last.end))
}

/// The tax year and quarter a date is reported in.
pub fn quarter_for_date(
    date: NaiveDate,
    scheme: QuarterScheme,
) -> Result<(i32, Quarter), SchedulerError> {
    let year = date.year();
    let starts_this_year = match scheme {
        QuarterScheme::TaxYear => (date.month(), date.day()) >= (4, 6),
        QuarterScheme::Calendar => date.month() >= 4,
    };
    let tax_year = if starts_this_year { year } else { year - 1 };

    for quarter in Quarter::ALL {
        let dates = quarter_dates(tax_year, quarter, scheme)?;
        if date >= dates.start && date <= dates.end {
            return Ok((tax_year, quarter));
        }
    }
    Err(SchedulerError::OutOfRange(tax_year))
}
