//! Calendar intervals
//!
//! Intervals are written the way analysts write them in configuration:
//! `"7 days"`, `"1 month"`, `"9999 months"`, `"5 years"`, or the short forms
//! `"7d"`, `"2w"`, `"1m"`, `"5y"`. Month and year arithmetic clamps to the end of
//! the month, so `2019-03-31 - 1 month` is `2019-02-28`.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar interval
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    /// Duration value
    pub value: u32,

    /// Duration unit
    pub unit: IntervalUnit,
}

/// Interval units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Days,
    Weeks,
    Months,
    Years,
}

impl IntervalUnit {
    fn letter(&self) -> char {
        match self {
            IntervalUnit::Days => 'd',
            IntervalUnit::Weeks => 'w',
            IntervalUnit::Months => 'm',
            IntervalUnit::Years => 'y',
        }
    }

    fn word(&self) -> &'static str {
        match self {
            IntervalUnit::Days => "days",
            IntervalUnit::Weeks => "weeks",
            IntervalUnit::Months => "months",
            IntervalUnit::Years => "years",
        }
    }
}

impl Interval {
    pub fn days(value: u32) -> Self {
        Self {
            value,
            unit: IntervalUnit::Days,
        }
    }

    pub fn months(value: u32) -> Self {
        Self {
            value,
            unit: IntervalUnit::Months,
        }
    }

    pub fn years(value: u32) -> Self {
        Self {
            value,
            unit: IntervalUnit::Years,
        }
    }

    /// `date - self`; `None` when the result falls outside the calendar range
    pub fn before(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.unit {
            IntervalUnit::Days => date.checked_sub_days(Days::new(self.value as u64)),
            IntervalUnit::Weeks => date.checked_sub_days(Days::new(self.value as u64 * 7)),
            IntervalUnit::Months => date.checked_sub_months(Months::new(self.value)),
            IntervalUnit::Years => self
                .value
                .checked_mul(12)
                .and_then(|m| date.checked_sub_months(Months::new(m))),
        }
    }

    /// `date + self`; `None` when the result falls outside the calendar range
    pub fn after(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.unit {
            IntervalUnit::Days => date.checked_add_days(Days::new(self.value as u64)),
            IntervalUnit::Weeks => date.checked_add_days(Days::new(self.value as u64 * 7)),
            IntervalUnit::Months => date.checked_add_months(Months::new(self.value)),
            IntervalUnit::Years => self
                .value
                .checked_mul(12)
                .and_then(|m| date.checked_add_months(Months::new(m))),
        }
    }

    /// Column-name suffix: the number followed by the unit letter (`"7d"`, `"9999m"`)
    pub fn short_name(&self) -> String {
        format!("{}{}", self.value, self.unit.letter())
    }

    fn parse_unit(unit: &str) -> Option<IntervalUnit> {
        match unit.trim().to_ascii_lowercase().as_str() {
            "d" | "day" | "days" => Some(IntervalUnit::Days),
            "w" | "week" | "weeks" => Some(IntervalUnit::Weeks),
            "m" | "mon" | "month" | "months" => Some(IntervalUnit::Months),
            "y" | "year" | "years" => Some(IntervalUnit::Years),
            _ => None,
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("interval '{}' has no unit", s))?;
        let (value_str, unit_str) = s.split_at(split);
        let value = value_str
            .parse::<u32>()
            .map_err(|_| format!("interval '{}' does not start with a number", s))?;
        let unit = Self::parse_unit(unit_str)
            .ok_or_else(|| format!("interval '{}' has an unknown unit", s))?;
        Ok(Interval { value, unit })
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.word())
    }
}
