//! Rolling train/validation folds
//!
//! Folds are generated from the latest validation date backwards. For each
//! validation date the training dates start at `validation - months_future` (so the
//! newest training label window ends exactly at the validation date) and step back by
//! the sampling frequency until they would pass the history cap or the absolute train
//! start. With multiple folds the validation date shifts back until a fold no longer
//! meets the minimum-history requirement.
//!
//! All month arithmetic is applied step by step to the running date, clamping to the
//! end of the month each time.

use crate::config::TemporalConfig;
use crate::error::{Error, Result};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One train/validation split
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fold {
    /// Training as-of dates, most recent first
    pub train_dates: Vec<NaiveDate>,

    pub validation_date: NaiveDate,
}

impl Fold {
    /// Training and validation dates together, ascending
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: BTreeSet<NaiveDate> = self.train_dates.iter().copied().collect();
        dates.insert(self.validation_date);
        dates.into_iter().collect()
    }
}

/// Compute folds, most recent validation date first.
///
/// Fails when the latest validation date precedes the absolute train start, or when
/// the anchor fold (the one on `latest_validation_date`) has no admissible train date.
pub fn compute_folds(temporal: &TemporalConfig, months_future: u32) -> Result<Vec<Fold>> {
    if temporal.latest_validation_date < temporal.absolute_train_start {
        return Err(Error::InvalidDateOrder {
            absolute_train_start: temporal.absolute_train_start,
            latest_validation_date: temporal.latest_validation_date,
        });
    }
    if temporal.train_sampling_freq_months == 0 {
        return Err(Error::Config(
            "train_sampling_freq_months must be positive".to_string(),
        ));
    }

    let mut validation_date = temporal.latest_validation_date;
    let anchor = fold_for(temporal, validation_date, months_future)
        .ok_or(Error::NoHistory(validation_date))?;
    let mut folds = vec![anchor];

    if temporal.multiple_folds {
        if temporal.fold_shift_months == 0 {
            return Err(Error::Config(
                "fold_shift_months must be positive when multiple_folds is set".to_string(),
            ));
        }
        let shift = Months::new(temporal.fold_shift_months);
        while let Some(next) = validation_date.checked_sub_months(shift) {
            validation_date = next;
            match fold_for(temporal, validation_date, months_future) {
                Some(fold) => folds.push(fold),
                None => break,
            }
        }
    }

    tracing::debug!(
        folds = folds.len(),
        latest_validation_date = %temporal.latest_validation_date,
        "Computed temporal folds"
    );
    Ok(folds)
}

fn fold_for(temporal: &TemporalConfig, validation_date: NaiveDate, months_future: u32) -> Option<Fold> {
    let train_end = validation_date.checked_sub_months(Months::new(months_future))?;
    let train_dates = dates_between(
        temporal.absolute_train_start,
        train_end,
        temporal.train_sampling_freq_months,
        temporal.min_train_history_months,
        temporal.max_train_history_months,
    )?;
    Some(Fold {
        train_dates,
        validation_date,
    })
}

/// Dates from `end` back to `max(start, end - max_months)` every `step_months`,
/// or `None` when fewer than `min_months` whole months separate `start` and `end`.
fn dates_between(
    start: NaiveDate,
    end: NaiveDate,
    step_months: u32,
    min_months: u32,
    max_months: u32,
) -> Option<Vec<NaiveDate>> {
    if whole_months_between(start, end) < i64::from(min_months) {
        return None;
    }

    let earliest = match end.checked_sub_months(Months::new(max_months)) {
        Some(capped) => capped.max(start),
        None => start,
    };

    let step = Months::new(step_months);
    let mut dates = Vec::new();
    let mut current = Some(end);
    while let Some(date) = current.filter(|d| *d >= earliest) {
        dates.push(date);
        current = date.checked_sub_months(step);
    }

    if dates.is_empty() {
        None
    } else {
        Some(dates)
    }
}

/// Signed count of whole calendar months from `start` to `end`
fn whole_months_between(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut months = (i64::from(end.year()) - i64::from(start.year())) * 12
        + i64::from(end.month())
        - i64::from(start.month());
    if end >= start && end.day() < start.day() {
        months -= 1;
    } else if end < start && end.day() > start.day() {
        months += 1;
    }
    months
}

/// Every as-of date any fold needs, ascending and unique
pub fn all_dates(folds: &[Fold]) -> Vec<NaiveDate> {
    let dates: BTreeSet<NaiveDate> = folds.iter().flat_map(|fold| fold.dates()).collect();
    dates.into_iter().collect()
}

/// `(all train dates, all validation dates)`, each ascending and unique
pub fn train_and_validation_dates(folds: &[Fold]) -> (Vec<NaiveDate>, Vec<NaiveDate>) {
    let train: BTreeSet<NaiveDate> = folds
        .iter()
        .flat_map(|fold| fold.train_dates.iter().copied())
        .collect();
    let validation: BTreeSet<NaiveDate> = folds.iter().map(|fold| fold.validation_date).collect();
    (train.into_iter().collect(), validation.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_whole_months_between() {
        assert_eq!(whole_months_between(date(2019, 1, 1), date(2019, 7, 1)), 6);
        assert_eq!(whole_months_between(date(2019, 1, 15), date(2019, 7, 1)), 5);
        assert_eq!(whole_months_between(date(2019, 7, 1), date(2019, 1, 1)), -6);
        assert_eq!(whole_months_between(date(2019, 1, 15), date(2019, 1, 10)), 0);
    }

    #[test]
    fn test_dates_between_respects_cap() {
        let dates = dates_between(date(2019, 1, 1), date(2019, 7, 1), 6, 0, 5).unwrap();
        assert_eq!(dates, vec![date(2019, 7, 1)]);

        let dates = dates_between(date(2019, 1, 1), date(2019, 7, 1), 6, 0, 60).unwrap();
        assert_eq!(dates, vec![date(2019, 7, 1), date(2019, 1, 1)]);
    }

    #[test]
    fn test_dates_between_min_history() {
        assert!(dates_between(date(2019, 1, 1), date(2019, 7, 1), 6, 7, 60).is_none());
        assert!(dates_between(date(2019, 7, 1), date(2019, 1, 1), 6, 0, 60).is_none());
    }

    #[test]
    fn test_fold_dates() {
        let fold = Fold {
            train_dates: vec![date(2019, 7, 1), date(2019, 1, 1)],
            validation_date: date(2020, 1, 1),
        };
        assert_eq!(
            fold.dates(),
            vec![date(2019, 1, 1), date(2019, 7, 1), date(2020, 1, 1)]
        );
    }
}
