//! Statistics Calculator Module
//! Headline figures and derived rate columns of the national view.

use crate::data::{DataProcessor, ProcessorError, DATE_COL};
use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use serde::Serialize;

/// Incidence is expressed per this many inhabitants.
pub const INCIDENCE_BASE: f64 = 100_000.0;

/// Headline figures of the latest week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklySummary {
    pub latest: NaiveDate,
    pub total_cases: f64,
    pub week_cases: f64,
    pub week_tests: f64,
    pub previous_week_cases: f64,
    /// Percentage of last week's tests that were positive.
    pub positivity: Option<f64>,
    /// Week-over-week change of cases, relative to the latest week.
    pub evolution: Option<f64>,
    pub latest_incidence: Option<f64>,
    pub latest_tests: Option<f64>,
    pub latest_positivity: Option<f64>,
}

impl WeeklySummary {
    /// Whether cases grew against the previous week.
    pub fn is_rising(&self) -> bool {
        self.evolution.is_some_and(|e| e > 0.0)
    }
}

/// Handles the national indicator calculations.
pub struct StatsCalculator;

impl StatsCalculator {
    /// Summarize a daily national series (`P`, `T`, `Ti`, `Tp`).
    ///
    /// Last week is `latest - 7 < date`; the week before is
    /// `latest - 14 < date < latest - 7`.
    pub fn weekly_summary(df: &DataFrame) -> Result<Option<WeeklySummary>, ProcessorError> {
        let dates = DataProcessor::dates(df, DATE_COL)?;
        let Some(latest) = dates.iter().max().copied() else {
            return Ok(None);
        };

        let cases = DataProcessor::values(df, "P")?;
        let tests = DataProcessor::values(df, "T")?;
        let week_start = latest - Duration::days(7);
        let previous_start = latest - Duration::days(14);

        let sum_where = |values: &[Option<f64>], keep: &dyn Fn(NaiveDate) -> bool| -> f64 {
            dates
                .iter()
                .zip(values)
                .filter(|(date, _)| keep(**date))
                .filter_map(|(_, v)| *v)
                .sum()
        };

        let total_cases = sum_where(&cases, &|_| true);
        let week_cases = sum_where(&cases, &|d| d > week_start);
        let week_tests = sum_where(&tests, &|d| d > week_start);
        let previous_week_cases = sum_where(&cases, &|d| d > previous_start && d < week_start);

        let latest_value = |column: &str| -> Result<Option<f64>, ProcessorError> {
            let values = DataProcessor::values(df, column)?;
            let position = dates.iter().position(|d| *d == latest);
            Ok(position.and_then(|i| values[i]))
        };

        Ok(Some(WeeklySummary {
            latest,
            total_cases,
            week_cases,
            week_tests,
            previous_week_cases,
            positivity: Self::percentage(week_cases, week_tests),
            evolution: Self::percentage(week_cases - previous_week_cases, week_cases),
            latest_incidence: latest_value("Ti")?,
            latest_tests: latest_value("T")?,
            latest_positivity: latest_value("Tp")?,
        }))
    }

    /// `100 * part / whole`, undefined when `whole` is zero.
    pub fn percentage(part: f64, whole: f64) -> Option<f64> {
        if whole == 0.0 {
            None
        } else {
            Some(part / whole * 100.0)
        }
    }

    /// Smoothed positivity `Tp7 = P7 / T7`, rounded to two decimals.
    pub fn with_positivity_rate(df: &DataFrame) -> Result<DataFrame, ProcessorError> {
        let out = DataProcessor::with_ratio(df, "P7", "T7", "Tp7", 1.0)?;
        DataProcessor::with_rounded(&out, "Tp7", 2)
    }

    /// Smoothed incidence `Ti7 = P7 / pop * 100000`.
    pub fn with_incidence_rate(df: &DataFrame) -> Result<DataFrame, ProcessorError> {
        DataProcessor::with_ratio(df, "P7", "pop", "Ti7", INCIDENCE_BASE)
    }
}
