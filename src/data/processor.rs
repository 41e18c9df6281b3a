//! Data Processor Module
//! Handles date grouping, date windows and typed column extraction.

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Canonical date column produced by the loader.
pub const DATE_COL: &str = "date";

/// `NaiveDate::num_days_from_ce` of 1970-01-01, the polars date epoch.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("No measure columns to aggregate")]
    NoMeasures,
    #[error("Column {0} holds a missing or out-of-range date")]
    InvalidDate(String),
}

/// Per-column reduction applied when rows share a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
}

impl Reduction {
    fn expr(self, column: &str) -> Expr {
        match self {
            Reduction::Sum => col(column).sum(),
            Reduction::Mean => col(column).mean(),
        }
    }
}

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Whether `date` falls inside the window under the given bounds.
    pub fn contains(&self, date: NaiveDate, bounds: Bounds) -> bool {
        match bounds {
            Bounds::Inclusive => self.start <= date && date <= self.end,
            Bounds::Exclusive => self.start < date && date < self.end,
            Bounds::HalfOpen => self.start <= date && date < self.end,
        }
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// How the ends of a [`DateWindow`] are treated by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bounds {
    #[default]
    Inclusive,
    /// `start < date < end`
    Exclusive,
    /// `start <= date < end`
    HalfOpen,
}

/// Build a Date column from calendar dates.
pub fn date_column(name: &str, dates: &[NaiveDate]) -> PolarsResult<Column> {
    let days: Vec<i32> = dates
        .iter()
        .map(|d| d.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
        .collect();
    Column::new(name.into(), days).cast(&DataType::Date)
}

/// Handles grouping and typed access to loaded tables.
pub struct DataProcessor;

impl DataProcessor {
    /// Group rows by date and reduce each measure column.
    ///
    /// Output holds exactly one row per distinct date, ascending.
    pub fn aggregate_by_date(
        df: &DataFrame,
        reductions: &[(&str, Reduction)],
    ) -> Result<DataFrame, ProcessorError> {
        Self::aggregate(df, &[], reductions)
    }

    /// Group rows by date plus `extra_keys` and reduce each measure column.
    ///
    /// Sorted by date, then by the extra keys in order.
    pub fn aggregate(
        df: &DataFrame,
        extra_keys: &[&str],
        reductions: &[(&str, Reduction)],
    ) -> Result<DataFrame, ProcessorError> {
        if reductions.is_empty() {
            return Err(ProcessorError::NoMeasures);
        }

        let mut keys: Vec<&str> = vec![DATE_COL];
        keys.extend_from_slice(extra_keys);

        let group_exprs: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
        let aggs: Vec<Expr> = reductions
            .iter()
            .map(|(column, reduction)| reduction.expr(column))
            .collect();

        let grouped = df
            .clone()
            .lazy()
            .group_by(group_exprs)
            .agg(aggs)
            .sort(keys, SortMultipleOptions::default())
            .collect()?;

        log::debug!(
            "Aggregated {} rows into {} groups",
            df.height(),
            grouped.height()
        );
        Ok(grouped)
    }

    /// Keep rows whose date lies inside `window`.
    pub fn filter_dates(
        df: &DataFrame,
        window: &DateWindow,
        bounds: Bounds,
    ) -> Result<DataFrame, ProcessorError> {
        let mask: BooleanChunked = Self::dates(df, DATE_COL)?
            .into_iter()
            .map(|date| window.contains(date, bounds))
            .collect();
        Ok(df.filter(&mask)?)
    }

    /// Calendar dates of a Date column. Nulls are rejected.
    pub fn dates(df: &DataFrame, column: &str) -> Result<Vec<NaiveDate>, ProcessorError> {
        let days = df.column(column)?.cast(&DataType::Int32)?;
        days.as_materialized_series()
            .i32()?
            .into_iter()
            .map(|day| {
                day.and_then(|d| NaiveDate::from_num_days_from_ce_opt(d + EPOCH_DAYS_FROM_CE))
                    .ok_or_else(|| ProcessorError::InvalidDate(column.to_string()))
            })
            .collect()
    }

    /// Float values of a column; nulls and NaN both come back as `None`.
    pub fn values(df: &DataFrame, column: &str) -> Result<Vec<Option<f64>>, ProcessorError> {
        let value_f64 = df.column(column)?.cast(&DataType::Float64)?;
        let value_ca = value_f64.as_materialized_series().f64()?;
        Ok(value_ca
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()))
            .collect())
    }

    /// String values of a column.
    pub fn strings(df: &DataFrame, column: &str) -> Result<Vec<Option<String>>, ProcessorError> {
        let series = df.column(column)?.as_materialized_series();
        let ca = series.str()?;
        Ok(ca.into_iter().map(|v| v.map(str::to_string)).collect())
    }

    /// `(date, value)` pairs of one measure column.
    pub fn series(
        df: &DataFrame,
        column: &str,
    ) -> Result<Vec<(NaiveDate, Option<f64>)>, ProcessorError> {
        let dates = Self::dates(df, DATE_COL)?;
        let values = Self::values(df, column)?;
        Ok(dates.into_iter().zip(values).collect())
    }

    /// Append `factor * numerator / denominator`; a zero or missing
    /// denominator leaves the row undefined.
    pub fn with_ratio(
        df: &DataFrame,
        numerator: &str,
        denominator: &str,
        target: &str,
        factor: f64,
    ) -> Result<DataFrame, ProcessorError> {
        let num = Self::values(df, numerator)?;
        let den = Self::values(df, denominator)?;
        let ratio: Vec<Option<f64>> = num
            .iter()
            .zip(den.iter())
            .map(|(n, d)| match (n, d) {
                (Some(n), Some(d)) if *d != 0.0 => Some(factor * n / d),
                _ => None,
            })
            .collect();

        let mut out = df.clone();
        out.with_column(Column::new(target.into(), ratio))?;
        Ok(out)
    }

    /// Replace a float column with its values rounded to `decimals`.
    pub fn with_rounded(
        df: &DataFrame,
        column: &str,
        decimals: i32,
    ) -> Result<DataFrame, ProcessorError> {
        let factor = 10f64.powi(decimals);
        let rounded: Vec<Option<f64>> = Self::values(df, column)?
            .into_iter()
            .map(|v| v.map(|x| (x * factor).round() / factor))
            .collect();

        let mut out = df.clone();
        out.with_column(Column::new(column.into(), rounded))?;
        Ok(out)
    }
}
