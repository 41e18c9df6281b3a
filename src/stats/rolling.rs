//! Trailing moving averages.

use crate::data::{DataProcessor, ProcessorError};
use polars::prelude::*;
use thiserror::Error;

/// Default smoothing window, in days.
pub const DEFAULT_WINDOW: usize = 7;

#[derive(Error, Debug)]
pub enum RollingError {
    #[error("Rolling window must be at least one day")]
    ZeroWindow,
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

pub struct RollingSmoother;

impl RollingSmoother {
    /// Mean of the `window` values ending at each position.
    ///
    /// The first `window - 1` positions are undefined, as is any position
    /// whose window contains an undefined value. Never looks ahead.
    pub fn trailing_mean(
        values: &[Option<f64>],
        window: usize,
    ) -> Result<Vec<Option<f64>>, RollingError> {
        if window == 0 {
            return Err(RollingError::ZeroWindow);
        }

        Ok((0..values.len())
            .map(|i| {
                if i + 1 < window {
                    return None;
                }
                let sum: Option<f64> = values[i + 1 - window..=i].iter().copied().sum();
                sum.map(|s| s / window as f64)
            })
            .collect())
    }

    /// Append the trailing mean of `source` as `target`.
    ///
    /// The table must already be sorted ascending by date, as the
    /// aggregator returns it.
    pub fn with_rolling_mean(
        df: &DataFrame,
        source: &str,
        target: &str,
        window: usize,
    ) -> Result<DataFrame, RollingError> {
        let values = DataProcessor::values(df, source)?;
        let smoothed = Self::trailing_mean(&values, window)?;

        let mut out = df.clone();
        out.with_column(Column::new(target.into(), smoothed))?;
        Ok(out)
    }
}
