//! Wave/Peak Finder

use crate::data::DateWindow;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeakError {
    #[error("No data between {} and {}", .0.start, .0.end)]
    EmptyWindow(DateWindow),
}

/// Maximum of a series inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub date: NaiveDate,
    pub value: f64,
}

pub struct PeakFinder;

impl PeakFinder {
    /// Date and value of the largest defined value with
    /// `window.start <= date <= window.end`.
    ///
    /// Equal maxima resolve to the earliest date.
    pub fn find(
        series: &[(NaiveDate, Option<f64>)],
        window: &DateWindow,
    ) -> Result<Peak, PeakError> {
        let mut candidates: Vec<Peak> = series
            .iter()
            .filter(|(date, _)| window.start <= *date && *date <= window.end)
            .filter_map(|(date, value)| {
                value
                    .filter(|v| !v.is_nan())
                    .map(|value| Peak { date: *date, value })
            })
            .collect();
        candidates.sort_by_key(|p| p.date);

        candidates
            .into_iter()
            .reduce(|best, p| if p.value > best.value { p } else { best })
            .ok_or(PeakError::EmptyWindow(*window))
    }
}
