//! Cross-Sectional Normalizer
//! Per-date category shares and the age-group breakdown built on them.

use super::rolling::{RollingError, RollingSmoother};
use crate::data::{DataProcessor, ProcessorError, Reduction, DATE_COL};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Age-group column of the emergency visits file.
pub const AGE_GROUP_COL: &str = "sursaud_cl_age_corona";

/// Code of the row that already totals every age group.
pub const ALL_AGES_CODE: &str = "0";

/// Scale of the age-group shares. The all-ages row sits in the denominator
/// next to the groups it totals, so the denominator is twice the total.
pub const AGE_GROUP_SCALE: f64 = 2.0 * 100.0;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Unknown category code: {0:?}")]
    UnknownCategory(String),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Rolling(#[from] RollingError),
}

/// Maps raw category codes to display labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryLabels {
    labels: BTreeMap<String, String>,
}

impl CategoryLabels {
    pub fn new<C, L>(pairs: impl IntoIterator<Item = (C, L)>) -> Self
    where
        C: Into<String>,
        L: Into<String>,
    {
        Self {
            labels: pairs
                .into_iter()
                .map(|(code, label)| (code.into(), label.into()))
                .collect(),
        }
    }

    /// Age classes of the emergency visits file. Labels carry a rank prefix
    /// so that sorting them gives the display order, oldest first.
    pub fn age_groups() -> Self {
        Self::new([
            (ALL_AGES_CODE, "7. All ages"),
            ("A", "5. Less than 15 years old"),
            ("B", "4. 15-44 years old"),
            ("C", "3. 45-64 years old"),
            ("D", "2. 65-74 years old"),
            ("E", "1. 75 years old and more"),
        ])
    }

    pub fn label(&self, code: &str) -> Result<&str, ShareError> {
        self.labels
            .get(code.trim())
            .map(String::as_str)
            .ok_or_else(|| ShareError::UnknownCategory(code.to_string()))
    }

    /// Labels sorted, skipping those listed in `exclude`.
    pub fn display_order(&self, exclude: &[&str]) -> Vec<String> {
        let mut order: Vec<String> = self
            .labels
            .iter()
            .filter(|(code, _)| !exclude.contains(&code.as_str()))
            .map(|(_, label)| label.clone())
            .collect();
        order.sort();
        order
    }
}

/// One (date, category) observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryPoint {
    pub date: NaiveDate,
    pub category: String,
    pub value: Option<f64>,
}

/// One cell of a category share table.
///
/// `share` is undefined when the date's denominator is zero or the value
/// itself is undefined. It is never reported as zero in that case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub date: NaiveDate,
    pub category: String,
    pub value: Option<f64>,
    pub share: Option<f64>,
}

pub struct ShareNormalizer;

impl ShareNormalizer {
    /// Read `(date, category, value)` rows, translating category codes.
    pub fn labelled_points(
        df: &DataFrame,
        category_col: &str,
        value_col: &str,
        labels: &CategoryLabels,
    ) -> Result<Vec<CategoryPoint>, ShareError> {
        let dates = DataProcessor::dates(df, DATE_COL)?;
        let codes = DataProcessor::strings(df, category_col)?;
        let values = DataProcessor::values(df, value_col)?;

        dates
            .into_iter()
            .zip(codes)
            .zip(values)
            .map(|((date, code), value)| {
                let code = code.unwrap_or_default();
                Ok(CategoryPoint {
                    date,
                    category: labels.label(&code)?.to_string(),
                    value,
                })
            })
            .collect()
    }

    /// Trailing mean within each category, sorted by date then category.
    pub fn smooth_by_category(
        points: &[CategoryPoint],
        window: usize,
    ) -> Result<Vec<CategoryPoint>, ShareError> {
        let mut by_category: BTreeMap<&str, Vec<&CategoryPoint>> = BTreeMap::new();
        for point in points {
            by_category.entry(&point.category).or_default().push(point);
        }

        let mut smoothed = Vec::with_capacity(points.len());
        for (category, mut series) in by_category {
            series.sort_by_key(|p| p.date);
            let values: Vec<Option<f64>> = series.iter().map(|p| p.value).collect();
            let means = RollingSmoother::trailing_mean(&values, window)?;
            smoothed.extend(series.iter().zip(means).map(|(p, value)| CategoryPoint {
                date: p.date,
                category: category.to_string(),
                value,
            }));
        }

        smoothed.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.category.cmp(&b.category)));
        Ok(smoothed)
    }

    /// `scale * value / sum(values of that date)` for every point.
    ///
    /// Undefined values are left out of the sum. A date whose sum is zero
    /// has undefined shares.
    pub fn normalize(points: &[CategoryPoint], scale: f64) -> Vec<CategoryShare> {
        let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for point in points {
            *totals.entry(point.date).or_insert(0.0) += point.value.unwrap_or(0.0);
        }

        points
            .iter()
            .map(|point| {
                let total = totals.get(&point.date).copied().unwrap_or(0.0);
                let share = match point.value {
                    Some(v) if total != 0.0 => Some(scale * v / total),
                    _ => None,
                };
                CategoryShare {
                    date: point.date,
                    category: point.category.clone(),
                    value: point.value,
                    share,
                }
            })
            .collect()
    }

    /// Age-group breakdown of a count column.
    ///
    /// Sums the column per date and age class, labels the classes, smooths
    /// each class over `window` days, then normalizes per date with the
    /// all-ages row still in the denominator. That row is dropped from the
    /// result.
    pub fn age_group_shares(
        df: &DataFrame,
        value_col: &str,
        labels: &CategoryLabels,
        window: usize,
        scale: f64,
    ) -> Result<Vec<CategoryShare>, ShareError> {
        let daily = DataProcessor::aggregate(df, &[AGE_GROUP_COL], &[(value_col, Reduction::Sum)])?;
        let points = Self::labelled_points(&daily, AGE_GROUP_COL, value_col, labels)?;
        let smoothed = Self::smooth_by_category(&points, window)?;
        let all_ages = labels.label(ALL_AGES_CODE).ok();

        Ok(Self::normalize(&smoothed, scale)
            .into_iter()
            .filter(|row| Some(row.category.as_str()) != all_ages)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::date_column;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 4, d).unwrap()
    }

    fn point(d: u32, category: &str, value: Option<f64>) -> CategoryPoint {
        CategoryPoint {
            date: day(d),
            category: category.to_string(),
            value,
        }
    }

    #[test]
    fn shares_sum_to_scale_per_date() {
        let points = vec![
            point(1, "a", Some(1.0)),
            point(1, "b", Some(3.0)),
            point(1, "c", Some(4.0)),
            point(2, "a", Some(7.5)),
            point(2, "b", Some(2.5)),
        ];
        let shares = ShareNormalizer::normalize(&points, 200.0);

        for d in [1, 2] {
            let sum: f64 = shares
                .iter()
                .filter(|s| s.date == day(d))
                .filter_map(|s| s.share)
                .sum();
            assert!((sum - 200.0).abs() < 1e-9);
        }
        assert_eq!(shares[0].share, Some(25.0));
    }

    #[test]
    fn zero_denominator_gives_undefined_share() {
        let points = vec![point(1, "a", Some(0.0)), point(1, "b", Some(0.0))];
        let shares = ShareNormalizer::normalize(&points, 100.0);
        assert!(shares.iter().all(|s| s.share.is_none()));
    }

    #[test]
    fn undefined_value_has_undefined_share() {
        let points = vec![point(1, "a", None), point(1, "b", Some(2.0))];
        let shares = ShareNormalizer::normalize(&points, 100.0);
        assert_eq!(shares[0].share, None);
        assert_eq!(shares[1].share, Some(100.0));
    }

    #[test]
    fn unknown_category_is_fatal() {
        let labels = CategoryLabels::age_groups();
        assert!(matches!(
            labels.label("Z"),
            Err(ShareError::UnknownCategory(code)) if code == "Z"
        ));
    }

    #[test]
    fn display_order_is_oldest_first() {
        let order = CategoryLabels::age_groups().display_order(&[ALL_AGES_CODE]);
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], "1. 75 years old and more");
        assert_eq!(order[4], "5. Less than 15 years old");
    }

    #[test]
    fn smooths_each_category_on_its_own() {
        let points = vec![
            point(1, "a", Some(1.0)),
            point(1, "b", Some(10.0)),
            point(2, "a", Some(3.0)),
            point(2, "b", Some(30.0)),
        ];
        let smoothed = ShareNormalizer::smooth_by_category(&points, 2).unwrap();
        assert_eq!(smoothed[0].value, None);
        assert_eq!(smoothed[1].value, None);
        assert_eq!(smoothed[2], point(2, "a", Some(2.0)));
        assert_eq!(smoothed[3], point(2, "b", Some(20.0)));
    }

    #[test]
    fn age_group_shares_drop_all_ages_and_total_one_hundred() {
        // Two departments per date; the all-ages row totals the classes.
        let mut dates = Vec::new();
        let mut codes = Vec::new();
        let mut counts = Vec::new();
        for d in 1..=3 {
            for (code, count) in [("A", 1.0), ("B", 2.0), ("C", 3.0), ("D", 4.0), ("E", 10.0)] {
                for _ in 0..2 {
                    dates.push(day(d));
                    codes.push(code);
                    counts.push(count);
                }
            }
            for _ in 0..2 {
                dates.push(day(d));
                codes.push(ALL_AGES_CODE);
                counts.push(20.0);
            }
        }
        let df = DataFrame::new(vec![
            date_column(DATE_COL, &dates).unwrap(),
            Column::new(AGE_GROUP_COL.into(), codes),
            Column::new("nbre_hospit_corona".into(), counts),
        ])
        .unwrap();

        let rows = ShareNormalizer::age_group_shares(
            &df,
            "nbre_hospit_corona",
            &CategoryLabels::age_groups(),
            2,
            AGE_GROUP_SCALE,
        )
        .unwrap();

        assert_eq!(rows.len(), 15);
        assert!(rows.iter().all(|r| r.category != "7. All ages"));
        assert!(rows.iter().filter(|r| r.date == day(1)).all(|r| r.share.is_none()));

        let day_two: Vec<&CategoryShare> = rows.iter().filter(|r| r.date == day(2)).collect();
        let total: f64 = day_two.iter().filter_map(|r| r.share).sum();
        assert!((total - 100.0).abs() < 1e-9);

        let oldest = day_two
            .iter()
            .find(|r| r.category == "1. 75 years old and more")
            .unwrap();
        assert_eq!(oldest.value, Some(20.0));
        assert!((oldest.share.unwrap() - 50.0).abs() < 1e-9);
    }
}
