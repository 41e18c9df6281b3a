//! Department Module
//! Canonical department codes, department filtering and the geography join.

use super::geo::GeoReference;
use super::processor::{
    Bounds, DataProcessor, DateWindow, ProcessorError, Reduction, DATE_COL,
};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical department column produced by the loader.
pub const DEPARTMENT_COL: &str = "dep";

/// Selector values that mean "the whole country".
const COUNTRY_ALIASES: [&str; 4] = ["all", "france", "fr", "*"];

#[derive(Error, Debug)]
pub enum DepartmentError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("Invalid department code: {0:?}")]
    InvalidCode(String),
    #[error("Unknown department: {0}")]
    UnknownDepartment(DepartmentCode),
}

/// A department code normalized once at the ingestion boundary.
///
/// Numeric codes ("01", "75", "971") compare as integers. Alphanumeric codes
/// such as the Corsican "2A" and "2B" are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DepartmentCode {
    Numeric(u16),
    Named(String),
}

impl DepartmentCode {
    /// Normalize a raw code as found in the source files.
    ///
    /// Float-formatted numbers ("75.0") are accepted since some exports
    /// write the column as floating point.
    pub fn parse(raw: &str) -> Result<Self, DepartmentError> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);

        if trimmed.is_empty() {
            return Err(DepartmentError::InvalidCode(raw.to_string()));
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse::<u16>()
                .map(DepartmentCode::Numeric)
                .map_err(|_| DepartmentError::InvalidCode(raw.to_string()));
        }

        if trimmed.len() <= 3 && trimmed.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Ok(DepartmentCode::Named(trimmed.to_ascii_uppercase()));
        }

        Err(DepartmentError::InvalidCode(raw.to_string()))
    }

    /// Integer value for numeric codes.
    pub fn as_number(&self) -> Option<u16> {
        match self {
            DepartmentCode::Numeric(n) => Some(*n),
            DepartmentCode::Named(_) => None,
        }
    }
}

impl fmt::Display for DepartmentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepartmentCode::Numeric(n) => write!(f, "{:02}", n),
            DepartmentCode::Named(code) => f.write_str(code),
        }
    }
}

impl FromStr for DepartmentCode {
    type Err = DepartmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DepartmentCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Either one department or the whole country.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartmentSelector {
    Country,
    Department(DepartmentCode),
}

impl FromStr for DepartmentSelector {
    type Err = DepartmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if COUNTRY_ALIASES.contains(&lowered.as_str()) {
            Ok(DepartmentSelector::Country)
        } else {
            DepartmentCode::parse(s).map(DepartmentSelector::Department)
        }
    }
}

impl fmt::Display for DepartmentSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepartmentSelector::Country => f.write_str("France"),
            DepartmentSelector::Department(code) => write!(f, "{}", code),
        }
    }
}

/// One department on one date of a choropleth animation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapCell {
    pub date: NaiveDate,
    pub code: DepartmentCode,
    pub name: Option<String>,
    pub centroid: Option<[f64; 2]>,
    pub cumulative: f64,
}

/// Department filtering, derived ratios, running totals and geo join.
pub struct DepartmentJoiner;

impl DepartmentJoiner {
    /// Distinct department codes present in a table.
    pub fn departments(df: &DataFrame) -> Result<Vec<DepartmentCode>, DepartmentError> {
        let mut codes: Vec<DepartmentCode> = DataProcessor::strings(df, DEPARTMENT_COL)?
            .into_iter()
            .flatten()
            .map(|raw| DepartmentCode::parse(&raw))
            .collect::<Result<_, _>>()?;
        codes.sort();
        codes.dedup();
        Ok(codes)
    }

    /// Keep the rows of one department, or all rows for the whole country.
    ///
    /// A department absent from the table, or from `geo` when given, is an
    /// error rather than an empty result.
    pub fn filter(
        df: &DataFrame,
        selector: &DepartmentSelector,
        geo: Option<&GeoReference>,
    ) -> Result<DataFrame, DepartmentError> {
        let code = match selector {
            DepartmentSelector::Country => return Ok(df.clone()),
            DepartmentSelector::Department(code) => code,
        };

        if let Some(geo) = geo {
            if !geo.contains(code) {
                return Err(DepartmentError::UnknownDepartment(code.clone()));
            }
        }

        let filtered = df
            .clone()
            .lazy()
            .filter(col(DEPARTMENT_COL).eq(lit(code.to_string())))
            .collect()?;

        if filtered.height() == 0 {
            return Err(DepartmentError::UnknownDepartment(code.clone()));
        }

        log::debug!("Department {} keeps {} rows", code, filtered.height());
        Ok(filtered)
    }

    /// Filter by selector and sum the given columns per date.
    pub fn daily_totals(
        df: &DataFrame,
        selector: &DepartmentSelector,
        sum_columns: &[&str],
        geo: Option<&GeoReference>,
    ) -> Result<DataFrame, DepartmentError> {
        let filtered = Self::filter(df, selector, geo)?;
        let reductions: Vec<(&str, Reduction)> =
            sum_columns.iter().map(|c| (*c, Reduction::Sum)).collect();
        Ok(DataProcessor::aggregate_by_date(&filtered, &reductions)?)
    }

    /// Daily visits for one selector with the `numerator / denominator` ratio.
    pub fn visit_ratio(
        df: &DataFrame,
        selector: &DepartmentSelector,
        numerator: &str,
        denominator: &str,
        target: &str,
        geo: Option<&GeoReference>,
    ) -> Result<DataFrame, DepartmentError> {
        let daily = Self::daily_totals(df, selector, &[numerator, denominator], geo)?;
        Ok(DataProcessor::with_ratio(
            &daily,
            numerator,
            denominator,
            target,
            1.0,
        )?)
    }

    /// Append a running total of `source`, ordered by date.
    ///
    /// The total starts from zero on every call. Undefined values add nothing.
    pub fn with_cumulative(
        df: &DataFrame,
        source: &str,
        target: &str,
    ) -> Result<DataFrame, DepartmentError> {
        let sorted = df.sort([DATE_COL], SortMultipleOptions::default())?;
        let values = DataProcessor::values(&sorted, source)?;
        let totals = running_total(&values);

        let mut out = sorted;
        out.with_column(Column::new(target.into(), totals))?;
        Ok(out)
    }

    /// Cumulative counts per department and date inside `window`, joined
    /// with names and centroids. Departments missing from `geo` keep their
    /// cells with no name or centroid. Sorted by date then code, so
    /// consecutive cells sharing a date form one animation frame.
    pub fn choropleth_frames(
        df: &DataFrame,
        column: &str,
        window: &DateWindow,
        geo: &GeoReference,
    ) -> Result<Vec<MapCell>, DepartmentError> {
        let in_window = DataProcessor::filter_dates(df, window, Bounds::Inclusive)?;
        let daily = DataProcessor::aggregate(
            &in_window,
            &[DEPARTMENT_COL],
            &[(column, Reduction::Sum)],
        )?;

        let dates = DataProcessor::dates(&daily, DATE_COL)?;
        let codes = DataProcessor::strings(&daily, DEPARTMENT_COL)?;
        let values = DataProcessor::values(&daily, column)?;

        let mut frame_dates: Vec<NaiveDate> = dates.clone();
        frame_dates.sort();
        frame_dates.dedup();

        let mut per_department: BTreeMap<DepartmentCode, BTreeMap<NaiveDate, f64>> =
            BTreeMap::new();
        for ((date, code), value) in dates.into_iter().zip(codes).zip(values) {
            let Some(code) = code else {
                continue;
            };
            *per_department
                .entry(DepartmentCode::parse(&code)?)
                .or_default()
                .entry(date)
                .or_insert(0.0) += value.unwrap_or(0.0);
        }

        // Every department gets a cell on every frame date; days without a
        // row carry the running total forward.
        let mut cells = Vec::new();
        for (code, daily) in per_department {
            let department = geo.get(&code);
            if department.is_none() {
                log::warn!("Department {} has no geography match", code);
            }

            let values: Vec<Option<f64>> = frame_dates
                .iter()
                .map(|date| daily.get(date).copied())
                .collect();
            for (date, cumulative) in frame_dates.iter().zip(running_total(&values)) {
                cells.push(MapCell {
                    date: *date,
                    code: code.clone(),
                    name: department.map(|d| d.name.clone()),
                    centroid: department.and_then(|d| d.centroid),
                    cumulative,
                });
            }
        }

        cells.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.code.cmp(&b.code)));
        Ok(cells)
    }
}

fn running_total(values: &[Option<f64>]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |total, value| {
            *total += value.unwrap_or(0.0);
            Some(*total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::processor::date_column;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 11, d).unwrap()
    }

    fn visits() -> DataFrame {
        let dates = [day(1), day(1), day(1), day(2), day(2), day(2)];
        DataFrame::new(vec![
            date_column(DATE_COL, &dates).unwrap(),
            Column::new(
                DEPARTMENT_COL.into(),
                vec!["75", "2A", "75", "75", "2A", "13"],
            ),
            Column::new(
                "nbre_pass_corona".into(),
                vec![10.0, 2.0, 5.0, 8.0, 1.0, 4.0],
            ),
            Column::new(
                "nbre_pass_tot".into(),
                vec![100.0, 20.0, 50.0, 80.0, 0.0, 40.0],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn corsican_codes_stay_named() {
        assert_eq!(
            DepartmentCode::parse("2A").unwrap(),
            DepartmentCode::Named("2A".to_string())
        );
        assert_eq!(
            DepartmentCode::parse("2b").unwrap(),
            DepartmentCode::Named("2B".to_string())
        );
        assert_eq!(DepartmentCode::parse("2A").unwrap().as_number(), None);
    }

    #[test]
    fn numeric_codes_compare_as_integers() {
        assert_eq!(DepartmentCode::parse("75").unwrap().as_number(), Some(75));
        assert_eq!(
            DepartmentCode::parse("01").unwrap(),
            DepartmentCode::parse("1").unwrap()
        );
        assert_eq!(
            DepartmentCode::parse("75.0").unwrap(),
            DepartmentCode::Numeric(75)
        );
        assert_eq!(DepartmentCode::Numeric(1).to_string(), "01");
        assert_eq!(DepartmentCode::Numeric(971).to_string(), "971");
    }

    #[test]
    fn rejects_garbage_codes() {
        assert!(DepartmentCode::parse("").is_err());
        assert!(DepartmentCode::parse("Paris").is_err());
    }

    #[test]
    fn parses_country_selector() {
        assert_eq!(
            "France".parse::<DepartmentSelector>().unwrap(),
            DepartmentSelector::Country
        );
        assert_eq!(
            "13".parse::<DepartmentSelector>().unwrap(),
            DepartmentSelector::Department(DepartmentCode::Numeric(13))
        );
    }

    #[test]
    fn unknown_department_is_an_error() {
        let selector = "999".parse::<DepartmentSelector>().unwrap();
        let err = DepartmentJoiner::filter(&visits(), &selector, None).unwrap_err();
        assert!(matches!(
            err,
            DepartmentError::UnknownDepartment(DepartmentCode::Numeric(999))
        ));
    }

    #[test]
    fn country_total_matches_sum_of_departments() {
        let df = visits();
        let column = "nbre_pass_corona";
        let country =
            DepartmentJoiner::daily_totals(&df, &DepartmentSelector::Country, &[column], None)
                .unwrap();
        let country_total: f64 = DataProcessor::values(&country, column)
            .unwrap()
            .into_iter()
            .flatten()
            .sum();

        let mut departments_total = 0.0;
        for code in DepartmentJoiner::departments(&df).unwrap() {
            let selector = DepartmentSelector::Department(code);
            let daily = DepartmentJoiner::daily_totals(&df, &selector, &[column], None).unwrap();
            departments_total += DataProcessor::values(&daily, column)
                .unwrap()
                .into_iter()
                .flatten()
                .sum::<f64>();
        }

        assert!((country_total - 30.0).abs() < 1e-9);
        assert!((country_total - departments_total).abs() < 1e-9);
    }

    #[test]
    fn ratio_is_undefined_without_visits() {
        let selector = "2A".parse::<DepartmentSelector>().unwrap();
        let daily = DepartmentJoiner::visit_ratio(
            &visits(),
            &selector,
            "nbre_pass_corona",
            "nbre_pass_tot",
            "ratio",
            None,
        )
        .unwrap();
        let ratio = DataProcessor::values(&daily, "ratio").unwrap();
        assert_eq!(ratio, vec![Some(0.1), None]);
    }

    #[test]
    fn cumulative_restarts_per_query() {
        let selector = "75".parse::<DepartmentSelector>().unwrap();
        let daily =
            DepartmentJoiner::daily_totals(&visits(), &selector, &["nbre_pass_corona"], None)
                .unwrap();
        for _ in 0..2 {
            let out =
                DepartmentJoiner::with_cumulative(&daily, "nbre_pass_corona", "cumulative")
                    .unwrap();
            let totals = DataProcessor::values(&out, "cumulative").unwrap();
            assert_eq!(totals, vec![Some(15.0), Some(23.0)]);
        }
    }

    fn paris_only() -> GeoReference {
        GeoReference::from_names([(DepartmentCode::Numeric(75), "Paris".to_string())])
    }

    #[test]
    fn department_missing_from_geography_is_unknown() {
        let selector = "13".parse::<DepartmentSelector>().unwrap();
        assert!(DepartmentJoiner::filter(&visits(), &selector, None).is_ok());

        let err = DepartmentJoiner::filter(&visits(), &selector, Some(&paris_only())).unwrap_err();
        assert!(matches!(
            err,
            DepartmentError::UnknownDepartment(DepartmentCode::Numeric(13))
        ));
    }

    #[test]
    fn choropleth_keeps_unmatched_departments() {
        let window = DateWindow::new(day(1), day(2));
        let cells =
            DepartmentJoiner::choropleth_frames(&visits(), "nbre_pass_corona", &window, &paris_only())
                .unwrap();

        let marseille: Vec<&MapCell> = cells
            .iter()
            .filter(|c| c.code == DepartmentCode::Numeric(13))
            .collect();
        assert_eq!(marseille.len(), 2);
        assert!(marseille.iter().all(|c| c.name.is_none() && c.centroid.is_none()));
        assert_eq!(marseille[1].cumulative, 4.0);

        let paris = cells
            .iter()
            .find(|c| c.code == DepartmentCode::Numeric(75) && c.date == day(2))
            .unwrap();
        assert_eq!(paris.name.as_deref(), Some("Paris"));
        assert_eq!(paris.cumulative, 23.0);
    }

    #[test]
    fn choropleth_fills_days_without_rows() {
        let window = DateWindow::new(day(1), day(2));
        let cells =
            DepartmentJoiner::choropleth_frames(&visits(), "nbre_pass_corona", &window, &paris_only())
                .unwrap();

        // Department 13 has no row on day 1: it starts the frame at zero.
        assert_eq!(cells.len(), 6);
        let first_frame: Vec<(String, f64)> = cells
            .iter()
            .filter(|c| c.date == day(1))
            .map(|c| (c.code.to_string(), c.cumulative))
            .collect();
        assert_eq!(
            first_frame,
            vec![
                ("13".to_string(), 0.0),
                ("75".to_string(), 15.0),
                ("2A".to_string(), 2.0),
            ]
        );
    }

    #[test]
    fn choropleth_carries_totals_over_gaps() {
        let dates = [day(1), day(2), day(3), day(3)];
        let df = DataFrame::new(vec![
            date_column(DATE_COL, &dates).unwrap(),
            Column::new(DEPARTMENT_COL.into(), vec!["75", "13", "75", "13"]),
            Column::new("n".into(), vec![5.0, 1.0, 2.0, 1.0]),
        ])
        .unwrap();
        let cells = DepartmentJoiner::choropleth_frames(
            &df,
            "n",
            &DateWindow::new(day(1), day(3)),
            &paris_only(),
        )
        .unwrap();

        let paris: Vec<f64> = cells
            .iter()
            .filter(|c| c.code == DepartmentCode::Numeric(75))
            .map(|c| c.cumulative)
            .collect();
        assert_eq!(paris, vec![5.0, 5.0, 7.0]);
    }
}
