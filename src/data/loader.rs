//! CSV Data Loader Module
//! Reads delimited files with Polars and normalizes locale numerals, dates
//! and department codes before anything else touches the table.

use super::department::{DepartmentCode, DEPARTMENT_COL};
use super::processor::{date_column, DATE_COL};
use chrono::NaiveDate;
use polars::prelude::*;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Failed to load CSV: {0}")]
    CsvError(#[from] PolarsError),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Column {column}, row {row}: {value:?} is not a number")]
    Parse {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Column {column}, row {row}: {value:?} is not a date")]
    InvalidDate {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Missing column {0:?}")]
    MissingColumn(String),
    #[error("Column {column}, row {row}: {value:?} is not a department code")]
    InvalidDepartment {
        column: String,
        row: usize,
        value: String,
    },
}

/// Source column holding raw date strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSource {
    pub column: String,
    pub format: String,
}

impl DateSource {
    pub fn iso(column: &str) -> Self {
        Self {
            column: column.to_string(),
            format: "%Y-%m-%d".to_string(),
        }
    }
}

/// Describes how one file is read and cleaned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub separator: u8,
    /// Columns holding numerals with a comma decimal separator.
    pub decimal_columns: Vec<String>,
    /// Columns holding plain numerals.
    pub numeric_columns: Vec<String>,
    pub date: Option<DateSource>,
    /// Raw department column, rewritten to canonical codes under `dep`.
    pub department_column: Option<String>,
    pub drop_columns: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            separator: b',',
            decimal_columns: Vec::new(),
            numeric_columns: Vec::new(),
            date: None,
            department_column: None,
            drop_columns: Vec::new(),
        }
    }
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

impl LoadOptions {
    /// National daily tests file: `dep;jour;P;T;cl_age90;pop;Ti;Tp;Td`.
    pub fn national_tests() -> Self {
        Self {
            separator: b';',
            decimal_columns: owned(&["Ti", "Tp", "Td"]),
            numeric_columns: owned(&["P", "T", "pop"]),
            date: Some(DateSource::iso("jour")),
            department_column: None,
            drop_columns: owned(&["dep", "jour", "cl_age90"]),
        }
    }

    /// Department emergency visits file (one row per department, date and
    /// age group).
    pub fn emergency_visits() -> Self {
        Self {
            separator: b';',
            decimal_columns: Vec::new(),
            numeric_columns: owned(&[
                "nbre_pass_corona",
                "nbre_pass_tot",
                "nbre_hospit_corona",
                "nbre_pass_corona_h",
                "nbre_pass_corona_f",
                "nbre_hospit_corona_h",
                "nbre_hospit_corona_f",
            ]),
            date: Some(DateSource::iso("date_de_passage")),
            department_column: Some(DEPARTMENT_COL.to_string()),
            drop_columns: owned(&["date_de_passage"]),
        }
    }

    /// Department reference names.
    pub fn department_names(code_column: &str) -> Self {
        Self {
            department_column: Some(code_column.to_string()),
            ..Self::default()
        }
    }
}

/// Parse a numeral that may use a comma as decimal separator.
///
/// Empty or missing cells count as zero. Anything else that does not parse
/// to a finite number is rejected.
pub fn parse_locale_decimal(raw: Option<&str>) -> Option<f64> {
    let Some(raw) = raw.map(str::trim) else {
        return Some(0.0);
    };
    if raw.is_empty() {
        return Some(0.0);
    }
    raw.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_plain_number(raw: Option<&str>) -> Option<f64> {
    match raw.map(str::trim) {
        None | Some("") => Some(0.0),
        Some(s) => s.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Stateless CSV loader.
pub struct DataLoader;

impl DataLoader {
    /// Load and clean a CSV file.
    pub fn load_csv(path: &Path, options: &LoadOptions) -> Result<DataFrame, LoaderError> {
        let bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let df = Self::load_bytes(bytes, options)?;
        log::debug!("Loaded {} rows from {}", df.height(), path.display());
        Ok(df)
    }

    /// Load and clean CSV content already in memory.
    pub fn load_bytes(bytes: Vec<u8>, options: &LoadOptions) -> Result<DataFrame, LoaderError> {
        // Every column is read as text; numbers are parsed below with the
        // locale rules instead of the CSV reader's inference.
        let raw = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .map_parse_options(|opts| opts.with_separator(options.separator))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()?;

        Self::clean(raw, options)
    }

    /// Apply numeric, date and department normalization to a text table.
    pub fn clean(raw: DataFrame, options: &LoadOptions) -> Result<DataFrame, LoaderError> {
        let mut df = raw;

        for column in &options.decimal_columns {
            let parsed = Self::parse_column(&df, column, parse_locale_decimal)?;
            df.with_column(Column::new(column.as_str().into(), parsed))?;
        }
        for column in &options.numeric_columns {
            let parsed = Self::parse_column(&df, column, parse_plain_number)?;
            df.with_column(Column::new(column.as_str().into(), parsed))?;
        }

        if let Some(source) = &options.department_column {
            let codes = Self::department_codes(&df, source)?;
            df.with_column(Column::new(DEPARTMENT_COL.into(), codes))?;
        }

        if let Some(source) = &options.date {
            let dates = Self::parse_dates(&df, source)?;
            df.with_column(date_column(DATE_COL, &dates)?)?;
        }

        for column in &options.drop_columns {
            if column != DATE_COL && df.get_column_index(column).is_some() {
                df = df.drop(column)?;
            }
        }

        Ok(df)
    }

    fn text_cells(df: &DataFrame, column: &str) -> Result<Vec<Option<String>>, LoaderError> {
        if df.get_column_index(column).is_none() {
            return Err(LoaderError::MissingColumn(column.to_string()));
        }
        let text = df.column(column)?.cast(&DataType::String)?;
        let ca = text.as_materialized_series().str()?;
        Ok(ca.into_iter().map(|v| v.map(str::to_string)).collect())
    }

    fn parse_column(
        df: &DataFrame,
        column: &str,
        parse: fn(Option<&str>) -> Option<f64>,
    ) -> Result<Vec<f64>, LoaderError> {
        Self::text_cells(df, column)?
            .iter()
            .enumerate()
            .map(|(row, cell)| {
                parse(cell.as_deref()).ok_or_else(|| LoaderError::Parse {
                    column: column.to_string(),
                    row,
                    value: cell.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    fn parse_dates(df: &DataFrame, source: &DateSource) -> Result<Vec<NaiveDate>, LoaderError> {
        Self::text_cells(df, &source.column)?
            .iter()
            .enumerate()
            .map(|(row, cell)| {
                let raw = cell.as_deref().unwrap_or_default().trim();
                NaiveDate::parse_from_str(raw, &source.format).map_err(|_| {
                    LoaderError::InvalidDate {
                        column: source.column.clone(),
                        row,
                        value: raw.to_string(),
                    }
                })
            })
            .collect()
    }

    fn department_codes(df: &DataFrame, column: &str) -> Result<Vec<String>, LoaderError> {
        Self::text_cells(df, column)?
            .iter()
            .enumerate()
            .map(|(row, cell)| {
                let raw = cell.as_deref().unwrap_or_default();
                DepartmentCode::parse(raw)
                    .map(|code| code.to_string())
                    .map_err(|_| LoaderError::InvalidDepartment {
                        column: column.to_string(),
                        row,
                        value: raw.to_string(),
                    })
            })
            .collect()
    }
}
