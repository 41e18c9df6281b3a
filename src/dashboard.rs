//! Dashboard Views
//! One entry point per chart. Every call reads its files again and runs the
//! pipeline from scratch; nothing is cached between views.

use crate::charts::{ChartPlotter, Figure, Rgb};
use crate::config::{ConfigError, DashboardConfig, Wave};
use crate::data::{
    Bounds, DataLoader, DataProcessor, DateWindow, DepartmentError, DepartmentJoiner,
    DepartmentSelector, FeatureKeys, GeoError, GeoReference, LoadOptions, LoaderError,
    ProcessorError, Reduction, DATE_COL,
};
use crate::stats::{
    CategoryLabels, CategoryShare, Peak, PeakError, PeakFinder, RollingError, RollingSmoother,
    ShareError, ShareNormalizer, StatsCalculator, WeeklySummary, AGE_GROUP_COL, ALL_AGES_CODE,
};
use chrono::{Months, NaiveDate};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;

/// Hospitalization count column of the emergency visits file.
pub const HOSPITALIZATIONS_COL: &str = "nbre_hospit_corona";
pub const CONDITION_VISITS_COL: &str = "nbre_pass_corona";
pub const TOTAL_VISITS_COL: &str = "nbre_pass_tot";

const VISIT_SHARE_COL: &str = "visit_share";
const CUMULATIVE_COL: &str = "cumulative_hospit";

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Rolling(#[from] RollingError),
    #[error(transparent)]
    Share(#[from] ShareError),
    #[error(transparent)]
    Department(#[from] DepartmentError),
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error(transparent)]
    Peak(#[from] PeakError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("No rows to build {0}")]
    NoData(&'static str),
}

/// User supplied bounds; a missing side falls back to the view's default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Period {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Period {
    pub fn resolve(&self, default: DateWindow) -> DateWindow {
        DateWindow::new(
            self.from.unwrap_or(default.start),
            self.to.unwrap_or(default.end),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NationalView {
    pub summary: Option<WeeklySummary>,
    /// Green while weekly cases grow, red otherwise.
    pub evolution_color: Option<Rgb>,
    pub zoom: DateWindow,
    pub figures: Vec<Figure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgeGroupView {
    pub selection: DateWindow,
    pub rows: Vec<CategoryShare>,
    pub evolution: Figure,
    pub share: Figure,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepartmentView {
    pub department: String,
    pub share: Figure,
    pub cumulative: Figure,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub wave: Wave,
    pub figure: Figure,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeakView {
    pub department: String,
    pub wave: Wave,
    pub peak: Peak,
    pub figure: Figure,
}

/// Date span of a table, if it has rows.
fn span(df: &DataFrame) -> Result<Option<DateWindow>, ProcessorError> {
    let dates = DataProcessor::dates(df, DATE_COL)?;
    let first = dates.iter().min().copied();
    let last = dates.iter().max().copied();
    Ok(first.zip(last).map(|(start, end)| DateWindow::new(start, end)))
}

/// Rows of the all-ages class only, so that department sums do not count
/// each visit twice. Tables without an age column are returned as is.
pub fn all_ages_only(df: &DataFrame) -> Result<DataFrame, PolarsError> {
    if df.get_column_index(AGE_GROUP_COL).is_none() {
        return Ok(df.clone());
    }
    df.clone()
        .lazy()
        .filter(col(AGE_GROUP_COL).eq(lit(ALL_AGES_CODE)))
        .collect()
}

/// National daily series with smoothed counts and rates.
pub fn national_series_from(raw: &DataFrame, window: usize) -> Result<DataFrame, DashboardError> {
    let daily = DataProcessor::aggregate_by_date(
        raw,
        &[
            ("P", Reduction::Sum),
            ("T", Reduction::Sum),
            ("pop", Reduction::Sum),
            ("Ti", Reduction::Mean),
            ("Tp", Reduction::Mean),
            ("Td", Reduction::Mean),
        ],
    )?;
    let smoothed = RollingSmoother::with_rolling_mean(&daily, "P", "P7", window)?;
    let smoothed = RollingSmoother::with_rolling_mean(&smoothed, "T", "T7", window)?;
    let rated = StatsCalculator::with_positivity_rate(&smoothed)?;
    Ok(StatsCalculator::with_incidence_rate(&rated)?)
}

/// Headline figures and the national charts of a prepared series.
pub fn national_view_from(
    series: &DataFrame,
    period: Period,
    zoom_months: u32,
) -> Result<NationalView, DashboardError> {
    let full = span(series)?.ok_or(DashboardError::NoData("the national view"))?;
    let default_start = full
        .end
        .checked_sub_months(Months::new(zoom_months))
        .unwrap_or(full.start)
        .max(full.start);
    let zoom = period.resolve(DateWindow::new(default_start, full.end));

    let figures = vec![
        ChartPlotter::positive_cases(series, &zoom)?,
        ChartPlotter::positive_cases_with_zoom(series, &zoom)?,
        ChartPlotter::tests_trend(series)?,
        ChartPlotter::positive_rate(series)?,
        ChartPlotter::incidence_rate(series)?,
    ];

    let summary = StatsCalculator::weekly_summary(series)?;
    Ok(NationalView {
        evolution_color: summary.as_ref().map(ChartPlotter::evolution_color),
        summary,
        zoom,
        figures,
    })
}

/// Age-group breakdown of hospitalizations across the whole country.
pub fn age_group_view_from(
    visits: &DataFrame,
    period: Period,
    window: usize,
    scale: f64,
) -> Result<AgeGroupView, DashboardError> {
    let labels = CategoryLabels::age_groups();
    let rows =
        ShareNormalizer::age_group_shares(visits, HOSPITALIZATIONS_COL, &labels, window, scale)?;

    let first = rows.iter().map(|r| r.date).min();
    let last = rows.iter().map(|r| r.date).max();
    let full = first
        .zip(last)
        .map(|(start, end)| DateWindow::new(start, end))
        .ok_or(DashboardError::NoData("the age-group view"))?;
    let selection = period.resolve(full);

    let order = labels.display_order(&[ALL_AGES_CODE]);
    Ok(AgeGroupView {
        selection,
        evolution: ChartPlotter::age_group_evolution(&rows, &order, &selection),
        share: ChartPlotter::age_group_share(&rows, &order, &selection),
        rows,
    })
}

/// Share of emergency visits for the condition and cumulative
/// hospitalizations of one department or the whole country.
pub fn department_view_from(
    visits: &DataFrame,
    selector: &DepartmentSelector,
    geo: Option<&GeoReference>,
    period: Period,
) -> Result<DepartmentView, DashboardError> {
    let visits = all_ages_only(visits)?;
    let daily = DepartmentJoiner::daily_totals(
        &visits,
        selector,
        &[CONDITION_VISITS_COL, TOTAL_VISITS_COL, HOSPITALIZATIONS_COL],
        geo,
    )?;
    let full = span(&daily)?.ok_or(DashboardError::NoData("the department view"))?;
    let daily = DataProcessor::filter_dates(&daily, &period.resolve(full), Bounds::Inclusive)?;

    let ratio = DataProcessor::with_ratio(
        &daily,
        CONDITION_VISITS_COL,
        TOTAL_VISITS_COL,
        VISIT_SHARE_COL,
        1.0,
    )?;
    let table = DepartmentJoiner::with_cumulative(&ratio, HOSPITALIZATIONS_COL, CUMULATIVE_COL)?;

    let name = match selector {
        DepartmentSelector::Country => selector.to_string(),
        DepartmentSelector::Department(code) => geo
            .and_then(|g| g.get(code))
            .map(|d| format!("{} {}", code, d.name))
            .unwrap_or_else(|| code.to_string()),
    };
    let share = ChartPlotter::visit_share(
        &table,
        &format!("Emergency visits: {}", name),
        VISIT_SHARE_COL,
    )?;
    let cumulative = ChartPlotter::cumulative_count(
        &table,
        &format!("Cumulative hospitalizations: {}", name),
        CUMULATIVE_COL,
    )?;

    Ok(DepartmentView {
        department: name,
        share,
        cumulative,
    })
}

/// Cumulative hospitalizations per department over a wave, as frames.
pub fn map_view_from(
    visits: &DataFrame,
    wave: &Wave,
    geo: &GeoReference,
) -> Result<MapView, DashboardError> {
    if geo.is_empty() {
        log::warn!("No department reference, map cells will have no position");
    }
    let visits = all_ages_only(visits)?;
    let cells =
        DepartmentJoiner::choropleth_frames(&visits, HOSPITALIZATIONS_COL, &wave.window(), geo)?;
    if cells.is_empty() {
        return Err(DashboardError::NoData("the map view"));
    }

    let title = format!("Cumulative hospitalizations, {}", wave.name);
    Ok(MapView {
        wave: wave.clone(),
        figure: ChartPlotter::choropleth(&title, cells),
    })
}

/// Peak of the smoothed `column` inside a wave.
pub fn peak_view_from(
    visits: &DataFrame,
    selector: &DepartmentSelector,
    wave: &Wave,
    column: &str,
    window: usize,
    geo: Option<&GeoReference>,
) -> Result<PeakView, DashboardError> {
    let visits = all_ages_only(visits)?;
    let daily = DepartmentJoiner::daily_totals(&visits, selector, &[column], geo)?;
    let smoothed_col = format!("{}_avg", column);
    let smoothed = RollingSmoother::with_rolling_mean(&daily, column, &smoothed_col, window)?;

    let series = DataProcessor::series(&smoothed, &smoothed_col)?;
    let peak = PeakFinder::find(&series, &wave.window())?;
    log::info!(
        "{} peaks at {:.1} on {} during {}",
        selector,
        peak.value,
        peak.date,
        wave.name
    );

    let mut figure = ChartPlotter::series_line(
        &smoothed,
        &smoothed_col,
        &format!("{} peak: {}", wave.name, selector),
    )?;
    ChartPlotter::mark_peak(&mut figure, &peak, &wave.window());

    Ok(PeakView {
        department: selector.to_string(),
        wave: wave.clone(),
        peak,
        figure,
    })
}

/// Runs views against the files named in a config.
pub struct Dashboard {
    pub config: DashboardConfig,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Self {
        Self { config }
    }

    fn visits(&self) -> Result<DataFrame, DashboardError> {
        Ok(DataLoader::load_csv(
            &self.config.data.emergency_visits,
            &LoadOptions::emergency_visits(),
        )?)
    }

    /// Department names, merged over the boundary file when asked.
    pub fn reference(&self, with_boundaries: bool) -> Result<GeoReference, DashboardError> {
        let paths = &self.config.data;
        let names = GeoReference::load_names(
            &paths.department_names,
            &paths.names_code_column,
            &paths.names_name_column,
        )?;
        if !with_boundaries {
            return Ok(GeoReference::from_names(names));
        }

        let mut geo = GeoReference::load_geojson(&paths.boundaries, &FeatureKeys::default())?;
        geo.merge_names(names);
        Ok(geo)
    }

    pub fn national_series(&self) -> Result<DataFrame, DashboardError> {
        let raw = DataLoader::load_csv(
            &self.config.data.national_tests,
            &LoadOptions::national_tests(),
        )?;
        national_series_from(&raw, self.config.rolling_window)
    }

    pub fn national(&self, period: Period) -> Result<NationalView, DashboardError> {
        let series = self.national_series()?;
        national_view_from(&series, period, self.config.zoom_months)
    }

    pub fn age_groups(&self, period: Period) -> Result<AgeGroupView, DashboardError> {
        age_group_view_from(
            &self.visits()?,
            period,
            self.config.rolling_window,
            self.config.share_scale,
        )
    }

    pub fn department(
        &self,
        selector: &DepartmentSelector,
        period: Period,
    ) -> Result<DepartmentView, DashboardError> {
        let geo = self.reference(false)?;
        department_view_from(&self.visits()?, selector, Some(&geo), period)
    }

    pub fn map(&self, wave: &str) -> Result<MapView, DashboardError> {
        let wave = self.config.wave(wave)?;
        let geo = self.reference(true)?;
        map_view_from(&self.visits()?, wave, &geo)
    }

    pub fn wave_peak(
        &self,
        selector: &DepartmentSelector,
        wave: &str,
        column: &str,
    ) -> Result<PeakView, DashboardError> {
        let wave = self.config.wave(wave)?;
        let geo = self.reference(false)?;
        peak_view_from(
            &self.visits()?,
            selector,
            wave,
            column,
            self.config.rolling_window,
            Some(&geo),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{date_column, DepartmentCode, DEPARTMENT_COL};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 10, d).unwrap()
    }

    fn national_raw() -> DataFrame {
        let dates: Vec<NaiveDate> = (1..=10).flat_map(|d| [day(d), day(d)]).collect();
        let n = dates.len();
        DataFrame::new(vec![
            date_column(DATE_COL, &dates).unwrap(),
            Column::new("P".into(), vec![5.0; n]),
            Column::new("T".into(), vec![50.0; n]),
            Column::new("pop".into(), vec![50_000.0; n]),
            Column::new("Ti".into(), vec![1.0; n]),
            Column::new("Tp".into(), vec![10.0; n]),
            Column::new("Td".into(), vec![3.0; n]),
        ])
        .unwrap()
    }

    fn visits() -> DataFrame {
        let mut dates = Vec::new();
        let mut deps = Vec::new();
        let mut ages = Vec::new();
        let mut hospit = Vec::new();
        for d in 1..=4 {
            for (dep, count) in [("75", d as f64), ("13", 1.0)] {
                dates.push(day(d));
                deps.push(dep);
                ages.push(ALL_AGES_CODE);
                hospit.push(count);
                dates.push(day(d));
                deps.push(dep);
                ages.push("E");
                hospit.push(count);
            }
        }
        let n = dates.len();
        DataFrame::new(vec![
            date_column(DATE_COL, &dates).unwrap(),
            Column::new(DEPARTMENT_COL.into(), deps),
            Column::new(AGE_GROUP_COL.into(), ages),
            Column::new(CONDITION_VISITS_COL.into(), vec![1.0; n]),
            Column::new(TOTAL_VISITS_COL.into(), vec![4.0; n]),
            Column::new(HOSPITALIZATIONS_COL.into(), hospit),
        ])
        .unwrap()
    }

    fn wave() -> Wave {
        Wave {
            name: "test".to_string(),
            start: day(1),
            end: day(4),
        }
    }

    #[test]
    fn national_series_is_daily_and_smoothed() {
        let series = national_series_from(&national_raw(), 7).unwrap();
        assert_eq!(series.height(), 10);
        let p7 = DataProcessor::values(&series, "P7").unwrap();
        assert_eq!(p7[5], None);
        assert_eq!(p7[6], Some(10.0));
        assert_eq!(
            DataProcessor::values(&series, "Tp7").unwrap()[9],
            Some(0.1)
        );
        let incidence = DataProcessor::values(&series, "Ti7").unwrap()[9].unwrap();
        assert!((incidence - 10.0).abs() < 1e-9);
        assert_eq!(DataProcessor::values(&series, "Tp").unwrap()[0], Some(10.0));
    }

    #[test]
    fn national_view_defaults_to_recent_months() {
        let series = national_series_from(&national_raw(), 7).unwrap();
        let view = national_view_from(&series, Period::default(), 9).unwrap();
        assert_eq!(view.zoom, DateWindow::new(day(1), day(10)));
        assert_eq!(view.figures.len(), 5);
        assert!(view.summary.is_some());
        // 70 cases over the last week against 20 the week before.
        assert_eq!(view.evolution_color, Some(crate::charts::RISING_COLOR));

        let period = Period {
            from: Some(day(3)),
            to: None,
        };
        let view = national_view_from(&series, period, 9).unwrap();
        assert_eq!(view.zoom, DateWindow::new(day(3), day(10)));
    }

    #[test]
    fn department_view_counts_all_ages_rows_once() {
        let selector = DepartmentSelector::Department(DepartmentCode::Numeric(75));
        let view = department_view_from(&visits(), &selector, None, Period::default()).unwrap();
        let cumulative = &view.cumulative.traces[0].y;
        assert_eq!(cumulative.last().copied().flatten(), Some(10.0));
        assert!(!view.cumulative.percent_axis);
        assert_eq!(view.share.traces[0].y[0], Some(0.25));
        assert!(view.share.percent_axis);
    }

    #[test]
    fn unknown_department_aborts_the_view() {
        let selector: DepartmentSelector = "999".parse().unwrap();
        let err = department_view_from(&visits(), &selector, None, Period::default()).unwrap_err();
        assert!(matches!(
            err,
            DashboardError::Department(DepartmentError::UnknownDepartment(_))
        ));
    }

    #[test]
    fn peak_view_finds_the_smoothed_maximum() {
        let selector = DepartmentSelector::Department(DepartmentCode::Numeric(75));
        let view =
            peak_view_from(&visits(), &selector, &wave(), HOSPITALIZATIONS_COL, 2, None).unwrap();
        assert_eq!(view.peak, Peak { date: day(4), value: 3.5 });
        assert_eq!(view.figure.vlines.len(), 1);
    }

    #[test]
    fn map_view_has_a_frame_per_day() {
        let geo = GeoReference::from_names([
            (DepartmentCode::Numeric(75), "Paris".to_string()),
            (DepartmentCode::Numeric(13), "Bouches-du-Rhône".to_string()),
        ]);
        let view = map_view_from(&visits(), &wave(), &geo).unwrap();
        assert_eq!(view.figure.frames.len(), 4);
        let last = &view.figure.frames[3];
        let paris = last
            .cells
            .iter()
            .find(|c| c.code == DepartmentCode::Numeric(75))
            .unwrap();
        assert_eq!(paris.cumulative, 10.0);
        assert_eq!(paris.name.as_deref(), Some("Paris"));
    }

    #[test]
    fn age_group_view_uses_full_span_by_default() {
        let view = age_group_view_from(&visits(), Period::default(), 1, 200.0).unwrap();
        assert_eq!(view.selection, DateWindow::new(day(1), day(4)));
        assert_eq!(view.evolution.traces.len(), 1);
        assert_eq!(view.evolution.traces[0].name, "1. 75 years old and more");
        // day 1: E = 2, all ages = 2, so E holds 200 * 2 / 4 = 100
        assert_eq!(view.rows[0].share, Some(100.0));
    }
}
