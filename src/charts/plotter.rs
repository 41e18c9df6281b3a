//! Chart Plotter Module
//! Builds renderer-agnostic figures from figure-ready tables.

use crate::data::{Bounds, DataProcessor, DateWindow, MapCell, ProcessorError};
use crate::stats::{CategoryShare, Peak, WeeklySummary};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// Bar fill of the case counts.
pub const CASES_FILL: Rgb = Rgb(238, 213, 220); // #eed5dc
/// Line and area color of smoothed national series.
pub const TREND_COLOR: Rgb = Rgb(200, 115, 139); // #c8738b
pub const SHADE_COLOR: Rgb = Rgb(128, 128, 128);
pub const RISING_COLOR: Rgb = Rgb(34, 139, 34); // #228b22
pub const FALLING_COLOR: Rgb = Rgb(255, 0, 0);

pub const PALETTE: [Rgb; 10] = [
    Rgb(231, 76, 60),  // Red
    Rgb(46, 204, 113), // Green
    Rgb(155, 89, 182), // Purple
    Rgb(243, 156, 18), // Orange
    Rgb(26, 188, 156), // Teal
    Rgb(233, 30, 99),  // Pink
    Rgb(0, 188, 212),  // Cyan
    Rgb(255, 87, 34),  // Deep Orange
    Rgb(121, 85, 72),  // Brown
    Rgb(96, 125, 139), // Blue Grey
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Bar,
    Line,
    /// Filled down to zero.
    Area,
    /// Stacked on top of the previous stacked traces.
    StackedArea,
    Marker,
}

/// One (x, y) series of a figure, optionally tagged with a category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub name: String,
    pub kind: TraceKind,
    pub color: Rgb,
    pub category: Option<String>,
    pub x: Vec<NaiveDate>,
    /// Undefined points break the trace.
    pub y: Vec<Option<f64>>,
}

impl Trace {
    pub fn new(name: &str, kind: TraceKind, color: Rgb, points: Vec<(NaiveDate, Option<f64>)>) -> Self {
        let (x, y) = points.into_iter().unzip();
        Self {
            name: name.to_string(),
            kind,
            color,
            category: None,
            x,
            y,
        }
    }

    pub fn defined_points(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.x
            .iter()
            .zip(self.y.iter())
            .filter_map(|(x, y)| y.map(|v| (*x, v)))
    }
}

/// Shaded date range drawn behind the traces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShadedRegion {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerticalLine {
    pub at: NaiveDate,
    pub dashed: bool,
}

/// One animation step of a map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub date: NaiveDate,
    pub cells: Vec<MapCell>,
}

/// Everything a renderer needs to draw one chart.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Figure {
    pub title: String,
    pub y_label: String,
    /// Y values are fractions to display as percentages.
    pub percent_axis: bool,
    pub traces: Vec<Trace>,
    pub regions: Vec<ShadedRegion>,
    pub vlines: Vec<VerticalLine>,
    pub frames: Vec<Frame>,
}

impl Figure {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    /// Date span covered by traces, regions and lines.
    pub fn x_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let dates = self
            .traces
            .iter()
            .flat_map(|t| t.x.iter().copied())
            .chain(self.regions.iter().flat_map(|r| [r.start, r.end]))
            .chain(self.vlines.iter().map(|l| l.at));
        dates.fold(None, |range, d| match range {
            None => Some((d, d)),
            Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
        })
    }
}

/// Creates the dashboard figures.
pub struct ChartPlotter;

impl ChartPlotter {
    /// Get color for the n-th category.
    pub fn get_category_color(index: usize) -> Rgb {
        PALETTE[index % PALETTE.len()]
    }

    fn trace_from(
        df: &DataFrame,
        column: &str,
        name: &str,
        kind: TraceKind,
        color: Rgb,
    ) -> Result<Trace, ProcessorError> {
        Ok(Trace::new(name, kind, color, DataProcessor::series(df, column)?))
    }

    /// Daily cases as bars with their 7-day average, strictly inside the
    /// zoom window.
    pub fn positive_cases(df: &DataFrame, zoom: &DateWindow) -> Result<Figure, ProcessorError> {
        let zoomed = DataProcessor::filter_dates(df, zoom, Bounds::Exclusive)?;
        let mut figure = Figure::new("Positive cases");
        figure
            .traces
            .push(Self::trace_from(&zoomed, "P", "cases", TraceKind::Bar, CASES_FILL)?);
        figure.traces.push(Self::trace_from(
            &zoomed,
            "P7",
            "moving average over the last 7 days",
            TraceKind::Line,
            TREND_COLOR,
        )?);
        Ok(figure)
    }

    /// Whole series with the zoom window shaded and bounded by dashed lines.
    pub fn positive_cases_with_zoom(
        df: &DataFrame,
        zoom: &DateWindow,
    ) -> Result<Figure, ProcessorError> {
        let mut figure = Figure::new("Epidemic evolution");
        figure
            .traces
            .push(Self::trace_from(df, "P", "cases", TraceKind::Bar, CASES_FILL)?);
        figure.traces.push(Self::trace_from(
            df,
            "P7",
            "moving average over the last 7 days",
            TraceKind::Line,
            TREND_COLOR,
        )?);
        figure.regions.push(ShadedRegion {
            start: zoom.start,
            end: zoom.end,
            label: Some("Zoom Area".to_string()),
        });
        figure.vlines.push(VerticalLine {
            at: zoom.start,
            dashed: true,
        });
        figure.vlines.push(VerticalLine {
            at: zoom.end,
            dashed: true,
        });
        Ok(figure)
    }

    /// Smoothed number of people tested.
    pub fn tests_trend(df: &DataFrame) -> Result<Figure, ProcessorError> {
        let mut figure = Figure::new("People tested");
        figure
            .traces
            .push(Self::trace_from(df, "T7", "tests", TraceKind::Area, TREND_COLOR)?);
        Ok(figure)
    }

    /// Smoothed share of positive tests.
    pub fn positive_rate(df: &DataFrame) -> Result<Figure, ProcessorError> {
        let mut figure = Figure::new("Positive rate");
        figure.percent_axis = true;
        figure
            .traces
            .push(Self::trace_from(df, "Tp7", "positivity", TraceKind::Area, TREND_COLOR)?);
        Ok(figure)
    }

    /// Smoothed cases per 100 000 inhabitants.
    pub fn incidence_rate(df: &DataFrame) -> Result<Figure, ProcessorError> {
        let mut figure = Figure::new("Incidence rate");
        figure.y_label = "per 100,000".to_string();
        figure
            .traces
            .push(Self::trace_from(df, "Ti7", "incidence", TraceKind::Area, TREND_COLOR)?);
        Ok(figure)
    }

    /// One trace per category, following `order`; categories not listed
    /// come last.
    fn category_traces(
        rows: &[&CategoryShare],
        order: &[String],
        kind: TraceKind,
        pick: fn(&CategoryShare) -> Option<f64>,
    ) -> Vec<Trace> {
        let mut by_category: BTreeMap<&str, Vec<(NaiveDate, Option<f64>)>> = BTreeMap::new();
        for row in rows {
            by_category
                .entry(row.category.as_str())
                .or_default()
                .push((row.date, pick(row)));
        }

        let mut names: Vec<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|c| by_category.contains_key(c))
            .collect();
        let unlisted: Vec<&str> = by_category
            .keys()
            .copied()
            .filter(|c| !order.iter().any(|o| o.as_str() == *c))
            .collect();
        names.extend(unlisted);

        names
            .into_iter()
            .enumerate()
            .filter_map(|(i, name)| {
                let mut points = by_category.remove(name)?;
                points.sort_by_key(|(d, _)| *d);
                let mut trace = Trace::new(name, kind, Self::get_category_color(i), points);
                trace.category = Some(name.to_string());
                Some(trace)
            })
            .collect()
    }

    /// Smoothed hospitalizations stacked by age group, with the selected
    /// period shaded.
    pub fn age_group_evolution(
        rows: &[CategoryShare],
        order: &[String],
        selection: &DateWindow,
    ) -> Figure {
        let all: Vec<&CategoryShare> = rows.iter().collect();
        let mut figure = Figure::new("Evolution of COVID hospitalizations by age group");
        figure.y_label = "Count".to_string();
        figure.traces = Self::category_traces(&all, order, TraceKind::StackedArea, |r| r.value);
        figure.regions.push(ShadedRegion {
            start: selection.start,
            end: selection.end,
            label: None,
        });
        figure
    }

    /// Age-group shares inside `start <= date < end` of the selection.
    pub fn age_group_share(
        rows: &[CategoryShare],
        order: &[String],
        selection: &DateWindow,
    ) -> Figure {
        let selected: Vec<&CategoryShare> = rows
            .iter()
            .filter(|r| selection.contains(r.date, Bounds::HalfOpen))
            .collect();
        let mut figure = Figure::new("Share of each age group in hospitalizations");
        figure.traces = Self::category_traces(&selected, order, TraceKind::StackedArea, |r| r.share);
        figure
    }

    /// Share of emergency visits attributable to the condition.
    pub fn visit_share(df: &DataFrame, title: &str, ratio_col: &str) -> Result<Figure, ProcessorError> {
        let mut figure = Figure::new(title);
        figure.percent_axis = true;
        figure.traces.push(Self::trace_from(
            df,
            ratio_col,
            "share of emergency visits",
            TraceKind::Line,
            TREND_COLOR,
        )?);
        Ok(figure)
    }

    /// Running total of hospitalizations, on a count axis.
    pub fn cumulative_count(
        df: &DataFrame,
        title: &str,
        cumulative_col: &str,
    ) -> Result<Figure, ProcessorError> {
        let mut figure = Figure::new(title);
        figure.y_label = "Count".to_string();
        figure.traces.push(Self::trace_from(
            df,
            cumulative_col,
            "cumulative hospitalizations",
            TraceKind::Area,
            PALETTE[9],
        )?);
        Ok(figure)
    }

    /// Color of the week-over-week evolution figure: green while cases
    /// grow, red otherwise.
    pub fn evolution_color(summary: &WeeklySummary) -> Rgb {
        if summary.is_rising() {
            RISING_COLOR
        } else {
            FALLING_COLOR
        }
    }

    /// Choropleth animation: one frame per date.
    pub fn choropleth(title: &str, cells: Vec<MapCell>) -> Figure {
        let mut frames: Vec<Frame> = Vec::new();
        for cell in cells {
            match frames.last_mut() {
                Some(frame) if frame.date == cell.date => frame.cells.push(cell),
                _ => frames.push(Frame {
                    date: cell.date,
                    cells: vec![cell],
                }),
            }
        }

        let mut figure = Figure::new(title);
        figure.frames = frames;
        figure
    }

    /// Mark a peak on an existing figure.
    pub fn mark_peak(figure: &mut Figure, peak: &Peak, window: &DateWindow) {
        figure.regions.push(ShadedRegion {
            start: window.start,
            end: window.end,
            label: None,
        });
        figure.vlines.push(VerticalLine {
            at: peak.date,
            dashed: false,
        });
        figure.traces.push(Trace::new(
            "peak",
            TraceKind::Marker,
            PALETTE[0],
            vec![(peak.date, Some(peak.value))],
        ));
    }

    /// Single smoothed series of a table, as a line.
    pub fn series_line(
        df: &DataFrame,
        column: &str,
        title: &str,
    ) -> Result<Figure, ProcessorError> {
        let mut figure = Figure::new(title);
        figure
            .traces
            .push(Self::trace_from(df, column, column, TraceKind::Line, TREND_COLOR)?);
        Ok(figure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{date_column, DepartmentCode, DATE_COL};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 2, d).unwrap()
    }

    fn national() -> DataFrame {
        let dates: Vec<NaiveDate> = (1..=5).map(day).collect();
        DataFrame::new(vec![
            date_column(DATE_COL, &dates).unwrap(),
            Column::new("P".into(), vec![1.0, 2.0, 3.0, 4.0, 5.0]),
            Column::new("P7".into(), vec![None, None, Some(2.0), Some(3.0), Some(4.0)]),
        ])
        .unwrap()
    }

    fn share(d: u32, category: &str, value: f64) -> CategoryShare {
        CategoryShare {
            date: day(d),
            category: category.to_string(),
            value: Some(value),
            share: Some(value),
        }
    }

    #[test]
    fn zoomed_cases_exclude_window_ends() {
        let figure = ChartPlotter::positive_cases(&national(), &DateWindow::new(day(1), day(5)))
            .unwrap();
        assert_eq!(figure.traces[0].x, vec![day(2), day(3), day(4)]);
        assert_eq!(figure.traces[1].y, vec![None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn zoom_overview_shades_window() {
        let zoom = DateWindow::new(day(2), day(4));
        let figure = ChartPlotter::positive_cases_with_zoom(&national(), &zoom).unwrap();
        assert_eq!(figure.traces[0].x.len(), 5);
        assert_eq!(figure.regions.len(), 1);
        assert_eq!(figure.vlines.len(), 2);
        assert!(figure.vlines.iter().all(|l| l.dashed));
        assert_eq!(figure.x_range(), Some((day(1), day(5))));
    }

    #[test]
    fn category_traces_follow_display_order() {
        let rows = vec![
            share(1, "b", 1.0),
            share(1, "a", 2.0),
            share(1, "z", 3.0),
            share(2, "a", 4.0),
        ];
        let order = vec!["b".to_string(), "a".to_string()];
        let figure = ChartPlotter::age_group_evolution(&rows, &order, &DateWindow::new(day(1), day(2)));
        let names: Vec<&str> = figure.traces.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "z"]);
        assert_eq!(figure.traces[1].y, vec![Some(2.0), Some(4.0)]);
    }

    #[test]
    fn share_selection_is_half_open() {
        let rows = vec![share(1, "a", 1.0), share(2, "a", 2.0), share(3, "a", 3.0)];
        let figure = ChartPlotter::age_group_share(&rows, &[], &DateWindow::new(day(1), day(3)));
        assert_eq!(figure.traces[0].x, vec![day(1), day(2)]);
    }

    #[test]
    fn choropleth_groups_cells_into_frames() {
        let cell = |d: u32, code: u16| MapCell {
            date: day(d),
            code: DepartmentCode::Numeric(code),
            name: None,
            centroid: None,
            cumulative: 1.0,
        };
        let figure = ChartPlotter::choropleth("map", vec![cell(1, 1), cell(1, 2), cell(2, 1)]);
        assert_eq!(figure.frames.len(), 2);
        assert_eq!(figure.frames[0].cells.len(), 2);
        assert_eq!(figure.frames[1].date, day(2));
    }

    #[test]
    fn figure_serializes_undefined_as_null() {
        let figure = ChartPlotter::series_line(&national(), "P7", "P7").unwrap();
        let json = serde_json::to_value(&figure).unwrap();
        assert!(json["traces"][0]["y"][0].is_null());
        assert_eq!(json["traces"][0]["kind"], "line");
        assert_eq!(json["traces"][0]["x"][0], "2021-02-01");
    }

    #[test]
    fn visit_share_and_count_use_separate_axes() {
        let dates: Vec<NaiveDate> = (1..=2).map(day).collect();
        let df = DataFrame::new(vec![
            date_column(DATE_COL, &dates).unwrap(),
            Column::new("ratio".into(), vec![0.25, 0.5]),
            Column::new("cumulative".into(), vec![1200.0, 2500.0]),
        ])
        .unwrap();

        let share = ChartPlotter::visit_share(&df, "share", "ratio").unwrap();
        assert!(share.percent_axis);
        assert_eq!(share.traces.len(), 1);
        assert_eq!(share.traces[0].y, vec![Some(0.25), Some(0.5)]);

        let count = ChartPlotter::cumulative_count(&df, "count", "cumulative").unwrap();
        assert!(!count.percent_axis);
        assert_eq!(count.traces.len(), 1);
        assert_eq!(count.traces[0].y, vec![Some(1200.0), Some(2500.0)]);
    }

    #[test]
    fn evolution_color_follows_the_trend() {
        let mut summary = WeeklySummary {
            latest: day(7),
            total_cases: 30.0,
            week_cases: 20.0,
            week_tests: 100.0,
            previous_week_cases: 10.0,
            positivity: Some(20.0),
            evolution: Some(50.0),
            latest_incidence: None,
            latest_tests: None,
            latest_positivity: None,
        };
        assert_eq!(ChartPlotter::evolution_color(&summary), RISING_COLOR);

        summary.evolution = Some(-10.0);
        assert_eq!(ChartPlotter::evolution_color(&summary), FALLING_COLOR);
        summary.evolution = None;
        assert_eq!(ChartPlotter::evolution_color(&summary), FALLING_COLOR);
    }
}
