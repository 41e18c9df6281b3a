//! Static Chart Renderer
//! Draws figures to PNG files.
//!
//! Time series figures use days since the first date as the x axis and
//! label ticks with calendar dates. Map figures draw one frame, each
//! department as a disc at its centroid shaded by its running total, over
//! the department outlines.

use super::plotter::{Figure, Frame, Rgb, Trace, TraceKind, SHADE_COLOR, TREND_COLOR};
use crate::data::GeoReference;
use chrono::{Duration, NaiveDate};
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Drawing failed: {0}")]
    Draw(String),
    #[error("Figure {0:?} has nothing to draw")]
    EmptyFigure(String),
    #[error("Figure has no frame {0}")]
    NoFrame(usize),
}

fn draw_err<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Draw(e.to_string())
}

fn rgb(color: Rgb) -> RGBColor {
    RGBColor(color.0, color.1, color.2)
}

/// Split a trace at undefined points.
fn segments(trace: &Trace, origin: NaiveDate) -> Vec<Vec<(f64, f64)>> {
    let mut out: Vec<Vec<(f64, f64)>> = vec![Vec::new()];
    for (x, y) in trace.x.iter().zip(trace.y.iter()) {
        match y {
            Some(v) => {
                if let Some(current) = out.last_mut() {
                    current.push((day_offset(*x, origin), *v));
                }
            }
            None => out.push(Vec::new()),
        }
    }
    out.retain(|s| !s.is_empty());
    out
}

fn day_offset(date: NaiveDate, origin: NaiveDate) -> f64 {
    (date - origin).num_days() as f64
}

/// Running tops of the stacked traces, in trace order.
fn stack(traces: &[&Trace]) -> Vec<BTreeMap<NaiveDate, (f64, f64)>> {
    let mut base: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    traces
        .iter()
        .map(|trace| {
            trace
                .x
                .iter()
                .zip(trace.y.iter())
                .map(|(x, y)| {
                    let bottom = base.get(x).copied().unwrap_or(0.0);
                    let top = bottom + y.unwrap_or(0.0);
                    base.insert(*x, top);
                    (*x, (bottom, top))
                })
                .collect()
        })
        .collect()
}

pub struct StaticChartRenderer;

impl StaticChartRenderer {
    /// Render a time series figure to a PNG file.
    pub fn render_png(figure: &Figure, path: &Path, size: (u32, u32)) -> Result<(), RenderError> {
        let (first, last) = figure
            .x_range()
            .ok_or_else(|| RenderError::EmptyFigure(figure.title.clone()))?;
        let span = day_offset(last, first).max(1.0);

        let stacked: Vec<&Trace> = figure
            .traces
            .iter()
            .filter(|t| t.kind == TraceKind::StackedArea)
            .collect();
        let tops = stack(&stacked);

        let stacked_max = tops
            .iter()
            .flat_map(|m| m.values().map(|(_, top)| *top))
            .fold(0.0, f64::max);
        let y_max = figure
            .traces
            .iter()
            .flat_map(|t| t.defined_points().map(|(_, v)| v))
            .fold(stacked_max, f64::max);
        let y_max = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

        let root = BitMapBackend::new(path, size).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&figure.title, ("sans-serif", 24))
            .margin(20)
            .set_label_area_size(LabelAreaPosition::Left, 70)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(-0.5..span + 0.5, 0.0..y_max)
            .map_err(draw_err)?;

        let percent = figure.percent_axis;
        chart
            .configure_mesh()
            .x_labels(8)
            .x_label_formatter(&|v| (first + Duration::days(v.round() as i64)).to_string())
            .y_label_formatter(&|v| {
                if percent {
                    format!("{:.0}%", v * 100.0)
                } else {
                    format!("{:.0}", v)
                }
            })
            .y_desc(figure.y_label.as_str())
            .draw()
            .map_err(draw_err)?;

        for region in &figure.regions {
            let (x0, x1) = (day_offset(region.start, first), day_offset(region.end, first));
            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(x0, 0.0), (x1, y_max)],
                    rgb(SHADE_COLOR).mix(0.2).filled(),
                )))
                .map_err(draw_err)?;
        }

        for (trace, tops) in stacked.iter().zip(tops.iter()) {
            let color = rgb(trace.color);
            let mut outline: Vec<(f64, f64)> = tops
                .iter()
                .map(|(d, (_, top))| (day_offset(*d, first), *top))
                .collect();
            let floor: Vec<(f64, f64)> = tops
                .iter()
                .rev()
                .map(|(d, (bottom, _))| (day_offset(*d, first), *bottom))
                .collect();
            let edge = outline.clone();
            outline.extend(floor);
            chart
                .draw_series(std::iter::once(Polygon::new(outline, color.mix(0.6).filled())))
                .map_err(draw_err)?
                .label(trace.name.clone())
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], color.filled()));
            chart
                .draw_series(LineSeries::new(edge, color))
                .map_err(draw_err)?;
        }

        for trace in &figure.traces {
            let color = rgb(trace.color);
            match trace.kind {
                TraceKind::StackedArea => {}
                TraceKind::Bar => {
                    chart
                        .draw_series(trace.defined_points().map(|(d, v)| {
                            let x = day_offset(d, first);
                            Rectangle::new([(x - 0.4, 0.0), (x + 0.4, v)], color.filled())
                        }))
                        .map_err(draw_err)?
                        .label(trace.name.clone())
                        .legend(move |(x, y)| {
                            Rectangle::new([(x, y - 5), (x + 20, y + 5)], color.filled())
                        });
                }
                TraceKind::Line | TraceKind::Area => {
                    for (i, segment) in segments(trace, first).into_iter().enumerate() {
                        if trace.kind == TraceKind::Area {
                            chart
                                .draw_series(AreaSeries::new(segment.clone(), 0.0, color.mix(0.3)))
                                .map_err(draw_err)?;
                        }
                        let drawn = chart
                            .draw_series(LineSeries::new(segment, color.stroke_width(2)))
                            .map_err(draw_err)?;
                        if i == 0 {
                            drawn.label(trace.name.clone()).legend(move |(x, y)| {
                                PathElement::new(vec![(x, y), (x + 20, y)], color)
                            });
                        }
                    }
                }
                TraceKind::Marker => {
                    chart
                        .draw_series(trace.defined_points().map(|(d, v)| {
                            Circle::new((day_offset(d, first), v), 6, color.filled())
                        }))
                        .map_err(draw_err)?;
                }
            }
        }

        for line in &figure.vlines {
            let x = day_offset(line.at, first);
            let pieces: Vec<Vec<(f64, f64)>> = if line.dashed {
                (0..20)
                    .step_by(2)
                    .map(|i| {
                        let step = y_max / 20.0;
                        vec![(x, step * i as f64), (x, step * (i + 1) as f64)]
                    })
                    .collect()
            } else {
                vec![vec![(x, 0.0), (x, y_max)]]
            };
            for piece in pieces {
                chart
                    .draw_series(LineSeries::new(piece, BLACK.stroke_width(1)))
                    .map_err(draw_err)?;
            }
        }

        if figure.traces.iter().any(|t| t.kind != TraceKind::Marker) {
            chart
                .configure_series_labels()
                .position(SeriesLabelPosition::UpperLeft)
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(draw_err)?;
        }

        root.present().map_err(draw_err)?;
        log::info!("Rendered {:?} to {}", figure.title, path.display());
        Ok(())
    }

    /// Render one frame of a map figure to a PNG file, over the department
    /// outlines of `geo` when given.
    pub fn render_map_png(
        figure: &Figure,
        frame: usize,
        geo: Option<&GeoReference>,
        path: &Path,
        size: (u32, u32),
    ) -> Result<(), RenderError> {
        let Frame { date, cells } = figure.frames.get(frame).ok_or(RenderError::NoFrame(frame))?;
        let placed: Vec<([f64; 2], f64, String)> = cells
            .iter()
            .filter_map(|c| c.centroid.map(|at| (at, c.cumulative, c.code.to_string())))
            .collect();
        if placed.is_empty() {
            return Err(RenderError::EmptyFigure(figure.title.clone()));
        }

        let rings = geo.map(outlines).unwrap_or_default();
        let points = placed
            .iter()
            .map(|(at, _, _)| (at[0], at[1]))
            .chain(rings.iter().flatten().copied());
        let (x0, x1, y0, y1) = extent(points);
        let peak = placed.iter().map(|(_, v, _)| *v).fold(0.0, f64::max);

        let root = BitMapBackend::new(path, size).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(format!("{} ({})", figure.title, date), ("sans-serif", 24))
            .margin(20)
            .build_cartesian_2d(x0 - 0.5..x1 + 0.5, y0 - 0.5..y1 + 0.5)
            .map_err(draw_err)?;

        for ring in rings {
            chart
                .draw_series(LineSeries::new(ring, rgb(SHADE_COLOR)))
                .map_err(draw_err)?;
        }

        let trend = rgb(TREND_COLOR);
        chart
            .draw_series(placed.iter().map(|([x, y], value, _)| {
                let weight = if peak > 0.0 { value / peak } else { 0.0 };
                Circle::new((*x, *y), 10, trend.mix(0.15 + 0.85 * weight).filled())
            }))
            .map_err(draw_err)?;
        chart
            .draw_series(placed.iter().map(|([x, y], _, code)| {
                Text::new(code.clone(), (*x, *y), ("sans-serif", 10).into_font())
            }))
            .map_err(draw_err)?;

        root.present().map_err(draw_err)?;
        log::info!("Rendered map frame {} to {}", date, path.display());
        Ok(())
    }
}

/// Exterior rings of every department boundary, as closed paths.
fn outlines(geo: &GeoReference) -> Vec<Vec<(f64, f64)>> {
    geo.iter()
        .filter_map(|d| d.boundary.as_ref())
        .flat_map(|boundary| boundary.0.iter())
        .map(|polygon| polygon.exterior().coords().map(|c| (c.x, c.y)).collect())
        .collect()
}

/// `(min x, max x, min y, max y)` of a point set.
fn extent(points: impl Iterator<Item = (f64, f64)>) -> (f64, f64, f64, f64) {
    points.fold(
        (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
        |(x0, x1, y0, y1), (x, y)| (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
    )
}
