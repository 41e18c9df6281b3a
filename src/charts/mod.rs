//! Charts module - figure building and rendering

mod plotter;
mod renderer;

pub use plotter::{
    ChartPlotter, Figure, Frame, Rgb, ShadedRegion, Trace, TraceKind, VerticalLine, CASES_FILL,
    FALLING_COLOR, RISING_COLOR, TREND_COLOR,
};
pub use renderer::{RenderError, StaticChartRenderer};
