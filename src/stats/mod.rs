//! Stats module - smoothing, shares, peaks and headline indicators

mod calculator;
pub mod peak;
pub mod rolling;
pub mod shares;

pub use calculator::{StatsCalculator, WeeklySummary, INCIDENCE_BASE};
pub use peak::{Peak, PeakError, PeakFinder};
pub use rolling::{RollingError, RollingSmoother, DEFAULT_WINDOW};
pub use shares::{
    CategoryLabels, CategoryPoint, CategoryShare, ShareError, ShareNormalizer, AGE_GROUP_COL,
    AGE_GROUP_SCALE, ALL_AGES_CODE,
};
