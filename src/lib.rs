//! Epidash - epidemic dashboard pipeline
//!
//! Loads national and department level epidemic CSV files, smooths and
//! normalizes them, and turns them into figures ready to render.

pub mod charts;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod stats;

pub use config::DashboardConfig;
pub use dashboard::{Dashboard, DashboardError, Period};
