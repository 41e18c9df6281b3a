//! Epidash - command line front end of the epidemic dashboard.
//!
//! Runs one view and prints its figures as JSON, or renders them to PNG.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use epidash::charts::{Figure, StaticChartRenderer};
use epidash::dashboard::HOSPITALIZATIONS_COL;
use epidash::data::DepartmentSelector;
use epidash::{Dashboard, DashboardConfig, Period};
use serde::Serialize;

const PNG_SIZE: (u32, u32) = (1280, 720);

#[derive(Parser)]
#[command(name = "epidash")]
#[command(about = "Epidemic dashboard: national, age group and department views", long_about = None)]
struct Cli {
    /// TOML config with dataset paths and wave windows
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Smoothing window in days, overriding the config
    #[arg(long, global = true)]
    window: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RangeArgs {
    /// First date of the selection (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last date of the selection (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl RangeArgs {
    fn period(&self) -> Period {
        Period {
            from: self.from,
            to: self.to,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Cases, tests, positivity and incidence for the whole country
    National {
        #[command(flatten)]
        range: RangeArgs,
        /// Render the figures to PNG files with this path prefix
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Hospitalizations by age group
    AgeGroups {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Emergency visits of one department, or "france" for all of them
    Department {
        department: String,
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Cumulative hospitalizations per department during a wave
    Map {
        /// Wave name or number
        wave: String,
        /// Render this frame of the animation to PNG
        #[arg(long)]
        png: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        frame: usize,
    },
    /// Peak of a smoothed count during a wave
    Peak {
        department: String,
        wave: String,
        #[arg(long, default_value = HOSPITALIZATIONS_COL)]
        column: String,
        #[arg(long)]
        png: Option<PathBuf>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize view")?;
    println!("{json}");
    Ok(())
}

/// `prefix.png` for a single figure, `prefix-N.png` for several.
fn render_all(figures: &[&Figure], prefix: &Path) -> anyhow::Result<()> {
    for (i, figure) in figures.iter().enumerate() {
        let path = if figures.len() == 1 {
            prefix.with_extension("png")
        } else {
            let stem = prefix.with_extension("");
            PathBuf::from(format!("{}-{}.png", stem.display(), i + 1))
        };
        StaticChartRenderer::render_png(figure, &path, PNG_SIZE)
            .with_context(|| format!("failed to render {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

fn selector(raw: &str) -> anyhow::Result<DepartmentSelector> {
    raw.parse()
        .with_context(|| format!("invalid department {raw:?}"))
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DashboardConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DashboardConfig::default(),
    };
    if let Some(window) = cli.window {
        config.rolling_window = window;
    }
    let dashboard = Dashboard::new(config);

    match cli.command {
        Commands::National { range, png } => {
            let view = dashboard
                .national(range.period())
                .context("national view failed")?;
            match png {
                Some(prefix) => render_all(&view.figures.iter().collect::<Vec<_>>(), &prefix)?,
                None => print_json(&view)?,
            }
        }
        Commands::AgeGroups { range, png } => {
            let view = dashboard
                .age_groups(range.period())
                .context("age group view failed")?;
            match png {
                Some(prefix) => render_all(&[&view.evolution, &view.share], &prefix)?,
                None => print_json(&view)?,
            }
        }
        Commands::Department {
            department,
            range,
            png,
        } => {
            let view = dashboard
                .department(&selector(&department)?, range.period())
                .with_context(|| format!("department view failed for {department}"))?;
            match png {
                Some(prefix) => render_all(&[&view.share, &view.cumulative], &prefix)?,
                None => print_json(&view)?,
            }
        }
        Commands::Map { wave, png, frame } => {
            let view = dashboard
                .map(&wave)
                .with_context(|| format!("map view failed for {wave}"))?;
            match png {
                Some(path) => {
                    let path = path.with_extension("png");
                    let geo = dashboard
                        .reference(true)
                        .context("failed to load department boundaries")?;
                    StaticChartRenderer::render_map_png(
                        &view.figure,
                        frame,
                        Some(&geo),
                        &path,
                        PNG_SIZE,
                    )
                        .with_context(|| format!("failed to render {}", path.display()))?;
                    println!("{}", path.display());
                }
                None => print_json(&view)?,
            }
        }
        Commands::Peak {
            department,
            wave,
            column,
            png,
        } => {
            let view = dashboard
                .wave_peak(&selector(&department)?, &wave, &column)
                .with_context(|| format!("peak search failed for {department}"))?;
            match png {
                Some(prefix) => render_all(&[&view.figure], &prefix)?,
                None => print_json(&view)?,
            }
        }
    }

    Ok(())
}
