use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dyad_lib::{
    analysis::NativeAnalysis,
    gate::{
        flag_unreliable_segments, identify_and_impute_outliers, mark_implausible, ImputeMethod,
        DEFAULT_CV_THRESHOLD, DEFAULT_GROUP_BY, DEFAULT_MIN_POINTS, DEFAULT_PLAUSIBLE_RANGE,
        DEFAULT_Z_THRESHOLD,
    },
    io::{
        dyad::pair_recordings,
        export::{plot_dir, write_dyad_outputs},
    },
    pipeline::{validate_pair, DyadOutput, DyadPipeline, SubjectIdentity},
    plot::{window_figures, Figure, PlotBackend, Series},
    report::{Cell, MetricsTable},
    simulate::{write_dyad_files, SimulationConfig},
    PipelineConfig,
};
use env_logger::Env;
use log::{debug, error, info, warn};
use plotters::prelude::*;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Points per trace in a QA figure.
const MAX_PLOT_POINTS: usize = 4_000;

#[derive(Parser)]
#[command(
    name = "dyad",
    version,
    about = "Windowed HRV metrics for mother-child ECG recordings"
)]
struct Cli {
    /// Logging verbosity (e.g., debug, info, warn)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every ECG/event pair of a raw directory
    Process {
        #[arg(long)]
        raw_dir: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Pipeline configuration (TOML); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Root of the QA figures (default: <out>/qa)
        #[arg(long)]
        qa_dir: Option<PathBuf>,
        #[arg(long)]
        no_qa_plots: bool,
    },
    /// Screen aggregated metrics tables for outliers and unreliable segments
    Screen {
        /// One or more metrics CSVs; they are stacked before screening
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "HRV_RMSSD")]
        metric: String,
        #[arg(long, value_delimiter = ',', default_value = DEFAULT_GROUP_BY)]
        group_by: Vec<String>,
        #[arg(long, default_value = "median")]
        method: ImputeMethod,
        #[arg(long, default_value_t = DEFAULT_Z_THRESHOLD)]
        z_threshold: f64,
        #[arg(long, default_value_t = DEFAULT_CV_THRESHOLD)]
        cv_threshold: f64,
        #[arg(long, default_value_t = DEFAULT_MIN_POINTS)]
        min_points: usize,
        /// Blank out metric values outside [--lower, --upper] before screening
        #[arg(long)]
        plausibility: bool,
        #[arg(long, default_value_t = DEFAULT_PLAUSIBLE_RANGE.0)]
        lower: f64,
        #[arg(long, default_value_t = DEFAULT_PLAUSIBLE_RANGE.1)]
        upper: f64,
    },
    /// Print or write the default pipeline configuration
    Params {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a synthetic dyad recording in the acquisition export format
    Simulate {
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 'B')]
        condition: char,
        #[arg(long, default_value_t = 1)]
        subject_id: u32,
        #[arg(long, default_value = "W1")]
        wave: String,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 660.0)]
        duration_s: f64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();
    match cli.command {
        Commands::Process {
            raw_dir,
            out,
            config,
            qa_dir,
            no_qa_plots,
        } => {
            let qa_root = qa_dir.unwrap_or_else(|| out.join("qa"));
            cmd_process(&raw_dir, &out, config.as_deref(), &qa_root, !no_qa_plots)?
        }
        Commands::Screen {
            inputs,
            out,
            metric,
            group_by,
            method,
            z_threshold,
            cv_threshold,
            min_points,
            plausibility,
            lower,
            upper,
        } => {
            let range = plausibility.then_some((lower, upper));
            let screen = ScreenSettings {
                metric,
                group_by,
                method,
                z_threshold,
                cv_threshold,
                min_points,
                range,
            };
            cmd_screen(&inputs, &out, &screen)?
        }
        Commands::Params { out } => cmd_params(out.as_deref())?,
        Commands::Simulate {
            out_dir,
            condition,
            subject_id,
            wave,
            seed,
            duration_s,
        } => {
            let identity = SubjectIdentity {
                condition: condition.to_ascii_uppercase(),
                subject_id,
                wave,
            };
            let config = SimulationConfig {
                seed,
                duration_s,
                ..SimulationConfig::default()
            };
            cmd_simulate(&out_dir, &identity, &config)?
        }
    }
    Ok(())
}

fn cmd_process(
    raw_dir: &Path,
    out: &Path,
    config: Option<&Path>,
    qa_root: &Path,
    emit_plots: bool,
) -> Result<()> {
    let config = match config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let overrides = config.registry();
    let analysis = NativeAnalysis::default();
    let pipeline = DyadPipeline {
        base: &config.parameters,
        overrides: &overrides,
        analysis: &analysis,
        emit_plots,
    };
    let pairs = pair_recordings(raw_dir)?;
    info!("found {} dyad(s) in {}", pairs.len(), raw_dir.display());

    let mut processed = Vec::new();
    let mut failed = Vec::new();
    for (ecg, events) in &pairs {
        let outcome = pipeline.process_dyad(ecg, events).and_then(|output| {
            let dir = write_dyad_outputs(out, &output)?;
            if emit_plots {
                render_qa_plots(&output, qa_root);
            }
            Ok(dir)
        });
        match outcome {
            Ok(dir) => processed.push(dir.display().to_string()),
            Err(err) => {
                error!("failed to process {}: {err}", ecg.display());
                debug!("{err:?}");
                failed.push(json!({
                    "ecg": ecg.display().to_string(),
                    "events": events.display().to_string(),
                    "error": format!("{err:#}"),
                }));
            }
        }
    }
    info!(
        "processed {} of {} dyad(s), {} failed",
        processed.len(),
        pairs.len(),
        failed.len()
    );
    let summary = json!({ "processed": processed, "failed": failed });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn render_qa_plots(output: &DyadOutput, qa_root: &Path) {
    for role in output.roles() {
        let dir = plot_dir(qa_root, &output.identity, role.role);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!("cannot create {}: {err}", dir.display());
            continue;
        }
        let fs = role.parameters.sampling_frequency();
        for request in &role.plot_requests {
            let path = dir.join(request.file_name());
            let panels = window_figures(request, fs, MAX_PLOT_POINTS);
            if let Err(err) = PngBackend::new(&path).draw(&panels) {
                warn!("failed to render {}: {err}", path.display());
            }
        }
    }
}

struct PngBackend<'a> {
    path: &'a Path,
    size: (u32, u32),
}

impl<'a> PngBackend<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            size: (1200, 600),
        }
    }
}

fn padded(lo: f64, hi: f64) -> (f64, f64) {
    if hi > lo {
        let pad = (hi - lo) * 0.05;
        (lo - pad, hi + pad)
    } else {
        (lo - 0.5, hi + 0.5)
    }
}

impl PlotBackend for PngBackend<'_> {
    fn draw(&mut self, panels: &[Figure]) -> Result<()> {
        let root = BitMapBackend::new(self.path, self.size).into_drawing_area();
        root.fill(&WHITE)?;
        let areas = root.split_evenly((panels.len().max(1), 1));
        for (area, fig) in areas.iter().zip(panels) {
            let Some((x_min, x_max, y_min, y_max)) = fig.bounds() else {
                continue;
            };
            let (x_min, x_max) = padded(x_min, x_max);
            let (y_min, y_max) = padded(y_min, y_max);
            let mut chart = ChartBuilder::on(area)
                .margin(10)
                .caption(
                    fig.title.clone().unwrap_or_else(|| "Plot".into()),
                    ("sans-serif", 20),
                )
                .x_label_area_size(30)
                .y_label_area_size(50)
                .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
            chart
                .configure_mesh()
                .x_desc(fig.x.label.clone().unwrap_or_default())
                .y_desc(fig.y.label.clone().unwrap_or_default())
                .draw()?;
            for series in &fig.series {
                match series {
                    Series::Line(line) => {
                        let (r, g, b) = line.style.color.rgb();
                        let style = RGBColor(r, g, b).stroke_width(line.style.width.round() as u32);
                        chart.draw_series(LineSeries::new(
                            line.points.iter().map(|p| (p[0], p[1])),
                            style,
                        ))?;
                    }
                    Series::Scatter(scatter) => {
                        let (r, g, b) = scatter.color.rgb();
                        let style = RGBColor(r, g, b).filled();
                        chart.draw_series(
                            scatter
                                .points
                                .iter()
                                .map(|p| Circle::new((p[0], p[1]), scatter.radius, style)),
                        )?;
                    }
                }
            }
        }
        root.present()
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

struct ScreenSettings {
    metric: String,
    group_by: Vec<String>,
    method: ImputeMethod,
    z_threshold: f64,
    cv_threshold: f64,
    min_points: usize,
    range: Option<(f64, f64)>,
}

fn count_true(table: &MetricsTable, column: &str) -> Result<usize> {
    Ok(table
        .column(column)?
        .into_iter()
        .filter(|cell| **cell == Cell::Bool(true))
        .count())
}

fn cmd_screen(inputs: &[PathBuf], out: &Path, screen: &ScreenSettings) -> Result<()> {
    let tables = inputs
        .iter()
        .map(|path| MetricsTable::read_csv(path))
        .collect::<Result<Vec<_>>>()?;
    let mut table = MetricsTable::concat(&tables);
    let mut metric = screen.metric.clone();
    if let Some((lower, upper)) = screen.range {
        table = mark_implausible(&table, &metric, lower, upper)?;
        metric = format!("{metric}_plausible");
    }
    let group_by: Vec<&str> = screen.group_by.iter().map(String::as_str).collect();
    let table = identify_and_impute_outliers(
        &table,
        &metric,
        screen.method,
        screen.z_threshold,
        &group_by,
    )?;
    let table = flag_unreliable_segments(
        &table,
        &metric,
        screen.cv_threshold,
        screen.min_points,
        &group_by,
    )?;
    table.write_csv(out)?;
    let summary = json!({
        "rows": table.len(),
        "metric": metric,
        "outliers": count_true(&table, &format!("{metric}_z_score_outlier"))?,
        "unreliable_rows": count_true(&table, "segment_outlier")?,
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_params(out: Option<&Path>) -> Result<()> {
    let text = PipelineConfig::default().to_toml_string()?;
    match out {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}

fn cmd_simulate(out_dir: &Path, identity: &SubjectIdentity, config: &SimulationConfig) -> Result<()> {
    let (ecg, events) = write_dyad_files(out_dir, identity, config)?;
    validate_pair(&ecg, &events)?;
    let summary = json!({
        "ecg": ecg.display().to_string(),
        "events": events.display().to_string(),
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
