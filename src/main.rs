use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use dawnchorus::db::models::{NewObservation, ProcessingStatus, ProcessingType, Recording};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dawnchorus", version, about = "Ecoacoustic measurement store")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    Temporal,
    Spectral,
}

impl From<TypeArg> for ProcessingType {
    fn from(t: TypeArg) -> Self {
        match t {
            TypeArg::Temporal => ProcessingType::Temporal,
            TypeArg::Spectral => ProcessingType::Spectral,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Normal,
    Skipped,
    Partial,
    Error,
}

impl From<StatusArg> for ProcessingStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Normal => ProcessingStatus::Normal,
            StatusArg::Skipped => ProcessingStatus::Skipped,
            StatusArg::Partial => ProcessingStatus::Partial,
            StatusArg::Error => ProcessingStatus::Error,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register scales and index configurations from an analysis YAML
    RegisterConfig {
        /// Path to the analysis config file
        path: PathBuf,
    },

    /// List registered processing scales
    Scales,

    /// List registered index configurations
    Configs {
        /// Only this config file's entries
        #[arg(long)]
        config: Option<String>,
    },

    /// Search the recording catalog
    Search {
        /// Earliest recording date (YYYY-MM-DD)
        #[arg(long)]
        date_from: Option<String>,

        /// Latest recording date (YYYY-MM-DD)
        #[arg(long)]
        date_to: Option<String>,

        /// Earliest time of day (HH:MM)
        #[arg(long)]
        time_from: Option<String>,

        /// Latest time of day (HH:MM)
        #[arg(long)]
        time_to: Option<String>,

        /// AudioMoth device id
        #[arg(long)]
        device: Option<String>,

        /// Processing status filter
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        /// Number of results
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },

    /// Record a recording's measured duration and check it for admission
    Admit {
        recording_id: i64,

        /// Measured duration in seconds
        actual_sec: f64,

        /// Tolerance override in seconds (defaults to config)
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Show stored index series for a recording
    Indices {
        recording_id: i64,

        /// Only these index names
        #[arg(long)]
        index: Vec<String>,

        /// Only this processing type
        #[arg(long, value_enum)]
        r#type: Option<TypeArg>,
    },

    /// Encode a recording's indices as an RGB strip
    Rgb {
        recording_id: i64,

        /// Index for the red channel
        #[arg(long)]
        red: Option<String>,

        /// Index for the green channel
        #[arg(long)]
        green: Option<String>,

        /// Index for the blue channel
        #[arg(long)]
        blue: Option<String>,

        /// Emit the full encoding as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Solar-relative label and period for a recording
    Label { recording_id: i64 },

    /// List one worker shard's slice of the catalog
    Shard {
        /// Shard index (0-based)
        index: u32,

        /// Total shard count
        count: u32,
    },

    /// Update a recording's physical location after a file move
    Relocate {
        recording_id: i64,

        /// New volume name
        volume: String,

        /// New path relative to the volume root
        relative_path: String,
    },

    /// Register a weather site and link recordings to its observations
    LinkWeather {
        /// Site name
        name: String,

        #[arg(long)]
        lat: f64,

        #[arg(long)]
        lon: f64,
    },

    /// Bulk-import hourly weather observations from a JSON export
    ImportWeather {
        /// Site id (from link-weather)
        site_id: i64,

        /// JSON file with an array of observations
        path: PathBuf,
    },

    /// Verify stored rows against the registered chunk grids
    Audit {
        /// Number of parallel shards (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Recompute the catalog-wide normalization ranges
    RefreshStats,

    /// Delete measurements for one recording and/or one index
    Clear {
        #[arg(long)]
        recording: Option<i64>,

        #[arg(long)]
        index: Option<String>,
    },

    /// Show store statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = dawnchorus::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(dawnchorus::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = dawnchorus::db::Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::RegisterConfig { path } => {
            let cfg = dawnchorus::config::AnalysisConfig::load(&path)
                .context("Failed to load analysis config")?;
            let (scales, stored) = db
                .populate_from_config(&cfg)
                .context("Registration failed")?;
            println!(
                "Registered {}: {} scales, {} new index configurations",
                cfg.name, scales, stored
            );
        }

        Commands::Scales => {
            let scales = db.list_scales().context("Query failed")?;
            if scales.is_empty() {
                println!("No scales registered. Run `dawnchorus register-config` first.");
                return Ok(());
            }
            println!("{:<30} {:<10} {:>10}", "Config", "Type", "Chunk (s)");
            println!("{}", "-".repeat(52));
            for s in scales {
                println!(
                    "{:<30} {:<10} {:>10.2}",
                    s.config_name, s.processing_type, s.chunk_duration_sec
                );
            }
        }

        Commands::Configs { config: name } => {
            let rows = db
                .list_configurations(name.as_deref())
                .context("Query failed")?;
            if rows.is_empty() {
                println!("No index configurations stored.");
                return Ok(());
            }
            println!(
                "{:<30} {:<24} {:<10} {:<16}",
                "Config", "Index", "Type", "Hash"
            );
            println!("{}", "-".repeat(82));
            for r in rows {
                println!(
                    "{:<30} {:<24} {:<10} {:<16}",
                    r.config_name, r.index_name, r.processing_type, r.config_hash
                );
            }
        }

        Commands::Search { date_from, date_to, time_from, time_to, device, status, limit } => {
            let filter = dawnchorus::db::catalog::RecordingFilter {
                date_from: parse_date_arg(date_from.as_deref())?,
                date_to: parse_date_arg(date_to.as_deref())?,
                time_from: parse_time_arg(time_from.as_deref())?,
                time_to: parse_time_arg(time_to.as_deref())?,
                device_id: device,
                status: status.map(Into::into),
                limit,
            };
            let results = db.search_recordings(&filter).context("Search failed")?;
            if results.is_empty() {
                println!("No recordings match.");
                return Ok(());
            }
            print_recording_table(&results);
        }

        Commands::Admit { recording_id, actual_sec, tolerance } => {
            let tolerance = tolerance.unwrap_or(config.duration_tolerance_sec);
            match db.admit_duration(recording_id, actual_sec, tolerance) {
                Ok(()) => println!(
                    "Recording {} admitted at {:.1}s",
                    recording_id, actual_sec
                ),
                Err(dawnchorus::db::StoreError::DurationTolerance { nominal_sec, .. }) => {
                    println!(
                        "Recording {} skipped: {:.1}s outside {:.1}s ± {:.1}s",
                        recording_id, actual_sec, nominal_sec, tolerance
                    );
                }
                Err(e) => return Err(e).context("Admission failed"),
            }
        }

        Commands::Indices { recording_id, index, r#type } => {
            let names: Vec<&str> = index.iter().map(String::as_str).collect();
            let names = if names.is_empty() { None } else { Some(&names[..]) };
            let series = db
                .query_measurements(recording_id, names, r#type.map(Into::into))
                .context("Query failed")?;
            if series.is_empty() {
                println!("No measurements for recording {}.", recording_id);
                return Ok(());
            }

            println!(
                "{:<24} {:<10} {:>9} {:>8} {:>8}",
                "Index", "Type", "Chunk (s)", "Chunks", "Missing"
            );
            println!("{}", "-".repeat(64));
            for s in &series {
                let missing = s.values.iter().filter(|v| v.is_none()).count();
                println!(
                    "{:<24} {:<10} {:>9.2} {:>8} {:>8}",
                    s.index_name,
                    s.processing_type,
                    s.chunk_duration_sec,
                    s.values.len(),
                    missing
                );
            }
        }

        Commands::Rgb { recording_id, red, green, blue, json } => {
            let assignment = dawnchorus::viz::ChannelAssignment { red, green, blue };
            let encoding = dawnchorus::viz::encode_rgb(&db, recording_id, &assignment)
                .context("Encoding failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&encoding)?);
                return Ok(());
            }

            println!(
                "{} chunks at {:.2}s cadence",
                encoding.chunks.len(),
                encoding.chunk_duration_sec
            );
            for (channel, range) in ["red", "green", "blue"].iter().zip(&encoding.ranges) {
                match range {
                    Some(r) => println!(
                        "  {:<5} normalized over [{:.4}, {:.4}] ({:?})",
                        channel, r.min, r.max, r.source
                    ),
                    None => println!("  {:<5} unassigned", channel),
                }
            }
        }

        Commands::Label { recording_id } => {
            let thresholds = config.periods.thresholds();
            let (label, period) = db
                .temporal_label(recording_id, &thresholds)
                .context("Labeling failed")?;
            println!("{}  ({})", label.time_since_last(), period);
            if let Some(next) = label.time_to_next() {
                println!("next event: {}", next);
            }
            if let Some(w) = db.weather_for_recording(recording_id)? {
                let temp = w
                    .temperature_2m
                    .map(|t| format!("{t:.1}°C"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "weather at {}: {} ({})",
                    w.observed_at.format("%Y-%m-%d %H:%M"),
                    temp,
                    w.site_name
                );
            }
        }

        Commands::Shard { index, count } => {
            let spec = dawnchorus::shard::ShardSpec::new(index, count)?;
            let recordings = db.shard_recordings(&spec).context("Query failed")?;
            println!(
                "Shard {}/{}: {} recordings",
                index,
                count,
                recordings.len()
            );
            print_recording_table(&recordings);
        }

        Commands::Relocate { recording_id, volume, relative_path } => {
            db.relocate_recording(recording_id, &volume, &relative_path)
                .context("Relocation failed")?;
            println!(
                "Recording {} relocated to {}/{}",
                recording_id, volume, relative_path
            );
        }

        Commands::LinkWeather { name, lat, lon } => {
            let site_id = db
                .register_site(&name, lat, lon, None, None)
                .context("Site registration failed")?;
            let linked = db.link_recordings(site_id).context("Linking failed")?;
            println!("Site {} (id {}): linked {} recordings", name, site_id, linked);
        }

        Commands::ImportWeather { site_id, path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let observations: Vec<NewObservation> =
                serde_json::from_str(&raw).context("Failed to parse observations")?;
            let imported = db
                .insert_observations(site_id, &observations)
                .context("Import failed")?;
            println!("Imported {} observations for site {}", imported, site_id);
        }

        Commands::Audit { jobs } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let report = dawnchorus::audit::audit_catalog(&db_path, workers)
                .context("Audit failed")?;
            println!(
                "Audited {} recordings, {} rows: {} findings",
                report.recordings_checked,
                report.rows_checked,
                report.findings.len()
            );
            for f in &report.findings {
                println!(
                    "  recording {} index {} chunk {}: {:?}",
                    f.recording_id, f.index_name, f.chunk_index, f.problem
                );
            }
            if !report.is_clean() {
                anyhow::bail!("audit found inconsistent rows");
            }
        }

        Commands::RefreshStats => {
            let names = db.list_index_names().context("Query failed")?;
            if names.is_empty() {
                println!("No measurements stored.");
                return Ok(());
            }

            let pb = ProgressBar::new(names.len() as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "  [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} indices",
                )?
                .progress_chars("##-"),
            );
            for name in &names {
                let stats = db.refresh_index_stats(name).context("Refresh failed")?;
                if let Some(s) = stats {
                    log::debug!("{}: [{:.4}, {:.4}]", name, s.min_value, s.max_value);
                }
                pb.inc(1);
            }
            pb.finish();
            println!("Refreshed normalization ranges for {} indices", names.len());
        }

        Commands::Clear { recording, index } => {
            let deleted = db
                .clear_measurements(recording, index.as_deref())
                .context("Clear failed")?;
            println!("Deleted {} measurement rows", deleted);
        }

        Commands::Stats => {
            let stats = db.store_stats().context("Query failed")?;
            println!("Recordings:      {}", stats.total_recordings);
            println!("  with values:   {}", stats.recordings_with_values);
            for (status, n) in &stats.status_counts {
                println!("  {:<12} {}", format!("{status}:"), n);
            }
            println!("Measurements:    {}", stats.total_values);
            if !stats.by_index.is_empty() {
                println!();
                println!(
                    "{:<10} {:<24} {:>12} {:>12}",
                    "Type", "Index", "Values", "Recordings"
                );
                println!("{}", "-".repeat(62));
                for (ptype, name, values, recordings) in &stats.by_index {
                    println!(
                        "{:<10} {:<24} {:>12} {:>12}",
                        ptype, name, values, recordings
                    );
                }
            }
        }
    }

    Ok(())
}

fn parse_date_arg(arg: Option<&str>) -> Result<Option<NaiveDate>> {
    arg.map(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Invalid date \"{}\" (expected YYYY-MM-DD)", s))
    })
    .transpose()
}

fn parse_time_arg(arg: Option<&str>) -> Result<Option<NaiveTime>> {
    arg.map(|s| {
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .with_context(|| format!("Invalid time \"{}\" (expected HH:MM)", s))
    })
    .transpose()
}

fn print_recording_table(recordings: &[Recording]) {
    println!(
        "{:>6} {:<20} {:<34} {:>8} {:<8}",
        "Id", "Recorded", "Path", "Dur (s)", "Status"
    );
    println!("{}", "-".repeat(80));
    for r in recordings {
        let path = format!("{}/{}", r.volume, r.relative_path);
        let path_display: String = if path.len() > 34 {
            format!("...{}", &path[path.len() - 31..])
        } else {
            path
        };
        println!(
            "{:>6} {:<20} {:<34} {:>8.1} {:<8}",
            r.id,
            r.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            path_display,
            r.duration_sec(),
            r.processing_status
        );
    }
}
