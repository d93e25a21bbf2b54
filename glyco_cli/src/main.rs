use chrono::{Duration, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use glyco_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "glyco")]
#[command(about = "Insulin and glycemia study over pump and sensor data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $XDG_CONFIG_HOME/glyco/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Timeline file (default: <data_dir>/timeline.jsonl)
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    /// Log per-step detail
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Study one window (default: the day of the last record)
    Study {
        /// Window start, YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]
        #[arg(long, value_parser = parse_instant)]
        start: Option<NaiveDateTime>,

        /// Window end (exclusive, default: one day after start)
        #[arg(long, value_parser = parse_instant)]
        end: Option<NaiveDateTime>,

        /// Label attached to the run
        #[arg(long)]
        label: Option<String>,

        /// Print the full output as JSON
        #[arg(long)]
        json: bool,

        /// Write CSV files into this directory
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },

    /// Study each of the last days separately
    Daily {
        /// Number of days (default from config)
        #[arg(long)]
        days: Option<u32>,

        /// Print the full output as JSON
        #[arg(long)]
        json: bool,

        /// Write CSV files into one sub-directory per day
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },

    /// Append a synthetic day to the timeline file
    Demo {
        /// Day to generate (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn parse_instant(s: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|_| format!("invalid date/time '{}'", s))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        glyco_core::logging::init_with_level("debug");
    } else {
        glyco_core::logging::init();
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let input = cli
        .input
        .clone()
        .unwrap_or_else(|| config.data.timeline_path());

    match cli.command {
        Commands::Study {
            start,
            end,
            label,
            json,
            csv_dir,
        } => cmd_study(&input, &config, start, end, label, json, csv_dir.as_deref()),
        Commands::Daily {
            days,
            json,
            csv_dir,
        } => cmd_daily(
            &input,
            &config,
            days.unwrap_or(config.report.days),
            json,
            csv_dir.as_deref(),
        ),
        Commands::Demo { date } => cmd_demo(&input, date),
    }
}

fn load(input: &Path) -> Result<Timeline> {
    let (timeline, report) = load_timeline(input)?;
    if report.rejected > 0 {
        eprintln!(
            "Skipped {} invalid records in {}",
            report.rejected,
            input.display()
        );
    }
    Ok(timeline)
}

fn cmd_study(
    input: &Path,
    config: &Config,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    label: Option<String>,
    json: bool,
    csv_dir: Option<&Path>,
) -> Result<()> {
    let timeline = load(input)?;

    let start = match start {
        Some(start) => start,
        None => {
            let last = timeline.last_instant().ok_or(Error::EmptyTimeline)?;
            day_window(last.date()).0
        }
    };
    let end = end.unwrap_or(start + Duration::days(1));
    let label = label.unwrap_or_else(|| start.date().to_string());

    let params = RunParams::new(start, end, label, config.model.clone());
    let output = run(&timeline, &params)?;

    if let Some(dir) = csv_dir {
        export_run(&output, dir)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        display_run(&output);
        if let Some(dir) = csv_dir {
            println!("✓ CSV written to {}", dir.display());
        }
    }
    Ok(())
}

fn cmd_daily(
    input: &Path,
    config: &Config,
    days: u32,
    json: bool,
    csv_dir: Option<&Path>,
) -> Result<()> {
    let timeline = load(input)?;
    let outputs = run_daily(&timeline, days, &config.model)?;

    if let Some(dir) = csv_dir {
        for output in &outputs {
            export_run(output, &dir.join(&output.label))?;
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        for output in &outputs {
            display_run(output);
        }
        if let Some(dir) = csv_dir {
            println!("✓ CSV written to {}", dir.display());
        }
    }
    Ok(())
}

fn cmd_demo(output: &Path, date: Option<NaiveDate>) -> Result<()> {
    let day = date.unwrap_or_else(|| chrono::Local::now().date_naive());
    let records = glyco_core::demo::synthetic_day(day);

    let mut sink = JsonlSink::new(output);
    sink.append_all(&records)?;

    println!("✓ Wrote {} records for {}", records.len(), day);
    println!("  Timeline: {}", output.display());
    Ok(())
}

fn display_run(output: &RunOutput) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {}", output.label);
    println!("╰─────────────────────────────────────────╯");
    if let (Some(start), Some(end)) = (output.start, output.end) {
        println!("  {} → {}", start, end);
    }
    println!();

    println!("  Dosing episodes: {}", output.verdicts.len());
    for verdict in &output.verdicts {
        let suggestion = match (verdict.suggested_ratio, verdict.suggested_sensitivity) {
            (Some(ratio), _) => format!("ratio {:.1} → {:.1} g/u", verdict.ratio_used, ratio),
            (None, Some(sensitivity)) => format!(
                "sensitivity {:.0} → {:.0} mg/dL/u",
                verdict.sensitivity_used, sensitivity
            ),
            (None, None) => "no suggestion".to_string(),
        };
        println!(
            "  → {} {:<9} {:<10} {:+.0} mg/dL  {}  {}{}",
            verdict.opened_at.format("%H:%M"),
            verdict.meal_period.to_string(),
            verdict.kind.to_string(),
            verdict.final_delta,
            suggestion,
            verdict.classification,
            if verdict.discrepancy_flagged { "  ⚠" } else { "" }
        );
    }
    if output.unfinished_episodes > 0 {
        println!("  ({} episode still open at window end)", output.unfinished_episodes);
    }
    println!();

    println!("  Basal study: {}", output.segments.len());
    for segment in &output.segments {
        println!(
            "  → {}–{} {:+.0} mg/dL  profile {:.2} → {:.2} u/h{}",
            segment.start.format("%H:%M"),
            segment.end.format("%H:%M"),
            segment.glycemia_delta,
            segment.profile_basal,
            segment.recommended_basal,
            if segment.last { " (window end)" } else { "" }
        );
    }

    for note in &output.suspensions {
        println!(
            "  ⏸ {}–{} suspended, {:.2}u avoided",
            note.suspended_at.format("%H:%M"),
            note.resumed_at.format("%H:%M"),
            note.insulin_avoided
        );
    }
    println!();

    if !output.daily_carbs.is_empty() {
        println!("  Carbs by period:");
        for carbs in &output.daily_carbs {
            println!(
                "  → {} {:<9} {:>4.0}g ({:.0}%)",
                carbs.day,
                carbs.period.to_string(),
                carbs.grams,
                carbs.share
            );
        }
        for change in &output.ratio_changes {
            match change.previous {
                Some(previous) => println!(
                    "  ✎ {} {} ratio {:.1} → {:.1} g/u",
                    change.at.format("%H:%M"),
                    change.period,
                    previous,
                    change.ratio
                ),
                None => println!(
                    "  ✎ {} {} ratio {:.1} g/u",
                    change.at.format("%H:%M"),
                    change.period,
                    change.ratio
                ),
            }
        }
        println!();
    }

    println!("  Range crossings: {}", output.range_crossings.len());
    for crossing in &output.range_crossings {
        println!(
            "  → {} {} ({:.0} mg/dL)",
            crossing.at.format("%H:%M"),
            crossing.crossing,
            crossing.limit
        );
    }
    println!();

    if !output.audits.is_empty() {
        println!("  Bolus audit:");
        for audit in &output.audits {
            println!(
                "  → {} {:.2}u computed for {:.2}u injected ({:+.2}u)",
                audit.at.format("%H:%M"),
                audit.computed,
                audit.injected,
                audit.difference
            );
        }
        println!();
    }
}
