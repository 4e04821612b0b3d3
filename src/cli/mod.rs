//! CrowdBus ML CLI Module
//!
//! Command-line interface for training, prediction and artifact inspection.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::inference::{InferenceConfig, InferenceService, ModelHandle, ValidationMode};
use crate::persistence::ArtifactStore;
use crate::schema::{Presence, RawRecord, Task};
use crate::training::{Trainer, ValidationMetrics};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "crowdbus-ml")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Arrival confirmation and ETA models for crowdsourced bus tracking")]
#[command(long_about = None)]
pub struct Cli {
    /// JSON pipeline config; CROWDBUS_* variables override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Artifact directory, overrides the config
    #[arg(long, global = true)]
    pub artifacts: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search every model family and persist the best one
    Train {
        #[arg(short, long, value_enum)]
        task: Task,

        /// Dataset CSV with a header row and the task's target column
        #[arg(short, long)]
        data: PathBuf,

        /// Small grids for a fast smoke run
        #[arg(long)]
        quick: bool,
    },

    /// Predict one record, printed as JSON
    Predict {
        #[arg(short, long, value_enum)]
        task: Task,

        /// JSON object file, or `-` for stdin
        #[arg(short, long)]
        input: String,

        /// How the record is checked before prediction
        #[arg(long, value_enum, default_value = "trusted")]
        validation: ValidationMode,
    },

    /// Show the metadata and feature order of a persisted model
    Inspect {
        #[arg(short, long, value_enum)]
        task: Task,
    },

    /// Print the field table of a task
    Schema {
        #[arg(short, long, value_enum)]
        task: Task,
    },
}

/// Pipeline config from file, environment and flags, in that order
pub fn resolve_config(config: Option<&Path>, artifacts: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let base = match config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let mut resolved = base.apply_env().context("applying CROWDBUS_* overrides")?;
    if let Some(dir) = artifacts {
        resolved.artifact_dir = dir.to_path_buf();
    }
    Ok(resolved)
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(config: PipelineConfig, task: Task, data: &Path, quick: bool) -> anyhow::Result<()> {
    section(&format!("Train {}", task));

    step_run(&format!("Searching model families{}", if quick { " (quick)" } else { "" }));
    let start = Instant::now();
    let report = Trainer::new(config)
        .with_quick(quick)
        .train_csv(task, data)
        .with_context(|| format!("training {} on {}", task, data.display()))?;
    step_done(&format!("{:.1}s", start.elapsed().as_secs_f64()));

    println!();
    line_box_top();
    line_box(&kv("Selected  ", &report.model_family_name.cyan().to_string()));
    match &report.validation_metrics {
        ValidationMetrics::Classification(m) => line_box(&kv("Accuracy  ", &format!("{:.4}", m.accuracy))),
        ValidationMetrics::Regression(m) => {
            line_box(&kv("RMSE      ", &format!("{:.2}s ({:.2} min)", m.rmse, m.rmse_minutes)));
            line_box(&kv("R²        ", &format!("{:.4}", m.r2)));
        }
    }
    line_box(&kv("Rows      ", &format!(
        "{} train, {} validation, {} rejected",
        report.training_samples, report.validation_samples, report.validation_errors
    )));
    line_box_sep();
    line_box(&kv("Model     ", &report.artifact_path.display().to_string()));
    line_box(&kv("Features  ", &report.feature_order_path.display().to_string()));
    line_box_bottom();

    println!();
    println!("{}", report.generate_report());
    Ok(())
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {}", input))
    }
}

pub fn cmd_predict(config: PipelineConfig, task: Task, input: &str, validation: ValidationMode) -> anyhow::Result<()> {
    let store = ArtifactStore::new(&config.artifact_dir);
    let handle = ModelHandle::load(&store, task)
        .with_context(|| format!("loading {} model from {}", task, store.root().display()))?;
    let service = InferenceService::new(InferenceConfig::from_pipeline(&config).with_validation(validation))
        .with_handle(handle);

    let raw = RawRecord::from_json_str(&read_input(input)?).context("parsing input record")?;
    let prediction = service.predict(&raw, task)?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

pub fn cmd_inspect(config: PipelineConfig, task: Task) -> anyhow::Result<()> {
    let store = ArtifactStore::new(&config.artifact_dir);
    section(&format!("Inspect {}", task));

    if !store.exists(task) {
        println!("  {}", format!("No {} artifacts in {}", task, store.root().display()).yellow());
        println!();
        return Ok(());
    }
    let metadata = store.describe(task)?;
    let order = store.load_feature_order(task)?;

    println!();
    line_box_top();
    line_box(&kv("Family    ", &metadata.family.cyan().to_string()));
    line_box(&kv("Artifact  ", &metadata.artifact_id));
    line_box(&kv("Trained   ", &metadata.trained_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()));
    line_box(&kv("Schema    ", &format!("v{}", metadata.schema_version)));
    line_box(&kv("Features  ", &metadata.feature_count.to_string()));
    if let Some(metrics) = &metadata.metrics {
        line_box(&kv("Headline  ", &format!("{:.4}", metrics.headline())));
    }
    if order.artifact_id != metadata.artifact_id {
        line_box_sep();
        line_box(&"feature order belongs to another run".red().to_string());
    }
    line_box_bottom();

    section("Feature order");
    for (i, name) in order.features.iter().enumerate() {
        println!("  {} {}", dim(&format!("{:>3}", i)), name);
    }
    println!();
    Ok(())
}

pub fn cmd_schema(task: Task) -> anyhow::Result<()> {
    section(&format!("{} schema", task));
    println!(
        "  {}",
        muted(&format!("{:<34} {:<6} {:<18} {}", "field", "kind", "range", "absent"))
    );
    for field in task.fields() {
        let presence = match field.presence {
            Presence::Required => "required".to_string(),
            Presence::Default(v) => format!("default {}", v),
            Presence::Nullable => "null".to_string(),
        };
        let name = if task.metadata_fields().contains(&field.name) {
            dim(field.name).to_string()
        } else {
            field.name.to_string()
        };
        let pad = 34usize.saturating_sub(field.name.len());
        println!(
            "  {}{} {:<6} {:<18} {}",
            name,
            " ".repeat(pad),
            format!("{:?}", field.kind),
            field.range_label(),
            presence
        );
    }
    println!();
    println!(
        "  {}",
        dim(&format!("{} trainable of {} declared", task.trainable_fields().len(), task.fields().len()))
    );
    println!();
    Ok(())
}

/// Dispatch a parsed command line
pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Schema { task } => cmd_schema(task),
        command => {
            let config = resolve_config(cli.config.as_deref(), cli.artifacts.as_deref())?;
            match command {
                Commands::Train { task, data, quick } => cmd_train(config, task, &data, quick),
                Commands::Predict { task, input, validation } => cmd_predict(config, task, &input, validation),
                Commands::Inspect { task } => cmd_inspect(config, task),
                Commands::Schema { task } => cmd_schema(task),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train() {
        let cli = Cli::parse_from(["crowdbus-ml", "train", "--task", "eta", "--data", "rows.csv", "--quick"]);
        match cli.command {
            Commands::Train { task, data, quick } => {
                assert_eq!(task, Task::Eta);
                assert_eq!(data, PathBuf::from("rows.csv"));
                assert!(quick);
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_parse_predict_defaults_to_trusted() {
        let cli = Cli::parse_from(["crowdbus-ml", "--artifacts", "m", "predict", "-t", "arrival", "-i", "-"]);
        assert_eq!(cli.artifacts, Some(PathBuf::from("m")));
        match cli.command {
            Commands::Predict { validation, input, .. } => {
                assert_eq!(validation, ValidationMode::Trusted);
                assert_eq!(input, "-");
            }
            _ => panic!("expected predict"),
        }
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1mbold\x1b[0m"), "bold");
    }
}
