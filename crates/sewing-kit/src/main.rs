//! sewing-kit - command line entry point.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Args, Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use serde::Serialize;
use sewing_core::{
    inclusion::parse_patterns, Config, GroupKind, InteractiveMode, LogLevel, Manifest,
    StepInclusion,
};
use sewing_kit::{
    plan_from_manifest, ui, Orchestrator, ProgressView, RenderIntervals, StepQueue, StepTracker,
    Ui,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Run hierarchical build steps.
#[derive(Parser)]
#[command(name = "sewing-kit")]
#[command(about = "Hierarchical build step runner")]
#[command(version)]
struct Cli {
    /// Workspace root (default: current directory)
    #[arg(long, global = true, env = "SEWING_KIT_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the steps declared in the manifest
    Run {
        #[command(flatten)]
        source: ManifestArgs,

        /// Number of steps that may run at once (0 = one per CPU)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Display level: errors, warnings, info, or debug
        #[arg(long, value_parser = parse_log_level)]
        log_level: Option<LogLevel>,

        /// Live progress view: auto, always, or never
        #[arg(long, value_parser = parse_interactive)]
        interactive: Option<InteractiveMode>,

        /// Disable ANSI styling
        #[arg(long)]
        no_color: bool,

        #[command(flatten)]
        inclusion: InclusionArgs,
    },

    /// List declared steps
    List {
        #[command(flatten)]
        source: ManifestArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ManifestArgs {
    /// Manifest path (overrides the config `manifest` key)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Config file path (overrides .sewing-kit/config)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct InclusionArgs {
    /// Skip pre steps matching these patterns
    #[arg(long = "skip-pre-step", value_name = "PATTERNS")]
    skip_pre: Vec<String>,

    /// Run only pre steps matching these patterns
    #[arg(long = "isolate-pre-step", value_name = "PATTERNS")]
    isolate_pre: Vec<String>,

    /// Skip steps matching these patterns
    #[arg(long = "skip-step", value_name = "PATTERNS")]
    skip: Vec<String>,

    /// Run only steps matching these patterns
    #[arg(long = "isolate-step", value_name = "PATTERNS")]
    isolate: Vec<String>,

    /// Skip post steps matching these patterns
    #[arg(long = "skip-post-step", value_name = "PATTERNS")]
    skip_post: Vec<String>,

    /// Run only post steps matching these patterns
    #[arg(long = "isolate-post-step", value_name = "PATTERNS")]
    isolate_post: Vec<String>,
}

impl InclusionArgs {
    fn to_inclusion(&self) -> StepInclusion {
        StepInclusion {
            skip_pre_steps: parse_patterns(&self.skip_pre),
            isolate_pre_steps: parse_patterns(&self.isolate_pre),
            skip_steps: parse_patterns(&self.skip),
            isolate_steps: parse_patterns(&self.isolate),
            skip_post_steps: parse_patterns(&self.skip_post),
            isolate_post_steps: parse_patterns(&self.isolate_post),
        }
    }
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::parse(s).ok_or_else(|| {
        format!("invalid log level '{s}', expected: errors, warnings, info, debug")
    })
}

fn parse_interactive(s: &str) -> Result<InteractiveMode, String> {
    match s.to_lowercase().as_str() {
        "auto" => Ok(InteractiveMode::Auto),
        "always" => Ok(InteractiveMode::Always),
        "never" => Ok(InteractiveMode::Never),
        _ => Err(format!(
            "invalid interactive mode '{s}', expected: auto, always, never"
        )),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run_cli(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().wrap_err("failed to read current directory")?,
    };

    match cli.command {
        Command::Run {
            source,
            concurrency,
            log_level,
            interactive,
            no_color,
            inclusion,
        } => {
            let mut config = load_config(&root, &source)?;
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if let Some(log_level) = log_level {
                config.log_level = log_level;
            }
            if let Some(interactive) = interactive {
                config.interactive = interactive;
            }
            if no_color || std::env::var_os("NO_COLOR").is_some() {
                config.color = false;
            }
            config.inclusion.override_with(&inclusion.to_inclusion());
            run_steps(&config)
        }
        Command::List { source, json } => {
            let config = load_config(&root, &source)?;
            list_steps(&config.manifest, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(root: &Path, source: &ManifestArgs) -> Result<Config> {
    if let Some(path) = &source.config {
        if !path.exists() {
            return Err(eyre!("config override not found: {}", path.display()));
        }
    }
    let mut config = Config::load(root, source.config.as_deref())
        .wrap_err_with(|| format!("failed to load config for {}", root.display()))?;
    if let Some(manifest) = &source.manifest {
        config.manifest = root.join(manifest);
    }
    Ok(config)
}

fn run_steps(config: &Config) -> Result<ExitCode> {
    let manifest = Manifest::from_file(&config.manifest)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create tokio runtime")?;

    let outcome = runtime.block_on(async {
        let run_id = uuid::Uuid::now_v7();
        let width = config.effective_concurrency();
        info!(%run_id, manifest = %config.manifest.display(), width, "starting run");

        let interactive = config.interactive.resolve(ui::is_interactive_terminal());
        let ui = Ui::stdio(config.log_level, config.color);
        let view = Arc::new(ProgressView::new(Arc::new(ui), interactive));
        let tracker = Arc::new(StepTracker::new());
        let options = plan_from_manifest(&manifest, &tracker, config.inclusion.clone());

        let orchestrator = Orchestrator::new(view, Arc::new(StepQueue::new(width)), tracker)
            .with_intervals(RenderIntervals {
                redraw: Duration::from_millis(config.redraw_interval_ms.max(1)),
                spinner: Duration::from_millis(config.spinner_interval_ms.max(1)),
            });
        let outcome = orchestrator.run(options).await;
        info!(%run_id, phase = outcome.phase.as_str(), "run ended");
        outcome
    });

    Ok(ExitCode::from(outcome.exit_code()))
}

#[derive(Serialize)]
struct ListedStepJson<'a> {
    group: GroupKind,
    depth: usize,
    id: &'a str,
    label: Option<&'a str>,
    project: Option<&'a str>,
    command: Option<&'a str>,
}

fn list_steps(manifest_path: &Path, json: bool) -> Result<()> {
    let manifest = Manifest::from_file(manifest_path)?;
    let listed = manifest.all_steps();

    if json {
        let rows: Vec<ListedStepJson<'_>> = listed
            .iter()
            .map(|entry| ListedStepJson {
                group: entry.group,
                depth: entry.depth,
                id: &entry.step.id,
                label: entry.step.label.as_deref(),
                project: entry.step.project.as_deref(),
                command: entry.step.run.as_deref(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if listed.is_empty() {
        println!("no steps declared in {}", manifest_path.display());
        return Ok(());
    }

    println!("{:<6} {:<40} LABEL", "GROUP", "ID");
    for entry in &listed {
        let id = format!("{}{}", "  ".repeat(entry.depth), entry.step.id);
        println!(
            "{:<6} {:<40} {}",
            entry.group.as_str(),
            id,
            entry.step.label.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
