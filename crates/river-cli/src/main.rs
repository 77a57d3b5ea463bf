//! RiVer Core - verification flow CLI
//!
//! The `river_core` command drives generator, DUT and reference plugins.
//!
//! ## Commands
//!
//! - `generate`: produce the test list from the configured generators
//! - `compile`: build, run and compare the DUT and reference models
//! - `merge`: merge coverage databases through the DUT plugins
//! - `clean`: delete the work directory

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use river_core::{
    clean, generate, merge, parse_level, CompileOptions, CompileSummary, Config, PluginRegistry,
    RunContext, StageController, StageSelector,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "river_core")]
#[command(author = "RiVer Core Developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "RiVer Core verification flow", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, default_value = "river_core.toml")]
    config: PathBuf,

    /// Log level: error, warn, info, debug or trace
    #[arg(short, long, global = true, default_value = "info", value_parser = verbosity)]
    verbosity: Level,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the generators and write <work_dir>/test_list.yaml
    Generate,

    /// Run the DUT and reference models and compare their dumps
    Compile {
        /// Use this test list instead of running the generators
        #[arg(short, long)]
        test_list: Option<PathBuf>,

        /// Last DUT stage to run: init, build, run or auto
        #[arg(long, default_value = "auto")]
        dut_stage: StageSelector,

        /// Last reference stage to run: init, build, run or auto
        #[arg(long, default_value = "auto")]
        ref_stage: StageSelector,

        /// Compare DUT and reference dumps
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        compare: bool,

        /// Enable coverage (requires a [coverage] table)
        #[arg(long)]
        coverage: bool,
    },

    /// Merge coverage databases
    Merge {
        /// Databases to merge
        #[arg(long, required = true, num_args = 1..)]
        db_files: Vec<PathBuf>,

        /// Name of the merged database
        #[arg(long)]
        output_db: String,
    },

    /// Delete the work directory
    Clean {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

fn verbosity(name: &str) -> std::result::Result<Level, String> {
    parse_level(name).ok_or_else(|| format!("unknown verbosity `{name}`"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RunContext::new(cli.verbosity, cli.json);
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Generate => cmd_generate(&ctx, &config).await,
        Commands::Compile {
            test_list,
            dut_stage,
            ref_stage,
            compare,
            coverage,
        } => {
            let options = CompileOptions {
                test_list,
                dut_stage,
                ref_stage,
                compare,
            };
            cmd_compile(ctx, config, options, coverage).await
        }
        Commands::Merge {
            db_files,
            output_db,
        } => cmd_merge(&ctx, &config, db_files, &output_db).await,
        Commands::Clean { yes } => cmd_clean(&ctx, &config, yes).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load configuration {:?}", path))
}

async fn cmd_generate(ctx: &RunContext, config: &Config) -> Result<()> {
    let summary = generate(ctx, config, PluginRegistry::new())
        .await
        .context("Generation failed")?;

    println!("Test list: {}", summary.test_list.display());
    println!("  tests:      {}", summary.tests);
    if !summary.duplicates.is_empty() {
        println!("  duplicates: {}", summary.duplicates.join(", "));
    }
    Ok(())
}

async fn cmd_compile(
    ctx: RunContext,
    config: Config,
    options: CompileOptions,
    coverage: bool,
) -> Result<()> {
    let config = config
        .with_coverage(coverage)
        .context("Cannot enable coverage")?;

    let summary = StageController::new(ctx, config, PluginRegistry::new())
        .compile(options)
        .await;
    print_summary(&summary);

    let summary = summary.into_result().context("Compile aborted")?;
    info!(run_id = %summary.run_id, state = %summary.state(), "compile finished");
    Ok(())
}

fn print_summary(summary: &CompileSummary) {
    let trail: Vec<&str> = summary.trail.iter().map(|s| s.name()).collect();
    println!("Run {}", summary.run_id);
    println!("  stages: {}", trail.join(" -> "));
    if let Some(counts) = &summary.counts {
        println!(
            "  tests:  {} total, {} passed, {} failed, {} unavailable",
            counts.total, counts.passed, counts.failed, counts.unavailable
        );
    }
    if let Some(report) = &summary.report {
        println!("  report: {}", report.display());
    }
    for reason in &summary.incomplete {
        println!("  incomplete: {reason}");
    }
}

async fn cmd_merge(
    ctx: &RunContext,
    config: &Config,
    db_files: Vec<PathBuf>,
    output_db: &str,
) -> Result<()> {
    let linked = merge(ctx, config, PluginRegistry::new(), db_files, output_db)
        .await
        .context("Merge failed")?;

    println!("Merged database: {output_db}");
    match linked {
        Some(report) => println!("Linked from {}", report.display()),
        None => println!("No run report to link from"),
    }
    Ok(())
}

async fn cmd_clean(ctx: &RunContext, config: &Config, yes: bool) -> Result<()> {
    let work_dir = config.work_dir();
    if !yes {
        anyhow::bail!("Refusing to delete {:?} without --yes", work_dir);
    }
    if clean(ctx, config).await.context("Clean failed")? {
        println!("Deleted {}", work_dir.display());
    } else {
        println!("Nothing to delete at {}", work_dir.display());
    }
    Ok(())
}
