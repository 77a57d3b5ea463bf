//! Top-level flows other than compile: `generate`, `merge` and `clean`.
//!
//! Each flow takes a [`PluginRegistry`] so callers can seed it with built-in
//! plugins; everything else is resolved from the config's search paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use river_plugin::{
    Capability, GenArgs, GeneratorPlugin, HookName, MergeDbArgs, PostGenArgs, PreGenArgs, TestList,
};
use tracing::{info, warn, Instrument};

use crate::config::Config;
use crate::dispatch::{args_for, DispatchGroup, DispatchMode};
use crate::error::{Result, RiverError};
use crate::obs::{emit_stage_finished, emit_stage_started};
use crate::registry::PluginRegistry;
use crate::report::ReportAggregator;
use crate::telemetry::RunContext;

/// File name of the persisted test list inside the work directory.
pub const TEST_LIST_FILE: &str = "test_list.yaml";

/// `<work_dir>/test_list.yaml`
pub fn test_list_path(config: &Config) -> PathBuf {
    config.work_dir().join(TEST_LIST_FILE)
}

pub(crate) fn dispatch_mode(config: &Config) -> DispatchMode {
    if config.parallel_dispatch() {
        DispatchMode::Concurrent
    } else {
        DispatchMode::Sequential
    }
}

/// Result of a `generate` flow.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateSummary {
    pub test_list: PathBuf,
    pub tests: usize,
    /// Test names dropped because an earlier generator already produced them.
    pub duplicates: Vec<String>,
}

/// Resolve the configured generators and produce `<work_dir>/test_list.yaml`.
pub async fn generate(
    ctx: &RunContext,
    config: &Config,
    registry: PluginRegistry,
) -> Result<GenerateSummary> {
    generate_in_span(config, registry)
        .instrument(ctx.span().clone())
        .await
}

async fn generate_in_span(config: &Config, mut registry: PluginRegistry) -> Result<GenerateSummary> {
    info!(
        work_dir = %config.work_dir().display(),
        isa = %config.isa(),
        generators = ?config.generators(),
        "generation mode"
    );
    if config.generators().is_empty() {
        return Err(RiverError::NoTestSource);
    }
    registry
        .resolve_all(config, &[Capability::Generator])
        .await?;
    emit_stage_started("generate");
    let summary = run_generators(config, registry.generators(), dispatch_mode(config)).await?;
    emit_stage_finished("generate", "success");
    Ok(summary)
}

/// Drive `pre_gen`, `gen` and `post_gen` across the generator group and
/// persist the merged test list.
pub(crate) async fn run_generators(
    config: &Config,
    group: &DispatchGroup<dyn GeneratorPlugin>,
    mode: DispatchMode,
) -> Result<GenerateSummary> {
    let suite = config.search_path(Capability::Generator)?.to_path_buf();
    let work_dir = config.work_dir();

    let mut pre = BTreeMap::new();
    let mut generate_args = BTreeMap::new();
    let mut post = BTreeMap::new();
    for name in group.names() {
        let spec_config = config.plugin_config(name)?;
        info!(
            plugin = %name,
            jobs = spec_config.get("jobs").unwrap_or("-"),
            count = spec_config.get("count").unwrap_or("-"),
            seed = spec_config.get("seed").unwrap_or("-"),
            "generator configured"
        );
        let plugin_dir = suite.join(format!("{name}_plugin"));
        pre.insert(
            name.to_string(),
            PreGenArgs {
                spec_config,
                output_dir: work_dir.join(name),
            },
        );
        generate_args.insert(
            name.to_string(),
            GenArgs {
                gen_config: plugin_dir.join(format!("{name}_gen_config.yaml")),
                module_dir: suite.clone(),
                output_dir: work_dir.to_path_buf(),
            },
        );
        post.insert(
            name.to_string(),
            PostGenArgs {
                output_dir: work_dir.join(name),
                regress_list: work_dir.join(name).join("regresslist.yaml"),
            },
        );
    }

    group
        .dispatch(HookName::PreGen, mode, |name, plugin| {
            let args = args_for(&pre, name, HookName::PreGen);
            async move { plugin.pre_gen(&args?).await }
        })
        .await?;

    let generated = group
        .dispatch(HookName::Gen, mode, |name, plugin| {
            let args = args_for(&generate_args, name, HookName::Gen);
            async move { plugin.generate(&args?).await }
        })
        .await?;

    group
        .dispatch(HookName::PostGen, mode, |name, plugin| {
            let args = args_for(&post, name, HookName::PostGen);
            async move { plugin.post_gen(&args?).await }
        })
        .await?;

    let mut merged = TestList::new();
    let mut duplicates = Vec::new();
    for output in generated {
        let skipped = merged.merge(output.value);
        for name in &skipped {
            warn!(plugin = %output.plugin, test = %name, "duplicate test name, keeping the first");
        }
        duplicates.extend(skipped);
    }

    let path = test_list_path(config);
    merged.save(&path)?;
    info!(path = %path.display(), tests = merged.len(), "test list written");

    Ok(GenerateSummary {
        test_list: path,
        tests: merged.len(),
        duplicates,
    })
}

/// Merge coverage databases through every DUT plugin, then link the merged
/// report from the latest run report.
///
/// Returns the report that received the link, if any.
pub async fn merge(
    ctx: &RunContext,
    config: &Config,
    registry: PluginRegistry,
    db_files: Vec<PathBuf>,
    output_db: &str,
) -> Result<Option<PathBuf>> {
    merge_in_span(config, registry, db_files, output_db)
        .instrument(ctx.span().clone())
        .await
}

async fn merge_in_span(
    config: &Config,
    mut registry: PluginRegistry,
    db_files: Vec<PathBuf>,
    output_db: &str,
) -> Result<Option<PathBuf>> {
    info!(
        work_dir = %config.work_dir().display(),
        duts = ?config.duts(),
        db_files = ?db_files,
        "merge mode"
    );
    registry.resolve_all(config, &[Capability::Dut]).await?;
    if registry.duts().is_empty() {
        warn!("no DUT plugins configured, nothing to merge");
        return Ok(None);
    }

    emit_stage_started("merge");
    let args = MergeDbArgs {
        db_files,
        config: config.to_json(),
        output_db: output_db.to_string(),
    };
    registry
        .duts()
        .dispatch(HookName::MergeDb, dispatch_mode(config), |_, plugin| {
            let args = args.clone();
            async move { plugin.merge_db(&args).await }
        })
        .await?;
    emit_stage_finished("merge", "success");

    match ReportAggregator::new(config.work_dir()).append_merge_link(output_db, Local::now()) {
        Ok(report) => Ok(Some(report)),
        Err(e) => {
            warn!(error = %e, "could not link merge report");
            Ok(None)
        }
    }
}

/// Remove the work directory. Returns `false` if there was nothing to remove.
pub async fn clean(ctx: &RunContext, config: &Config) -> Result<bool> {
    remove_work_dir(config.work_dir())
        .instrument(ctx.span().clone())
        .await
}

async fn remove_work_dir(work_dir: &Path) -> Result<bool> {
    if !work_dir.exists() {
        info!(work_dir = %work_dir.display(), "work directory does not exist, nothing to delete");
        return Ok(false);
    }
    tokio::fs::remove_dir_all(work_dir).await?;
    info!(work_dir = %work_dir.display(), "work directory deleted");
    Ok(true)
}
