//! Compile run state machine.
//!
//! ```text
//! NotStarted → GeneratorDone | GeneratorSkipped
//!            → DutDone | DutSkipped
//!            → RefDone | RefSkipped
//!            → Compared | ComparisonSkipped
//!            → Reported
//! ```
//!
//! Any fatal stage outcome moves the run to `Aborted` instead. Every plugin
//! an enabled stage needs is resolved before the first hook is dispatched, so
//! a missing plugin aborts the run with the work directory untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use river_plugin::{
    Capability, HookName, InitArgs, PostRunArgs, ResultCounts, RunArgs, RunOutput,
    SimulatorPlugin, TestList,
};
use tracing::{error, info, warn, Instrument};

use crate::compare::ComparisonEngine;
use crate::config::Config;
use crate::dispatch::{args_for, DispatchGroup, DispatchMode};
use crate::error::{Result, RiverError};
use crate::flows::{dispatch_mode, run_generators, test_list_path};
use crate::logs::latest_generator_log;
use crate::obs::{emit_incomplete, emit_stage_finished, emit_stage_started};
use crate::registry::PluginRegistry;
use crate::report::{LogSources, ReportAggregator};
use crate::spec::RunSpec;
use crate::stage::{resolve_stages, RunState, SidePlan, Stage, StageOutcome, StageSelector};
use crate::telemetry::RunContext;

/// Inputs of one compile run.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Use this test list instead of running the generators.
    pub test_list: Option<PathBuf>,
    pub dut_stage: StageSelector,
    pub ref_stage: StageSelector,
    pub compare: bool,
}

/// What a compile run did.
#[derive(Debug)]
pub struct CompileSummary {
    pub run_id: String,
    /// Every state the run passed through, starting at `NotStarted`.
    pub trail: Vec<RunState>,
    pub counts: Option<ResultCounts>,
    pub report: Option<PathBuf>,
    /// Reasons the run finished degraded.
    pub incomplete: Vec<String>,
    /// Set when the run aborted.
    pub error: Option<RiverError>,
}

impl CompileSummary {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            trail: vec![RunState::NotStarted],
            counts: None,
            report: None,
            incomplete: Vec::new(),
            error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.trail.last().copied().unwrap_or(RunState::NotStarted)
    }

    pub fn is_incomplete(&self) -> bool {
        !self.incomplete.is_empty()
    }

    /// `Err` if the run aborted.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    fn advance(&mut self, state: RunState) {
        info!(event = "run.state", state = %state);
        self.trail.push(state);
    }

    fn degrade(&mut self, reason: String) {
        emit_incomplete(&reason);
        self.incomplete.push(reason);
    }

    /// Record a stage's outcome; a fatal one is handed back.
    fn settle(&mut self, stage: &str, outcome: StageOutcome, done: RunState) -> Result<()> {
        emit_stage_finished(stage, outcome.label());
        match outcome {
            StageOutcome::Success => {}
            StageOutcome::Incomplete(reason) => self.degrade(reason),
            StageOutcome::Fatal(e) => return Err(e),
        }
        self.advance(done);
        Ok(())
    }

    fn abort(&mut self, err: RiverError) {
        error!(event = "run.aborted", error = %err);
        self.trail.push(RunState::Aborted);
        self.error = Some(err);
    }
}

/// One side's simulator run.
#[derive(Debug, Default)]
struct SideRun {
    reached_run: bool,
    logs: Vec<PathBuf>,
    problems: Vec<String>,
}

/// Sequences generator, DUT, reference, comparison and reporting.
pub struct StageController {
    ctx: RunContext,
    config: Config,
    registry: PluginRegistry,
    mode: DispatchMode,
}

impl StageController {
    /// `registry` may carry built-in plugins; the rest resolve from the config's search paths.
    pub fn new(ctx: RunContext, config: Config, registry: PluginRegistry) -> Self {
        let mode = dispatch_mode(&config);
        Self {
            ctx,
            config,
            registry,
            mode,
        }
    }

    pub async fn compile(mut self, options: CompileOptions) -> CompileSummary {
        let span = self.ctx.span().clone();
        let mut summary = CompileSummary::new(self.ctx.run_id());
        if let Err(e) = self.drive(&options, &mut summary).instrument(span).await {
            summary.abort(e);
        }
        summary
    }

    async fn drive(&mut self, options: &CompileOptions, summary: &mut CompileSummary) -> Result<()> {
        info!(
            work_dir = %self.config.work_dir().display(),
            isa = %self.config.isa(),
            generators = ?self.config.generators(),
            duts = ?self.config.duts(),
            references = ?self.config.references(),
            coverage = self.config.coverage(),
            "compile mode"
        );

        let plan = resolve_stages(options.dut_stage, options.ref_stage, options.compare);
        if let Some(reason) = plan.incomplete.clone() {
            summary.degrade(reason);
        }
        let dut_plan = effective(plan.dut, Capability::Dut, self.config.duts());
        let ref_plan = effective(plan.reference, Capability::Reference, self.config.references());

        // Everything that can fail before touching the work directory.
        let test_list = self.prepare(options, dut_plan, ref_plan).await?;

        // Generator
        if options.test_list.is_some() {
            info!(test_list = %test_list.display(), "using supplied test list, generator skipped");
            summary.advance(RunState::GeneratorSkipped);
        } else {
            emit_stage_started("generate");
            let outcome: StageOutcome = run_generators(&self.config, self.registry.generators(), self.mode)
                .await
                .map(|_| ())
                .into();
            summary.settle("generate", outcome, RunState::GeneratorDone)?;
        }

        // DUT
        let dut = match dut_plan {
            SidePlan::Disabled => {
                summary.advance(RunState::DutSkipped);
                SideRun::default()
            }
            plan => {
                let (outcome, side) = self
                    .simulate(self.registry.duts(), plan, &test_list)
                    .await;
                summary.settle("dut", outcome, RunState::DutDone)?;
                side
            }
        };

        // Reference
        let reference = match ref_plan {
            SidePlan::Disabled => {
                summary.advance(RunState::RefSkipped);
                SideRun::default()
            }
            plan => {
                let (outcome, side) = self
                    .simulate(self.registry.references(), plan, &test_list)
                    .await;
                summary.settle("reference", outcome, RunState::RefDone)?;
                side
            }
        };

        // Compare
        if !options.compare {
            info!("comparison not requested");
            self.clear_results(&test_list)?;
            summary.advance(RunState::ComparisonSkipped);
        } else if !(dut.reached_run && reference.reached_run) {
            warn!(
                dut_ran = dut.reached_run,
                reference_ran = reference.reached_run,
                "comparison needs both sides to run, skipping"
            );
            self.clear_results(&test_list)?;
            summary.degrade("comparison skipped: dut and reference did not both run".to_string());
            summary.advance(RunState::ComparisonSkipped);
        } else {
            emit_stage_started("compare");
            let outcome = self.compare(&test_list).await;
            summary.settle("compare", outcome, RunState::Compared)?;
        }

        // post_run goes to every side that ran, with the final results
        if dut.reached_run || reference.reached_run {
            let args = PostRunArgs {
                test_list: TestList::load(&test_list)?,
                config: self.config.to_json(),
            };
            if dut.reached_run {
                self.post_run(self.registry.duts(), &args).await?;
            }
            if reference.reached_run {
                self.post_run(self.registry.references(), &args).await?;
            }
        }

        // Report
        emit_stage_started("report");
        let logs = LogSources {
            generator: self
                .config
                .generators()
                .iter()
                .filter_map(|g| latest_generator_log(self.config.work_dir(), g))
                .collect(),
            dut: dut.logs,
            reference: reference.logs,
        };
        let outcome = self.report(&test_list, &logs, summary);
        summary.settle("report", outcome, RunState::Reported)?;
        Ok(())
    }

    /// Validate the test source and resolve every plugin the run needs.
    async fn prepare(
        &mut self,
        options: &CompileOptions,
        dut_plan: SidePlan,
        ref_plan: SidePlan,
    ) -> Result<PathBuf> {
        let mut capabilities = Vec::new();
        let test_list = match &options.test_list {
            Some(path) if path.is_file() => path.clone(),
            Some(path) => return Err(RiverError::TestListMissing(path.clone())),
            None if self.config.generators().is_empty() => return Err(RiverError::NoTestSource),
            None => {
                capabilities.push(Capability::Generator);
                test_list_path(&self.config)
            }
        };
        if dut_plan.is_enabled() {
            capabilities.push(Capability::Dut);
        }
        if ref_plan.is_enabled() {
            capabilities.push(Capability::Reference);
        }

        self.registry.resolve_all(&self.config, &capabilities).await?;
        Ok(test_list)
    }

    /// Run one side up to its planned stage.
    async fn simulate<P>(
        &self,
        group: &DispatchGroup<P>,
        plan: SidePlan,
        test_list: &Path,
    ) -> (StageOutcome, SideRun)
    where
        P: SimulatorPlugin + ?Sized,
    {
        emit_stage_started(group.capability().as_str());
        match self.simulate_stages(group, plan, test_list).await {
            Ok(side) if side.problems.is_empty() => (StageOutcome::Success, side),
            Ok(side) => (StageOutcome::Incomplete(side.problems.join("; ")), side),
            Err(e) => (StageOutcome::Fatal(e), SideRun::default()),
        }
    }

    async fn simulate_stages<P>(
        &self,
        group: &DispatchGroup<P>,
        plan: SidePlan,
        test_list: &Path,
    ) -> Result<SideRun>
    where
        P: SimulatorPlugin + ?Sized,
    {
        let capability = group.capability();
        let plugin_path = self.config.search_path(capability)?.to_path_buf();
        let mut side = SideRun::default();

        for stage in plan.stages() {
            info!(capability = %capability, stage = %stage, plugins = ?group.names(), "running stage");
            match stage {
                Stage::Init => {
                    let prepared = self.init_args(group, test_list, &plugin_path)?;
                    group
                        .dispatch(HookName::Init, self.mode, |name, plugin| {
                            let args = args_for(&prepared, name, HookName::Init);
                            async move { plugin.init(&args?).await }
                        })
                        .await?;
                }
                Stage::Build => {
                    group
                        .dispatch(HookName::Build, self.mode, |_, plugin| async move {
                            plugin.build().await
                        })
                        .await?;
                }
                Stage::Run => {
                    let args = RunArgs {
                        module_dir: plugin_path.clone(),
                    };
                    let outputs = group
                        .dispatch(HookName::Run, self.mode, |_, plugin| {
                            let args = args.clone();
                            async move { plugin.run(&args).await }
                        })
                        .await?;
                    side.reached_run = true;
                    for output in outputs {
                        match usable_log(&output.value) {
                            Ok(path) => side.logs.push(path),
                            Err(problem) => {
                                warn!(plugin = %output.plugin, "{problem}");
                                side.problems.push(format!("{}: {problem}", output.plugin));
                            }
                        }
                    }
                }
            }
        }
        Ok(side)
    }

    fn init_args<P>(
        &self,
        group: &DispatchGroup<P>,
        test_list: &Path,
        plugin_path: &Path,
    ) -> Result<BTreeMap<String, InitArgs>>
    where
        P: SimulatorPlugin + ?Sized,
    {
        let mut prepared = BTreeMap::new();
        for name in group.names() {
            let plugin_config = self.config.plugin_config(name)?;
            info!(
                plugin = %name,
                jobs = plugin_config.get("jobs").unwrap_or("-"),
                count = plugin_config.get("count").unwrap_or("-"),
                "plugin configured"
            );
            prepared.insert(
                name.to_string(),
                InitArgs {
                    plugin_config,
                    test_list: test_list.to_path_buf(),
                    work_dir: self.config.work_dir().to_path_buf(),
                    coverage_config: self.config.coverage_config().cloned(),
                    plugin_path: plugin_path.to_path_buf(),
                },
            );
        }
        Ok(prepared)
    }

    async fn compare(&self, test_list: &Path) -> StageOutcome {
        let list = match TestList::load(test_list) {
            Ok(list) => list,
            Err(e) => return StageOutcome::Fatal(e.into()),
        };
        match ComparisonEngine::new(test_list).compare(list).await {
            Ok((_, counts)) => {
                info!(
                    total = counts.total,
                    passed = counts.passed,
                    failed = counts.failed,
                    unavailable = counts.unavailable,
                    "comparison finished"
                );
                StageOutcome::Success
            }
            Err(e) => StageOutcome::Fatal(e.into()),
        }
    }

    /// Results left over from an earlier run must not be reported as this run's.
    fn clear_results(&self, test_list: &Path) -> Result<()> {
        let counts = ComparisonEngine::new(test_list).clear()?;
        info!(total = counts.total, "comparison skipped, results reset to unavailable");
        Ok(())
    }

    async fn post_run<P>(&self, group: &DispatchGroup<P>, args: &PostRunArgs) -> Result<()>
    where
        P: SimulatorPlugin + ?Sized,
    {
        group
            .dispatch(HookName::PostRun, self.mode, |_, plugin| {
                let args = args.clone();
                async move { plugin.post_run(&args).await }
            })
            .await?;
        Ok(())
    }

    /// Counts come from the test list on disk. A failed report is logged but
    /// does not fail the run.
    fn report(&self, test_list: &Path, logs: &LogSources, summary: &mut CompileSummary) -> StageOutcome {
        let results = match TestList::load(test_list) {
            Ok(list) => list,
            Err(e) => {
                error!(error = %e, test_list = %test_list.display(), "cannot read results for report");
                return StageOutcome::Incomplete(format!("report skipped: {e}"));
            }
        };
        summary.counts = Some(results.counts());

        let spec = RunSpec::from_config(&self.config);
        match ReportAggregator::new(self.config.work_dir()).build(&spec, &results, logs) {
            Ok(path) => {
                info!(report = %path.display(), config = spec.short_digest(), "final report saved");
                summary.report = Some(path);
                StageOutcome::Success
            }
            Err(e) => {
                error!(error = %e, "report generation failed");
                StageOutcome::Incomplete(format!("report generation failed: {e}"))
            }
        }
    }
}

/// A side with nothing configured cannot run, whatever was requested.
fn effective(plan: SidePlan, capability: Capability, plugins: &[String]) -> SidePlan {
    if plan.is_enabled() && plugins.is_empty() {
        info!(capability = %capability, "no plugins configured, side skipped");
        return SidePlan::Disabled;
    }
    plan
}

fn usable_log(output: &RunOutput) -> std::result::Result<PathBuf, String> {
    let path = output
        .log_file()
        .ok_or_else(|| "run returned no structured log".to_string())?;
    if !path.is_file() {
        return Err(format!("structured log {} is missing", path.display()));
    }
    Ok(path)
}
