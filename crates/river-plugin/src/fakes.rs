//! In-memory fakes for the plugin capability traits (testing only)
//!
//! Provides `FakeGenerator` and `FakeSimulator` that satisfy the hook
//! contracts without any external tools. Both record every hook invocation in
//! a shared [`HookJournal`] so tests can assert ordering across plugins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{PluginError, PluginResult};
use crate::hooks::{
    DutPlugin, GenArgs, GeneratorPlugin, HookName, InitArgs, MergeDbArgs, PostGenArgs,
    PostRunArgs, PreGenArgs, ReferencePlugin, RunArgs, RunOutput, SimulatorPlugin,
};
use crate::test_list::{TestList, TestListEntry};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// HookJournal
// ---------------------------------------------------------------------------

/// Shared, ordered record of `(plugin, hook)` invocations.
#[derive(Debug, Clone, Default)]
pub struct HookJournal {
    calls: Arc<Mutex<Vec<(String, HookName)>>>,
}

impl HookJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, plugin: &str, hook: HookName) {
        lock(&self.calls).push((plugin.to_string(), hook));
    }

    pub fn calls(&self) -> Vec<(String, HookName)> {
        lock(&self.calls).clone()
    }

    /// Hooks invoked on one plugin, in order.
    pub fn hooks_for(&self, plugin: &str) -> Vec<HookName> {
        lock(&self.calls)
            .iter()
            .filter(|(p, _)| p == plugin)
            .map(|(_, h)| *h)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.calls).is_empty()
    }
}

// ---------------------------------------------------------------------------
// FakeGenerator
// ---------------------------------------------------------------------------

/// Generator that creates one empty work directory per configured test name.
#[derive(Debug)]
pub struct FakeGenerator {
    name: String,
    tests: Vec<String>,
    log_lines: Vec<String>,
    fail_on: Option<HookName>,
    journal: HookJournal,
}

impl FakeGenerator {
    pub fn new(name: impl Into<String>, journal: HookJournal) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
            log_lines: Vec::new(),
            fail_on: None,
            journal,
        }
    }

    pub fn with_tests(mut self, tests: &[&str]) -> Self {
        self.tests = tests.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Lines written to `<output_dir>/.json/<name>-gen.json` during `gen`.
    pub fn with_log_lines(mut self, lines: &[&str]) -> Self {
        self.log_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn failing_on(mut self, hook: HookName) -> Self {
        self.fail_on = Some(hook);
        self
    }

    fn enter(&self, hook: HookName) -> PluginResult<()> {
        self.journal.record(&self.name, hook);
        if self.fail_on == Some(hook) {
            return Err(PluginError::hook_failed(hook.as_str(), format!("{} injected failure", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl GeneratorPlugin for FakeGenerator {
    async fn pre_gen(&self, args: &PreGenArgs) -> PluginResult<()> {
        self.enter(HookName::PreGen)?;
        std::fs::create_dir_all(&args.output_dir)?;
        Ok(())
    }

    async fn generate(&self, args: &GenArgs) -> PluginResult<TestList> {
        self.enter(HookName::Gen)?;

        let mut list = TestList::new();
        for test in &self.tests {
            let work_dir = args.output_dir.join(&self.name).join(test);
            std::fs::create_dir_all(&work_dir)?;
            let asm = work_dir.join(format!("{test}.S"));
            std::fs::write(&asm, format!("# {test}\n"))?;
            let entry = TestListEntry::new(&work_dir)
                .with_asm_file(asm)
                .with_binary(work_dir.join(format!("{test}.elf")));
            list.insert(test.clone(), entry);
        }

        if !self.log_lines.is_empty() {
            let log_dir = args.output_dir.join(".json");
            std::fs::create_dir_all(&log_dir)?;
            write_lines(&log_dir.join(format!("{}-gen.json", self.name)), &self.log_lines)?;
        }

        Ok(list)
    }

    async fn post_gen(&self, _args: &PostGenArgs) -> PluginResult<()> {
        self.enter(HookName::PostGen)
    }
}

// ---------------------------------------------------------------------------
// FakeSimulator
// ---------------------------------------------------------------------------

/// DUT or reference fake that writes scripted dump contents per test.
#[derive(Debug)]
pub struct FakeSimulator {
    name: String,
    dump_file: String,
    dumps: BTreeMap<String, Vec<u8>>,
    log_lines: Vec<String>,
    fail_on: Option<HookName>,
    journal: HookJournal,
    init_args: Mutex<Option<InitArgs>>,
}

impl FakeSimulator {
    /// A DUT fake, writing `dut.dump`.
    pub fn dut(name: impl Into<String>, journal: HookJournal) -> Self {
        Self::with_dump_file(name, "dut.dump", journal)
    }

    /// A reference fake, writing `ref.dump`.
    pub fn reference(name: impl Into<String>, journal: HookJournal) -> Self {
        Self::with_dump_file(name, "ref.dump", journal)
    }

    fn with_dump_file(name: impl Into<String>, dump_file: &str, journal: HookJournal) -> Self {
        Self {
            name: name.into(),
            dump_file: dump_file.to_string(),
            dumps: BTreeMap::new(),
            log_lines: Vec::new(),
            fail_on: None,
            journal,
            init_args: Mutex::new(None),
        }
    }

    /// Dump content to write for `test` during `run`. Tests without a dump get none.
    pub fn with_dump(mut self, test: &str, content: &[u8]) -> Self {
        self.dumps.insert(test.to_string(), content.to_vec());
        self
    }

    /// Structured log lines written to `<work_dir>/.json/<name>.json` during `run`.
    pub fn with_log_lines(mut self, lines: &[&str]) -> Self {
        self.log_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn failing_on(mut self, hook: HookName) -> Self {
        self.fail_on = Some(hook);
        self
    }

    /// Arguments seen by the last `init`.
    pub fn init_args(&self) -> Option<InitArgs> {
        lock(&self.init_args).clone()
    }

    fn enter(&self, hook: HookName) -> PluginResult<()> {
        self.journal.record(&self.name, hook);
        if self.fail_on == Some(hook) {
            return Err(PluginError::hook_failed(hook.as_str(), format!("{} injected failure", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl SimulatorPlugin for FakeSimulator {
    async fn init(&self, args: &InitArgs) -> PluginResult<()> {
        self.enter(HookName::Init)?;
        *lock(&self.init_args) = Some(args.clone());
        Ok(())
    }

    async fn build(&self) -> PluginResult<()> {
        self.enter(HookName::Build)
    }

    async fn run(&self, _args: &RunArgs) -> PluginResult<RunOutput> {
        self.enter(HookName::Run)?;

        let init = self.init_args().ok_or_else(|| {
            PluginError::hook_failed(HookName::Run.as_str(), "run called before init")
        })?;
        let tests = TestList::load(&init.test_list)?;

        for (name, entry) in tests.iter() {
            if let Some(content) = self.dumps.get(name) {
                std::fs::create_dir_all(entry.work_dir())?;
                std::fs::write(entry.work_dir().join(&self.dump_file), content)?;
            }
        }

        if self.log_lines.is_empty() {
            return Ok(RunOutput::default());
        }

        let log_dir = init.work_dir.join(".json");
        std::fs::create_dir_all(&log_dir)?;
        let prefix = log_dir.join(&self.name);
        write_lines(&crate::hooks::log_file_for_prefix(&prefix), &self.log_lines)?;
        Ok(RunOutput::with_log_prefix(prefix))
    }

    async fn post_run(&self, _args: &PostRunArgs) -> PluginResult<()> {
        self.enter(HookName::PostRun)
    }
}

#[async_trait]
impl DutPlugin for FakeSimulator {
    async fn merge_db(&self, args: &MergeDbArgs) -> PluginResult<()> {
        self.enter(HookName::MergeDb)?;
        let names: Vec<String> = args
            .db_files
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        std::fs::write(PathBuf::from(&args.output_db), names.join("\n"))?;
        Ok(())
    }
}

impl ReferencePlugin for FakeSimulator {}

fn write_lines(path: &Path, lines: &[String]) -> PluginResult<()> {
    let mut body = lines.join("\n");
    body.push('\n');
    std::fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_simulator_writes_only_scripted_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = TestList::new();
        list.insert("t1", TestListEntry::new(dir.path().join("t1")));
        list.insert("t2", TestListEntry::new(dir.path().join("t2")));
        let list_path = dir.path().join("test_list.yaml");
        list.save(&list_path).unwrap();

        let journal = HookJournal::new();
        let dut = FakeSimulator::dut("dut", journal.clone()).with_dump("t1", b"regs");

        dut.init(&InitArgs {
            plugin_config: crate::hooks::PluginConfig {
                name: "dut".to_string(),
                isa: "rv64i".to_string(),
                params: Default::default(),
            },
            test_list: list_path,
            work_dir: dir.path().to_path_buf(),
            coverage_config: None,
            plugin_path: dir.path().to_path_buf(),
        })
        .await
        .unwrap();
        dut.build().await.unwrap();
        let out = dut
            .run(&RunArgs {
                module_dir: dir.path().to_path_buf(),
            })
            .await
            .unwrap();

        assert!(out.log_prefix.is_none());
        assert_eq!(std::fs::read(dir.path().join("t1/dut.dump")).unwrap(), b"regs");
        assert!(!dir.path().join("t2/dut.dump").exists());
        assert_eq!(
            journal.hooks_for("dut"),
            vec![HookName::Init, HookName::Build, HookName::Run]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded() {
        let journal = HookJournal::new();
        let dut = FakeSimulator::reference("ref", journal.clone()).failing_on(HookName::Build);
        let err = dut.build().await.unwrap_err();
        assert!(err.to_string().contains("injected failure"));
        assert_eq!(journal.hooks_for("ref"), vec![HookName::Build]);
    }
}
