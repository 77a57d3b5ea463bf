//! Persisted test list.
//!
//! The test list maps test name → generation metadata + current result. It is
//! produced by the generator stage, written to `<work_dir>/test_list.yaml`,
//! updated by comparison and read back by reporting. Insertion order is
//! preserved on disk and in memory.
//!
//! Once an entry is created its working directory never changes; only the
//! `result` field is mutable.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tempfile::NamedTempFile;

use crate::error::{PluginError, PluginResult};

/// Outcome of comparing one test's DUT and reference dumps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestResult {
    /// No comparison was possible (a dump is missing or comparison never ran).
    #[default]
    Unavailable,
    /// Dumps were byte-identical.
    Passed,
    /// Dumps differed.
    Failed,
}

impl TestResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestResult::Unavailable => "Unavailable",
            TestResult::Passed => "Passed",
            TestResult::Failed => "Failed",
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestListEntry {
    work_dir: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    asm_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    binary: Option<PathBuf>,

    #[serde(default)]
    result: TestResult,

    /// Generator-specific keys (compiler flags, linker scripts, ...), passed through untouched.
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl TestListEntry {
    /// Create an entry rooted at `work_dir` with an `Unavailable` result.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            asm_file: None,
            binary: None,
            result: TestResult::Unavailable,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_asm_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.asm_file = Some(path.into());
        self
    }

    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn asm_file(&self) -> Option<&Path> {
        self.asm_file.as_deref()
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    pub fn result(&self) -> TestResult {
        self.result
    }

    pub fn extra(&self) -> &BTreeMap<String, serde_yaml::Value> {
        &self.extra
    }
}

/// Aggregate result counts. Always satisfies `total == passed + failed + unavailable`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub unavailable: usize,
}

/// Ordered mapping of test name → [`TestListEntry`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestList {
    entries: Vec<(String, TestListEntry)>,
}

impl TestList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a test. Returns `false` (and leaves the list untouched) if the
    /// name is already present.
    pub fn insert(&mut self, name: impl Into<String>, entry: TestListEntry) -> bool {
        let name = name.into();
        if self.get(&name).is_some() {
            return false;
        }
        self.entries.push((name, entry));
        true
    }

    pub fn get(&self, name: &str) -> Option<&TestListEntry> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    /// Update the result of an existing test. Returns `false` if no such test.
    pub fn set_result(&mut self, name: &str, result: TestResult) -> bool {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, entry)) => {
                entry.result = result;
                true
            }
            None => false,
        }
    }

    /// Reset every result to `Unavailable`.
    pub fn clear_results(&mut self) {
        for (_, entry) in &mut self.entries {
            entry.result = TestResult::Unavailable;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TestListEntry)> {
        self.entries.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every test of `other` whose name is not already present.
    ///
    /// Returns the names that were skipped as duplicates.
    pub fn merge(&mut self, other: TestList) -> Vec<String> {
        let mut skipped = Vec::new();
        for (name, entry) in other.entries {
            if self.get(&name).is_some() {
                skipped.push(name);
            } else {
                self.entries.push((name, entry));
            }
        }
        skipped
    }

    /// Recompute aggregate counts from the current state of every entry.
    pub fn counts(&self) -> ResultCounts {
        let mut counts = ResultCounts::default();
        for (_, entry) in &self.entries {
            counts.total += 1;
            match entry.result {
                TestResult::Passed => counts.passed += 1,
                TestResult::Failed => counts.failed += 1,
                TestResult::Unavailable => counts.unavailable += 1,
            }
        }
        counts
    }

    /// Load a test list from a YAML file.
    pub fn load(path: &Path) -> PluginResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Write the test list as YAML, atomically replacing `path`.
    pub fn save(&self, path: &Path) -> PluginResult<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let yaml = serde_yaml::to_string(self)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.persist(path).map_err(|e| PluginError::Io(e.error))?;
        Ok(())
    }
}

impl Serialize for TestList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TestList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TestListVisitor;

        impl<'de> Visitor<'de> for TestListVisitor {
            type Value = TestList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of test name to test entry")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<TestList, E> {
                Ok(TestList::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<TestList, A::Error> {
                let mut list = TestList::new();
                while let Some((name, entry)) = access.next_entry::<String, TestListEntry>()? {
                    if !list.insert(name.clone(), entry) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate test name: {name}"
                        )));
                    }
                }
                Ok(list)
            }
        }

        deserializer.deserialize_any(TestListVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_tests() -> TestList {
        let mut list = TestList::new();
        list.insert(
            "t_zeta",
            TestListEntry::new("/w/t_zeta")
                .with_asm_file("/w/t_zeta/t.S")
                .with_binary("/w/t_zeta/t.elf"),
        );
        list.insert("t_alpha", TestListEntry::new("/w/t_alpha"));
        list.insert("t_mid", TestListEntry::new("/w/t_mid").with_extra("march", "rv64imac"));
        list
    }

    #[test]
    fn test_insert_rejects_duplicate_name() {
        let mut list = three_tests();
        assert!(!list.insert("t_alpha", TestListEntry::new("/elsewhere")));
        assert_eq!(list.len(), 3);
        assert_eq!(list.get("t_alpha").unwrap().work_dir(), Path::new("/w/t_alpha"));
    }

    #[test]
    fn test_counts_sum_to_total() {
        let mut list = three_tests();
        list.set_result("t_zeta", TestResult::Passed);
        list.set_result("t_mid", TestResult::Failed);

        let counts = list.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.unavailable, 1);
        assert_eq!(counts.total, counts.passed + counts.failed + counts.unavailable);
    }

    #[test]
    fn test_clear_results_keeps_entries() {
        let mut list = three_tests();
        list.set_result("t_zeta", TestResult::Passed);
        list.set_result("t_mid", TestResult::Failed);

        list.clear_results();

        assert_eq!(list.counts().unavailable, 3);
        assert_eq!(list.get("t_zeta").unwrap().asm_file(), Some(Path::new("/w/t_zeta/t.S")));
    }

    #[test]
    fn test_set_result_unknown_test() {
        let mut list = three_tests();
        assert!(!list.set_result("missing", TestResult::Passed));
    }

    #[test]
    fn test_save_load_preserves_order_and_extra_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_list.yaml");

        let list = three_tests();
        list.save(&path).unwrap();
        let loaded = TestList::load(&path).unwrap();

        assert_eq!(loaded.names(), vec!["t_zeta", "t_alpha", "t_mid"]);
        assert_eq!(loaded.get("t_zeta").unwrap().binary(), Some(Path::new("/w/t_zeta/t.elf")));
        assert_eq!(loaded.get("t_alpha").unwrap().binary(), None);
        assert_eq!(
            loaded.get("t_mid").unwrap().extra().get("march"),
            Some(&serde_yaml::Value::from("rv64imac"))
        );
        assert_eq!(loaded, list);
    }

    #[test]
    fn test_missing_result_defaults_to_unavailable() {
        let yaml = "t1:\n  work_dir: /w/t1\n  asm_file: /w/t1/t1.S\n";
        let list: TestList = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(list.get("t1").unwrap().result(), TestResult::Unavailable);
    }

    #[test]
    fn test_duplicate_key_rejected_on_load() {
        let yaml = "t1:\n  work_dir: /a\nt1:\n  work_dir: /b\n";
        assert!(serde_yaml::from_str::<TestList>(yaml).is_err());
    }

    #[test]
    fn test_empty_file_loads_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "").unwrap();
        assert!(TestList::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_merge_skips_duplicates() {
        let mut list = three_tests();
        let mut other = TestList::new();
        other.insert("t_alpha", TestListEntry::new("/other/t_alpha"));
        other.insert("t_new", TestListEntry::new("/other/t_new"));

        let skipped = list.merge(other);
        assert_eq!(skipped, vec!["t_alpha".to_string()]);
        assert_eq!(list.names(), vec!["t_zeta", "t_alpha", "t_mid", "t_new"]);
    }
}
