//! Dump comparison.
//!
//! Each test's work directory is expected to hold `dut.dump` and `ref.dump`.
//! The persisted test list is rewritten after every entry and the final
//! counts are taken from the file on disk, not from this pass.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use river_plugin::{ResultCounts, TestList, TestListEntry, TestResult};

use crate::error::CompareError;
use crate::obs::emit_compare_result;

pub const DUT_DUMP: &str = "dut.dump";
pub const REF_DUMP: &str = "ref.dump";

/// Outcome of comparing one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryVerdict {
    pub result: TestResult,
    pub detail: String,
}

/// Compares DUT and reference dumps for a persisted test list.
#[derive(Debug, Clone)]
pub struct ComparisonEngine {
    test_list_path: PathBuf,
}

impl ComparisonEngine {
    pub fn new(test_list_path: impl Into<PathBuf>) -> Self {
        Self {
            test_list_path: test_list_path.into(),
        }
    }

    pub fn test_list_path(&self) -> &Path {
        &self.test_list_path
    }

    /// Classify every entry, persisting after each one.
    ///
    /// Per-test problems (missing or unreadable dumps) become `Unavailable`
    /// and never stop the batch. Only failing to write the test list is an error.
    pub async fn compare(&self, mut list: TestList) -> Result<(TestList, ResultCounts), CompareError> {
        let names: Vec<String> = list.names().into_iter().map(str::to_string).collect();

        for name in &names {
            let verdict = match list.get(name) {
                Some(entry) => compare_entry(entry).await,
                None => continue,
            };
            emit_compare_result(name, verdict.result, &verdict.detail);
            list.set_result(name, verdict.result);
            self.persist(&list)?;
        }

        // a hand-edited list on disk wins over what this pass saw
        let final_list = TestList::load(&self.test_list_path).map_err(|source| CompareError::Persist {
            path: self.test_list_path.clone(),
            source,
        })?;
        let counts = final_list.counts();
        Ok((final_list, counts))
    }

    /// Reset every entry to `Unavailable` and persist, for runs that skip comparison.
    pub fn clear(&self) -> Result<ResultCounts, CompareError> {
        let mut list = TestList::load(&self.test_list_path).map_err(|source| CompareError::Persist {
            path: self.test_list_path.clone(),
            source,
        })?;
        list.clear_results();
        self.persist(&list)?;
        Ok(list.counts())
    }

    fn persist(&self, list: &TestList) -> Result<(), CompareError> {
        list.save(&self.test_list_path)
            .map_err(|source| CompareError::Persist {
                path: self.test_list_path.clone(),
                source,
            })
    }
}

/// Compare the two dumps in one entry's work directory.
pub async fn compare_entry(entry: &TestListEntry) -> EntryVerdict {
    let dut_path = entry.work_dir().join(DUT_DUMP);
    let ref_path = entry.work_dir().join(REF_DUMP);

    let dut = match read_dump(&dut_path).await {
        Ok(bytes) => bytes,
        Err(detail) => return unavailable(detail),
    };
    let reference = match read_dump(&ref_path).await {
        Ok(bytes) => bytes,
        Err(detail) => return unavailable(detail),
    };

    match first_difference(&dut, &reference) {
        None => EntryVerdict {
            result: TestResult::Passed,
            detail: "dumps match".to_string(),
        },
        Some(offset) => EntryVerdict {
            result: TestResult::Failed,
            detail: format!(
                "dumps differ at byte {offset} (dut {} bytes, ref {} bytes)",
                dut.len(),
                reference.len()
            ),
        },
    }
}

async fn read_dump(path: &Path) -> Result<Vec<u8>, String> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => format!("{} is missing", path.display()),
        _ => format!("{} is unreadable: {e}", path.display()),
    })
}

fn unavailable(detail: String) -> EntryVerdict {
    EntryVerdict {
        result: TestResult::Unavailable,
        detail,
    }
}

fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    match a.iter().zip(b).position(|(x, y)| x != y) {
        Some(i) => Some(i),
        None if a.len() != b.len() => Some(a.len().min(b.len())),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(dir: &Path) -> (PathBuf, TestList) {
        let mut list = TestList::new();
        for (name, dut, reference) in [
            ("same", Some(&b"x0=1\nx1=2\n"[..]), Some(&b"x0=1\nx1=2\n"[..])),
            ("diff", Some(&b"x0=1\n"[..]), Some(&b"x0=2\n"[..])),
            ("noref", Some(&b"x0=1\n"[..]), None),
            ("nodut", None, Some(&b"x0=1\n"[..])),
        ] {
            let work = dir.join(name);
            std::fs::create_dir_all(&work).unwrap();
            if let Some(bytes) = dut {
                std::fs::write(work.join(DUT_DUMP), bytes).unwrap();
            }
            if let Some(bytes) = reference {
                std::fs::write(work.join(REF_DUMP), bytes).unwrap();
            }
            list.insert(name, TestListEntry::new(work));
        }
        let path = dir.join("test_list.yaml");
        list.save(&path).unwrap();
        (path, list)
    }

    #[tokio::test]
    async fn test_classification() {
        let dir = tempfile::tempdir().unwrap();
        let (path, list) = fixture(dir.path());

        let (out, counts) = ComparisonEngine::new(&path).compare(list).await.unwrap();

        assert_eq!(out.get("same").unwrap().result(), TestResult::Passed);
        assert_eq!(out.get("diff").unwrap().result(), TestResult::Failed);
        assert_eq!(out.get("noref").unwrap().result(), TestResult::Unavailable);
        assert_eq!(out.get("nodut").unwrap().result(), TestResult::Unavailable);
        assert_eq!(counts.total, 4);
        assert_eq!(counts.passed + counts.failed + counts.unavailable, counts.total);
        assert_eq!((counts.passed, counts.failed, counts.unavailable), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_results_persisted_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (path, list) = fixture(dir.path());

        ComparisonEngine::new(&path).compare(list).await.unwrap();

        let on_disk = TestList::load(&path).unwrap();
        assert_eq!(on_disk.get("diff").unwrap().result(), TestResult::Failed);
        assert_eq!(on_disk.names(), vec!["same", "diff", "noref", "nodut"]);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (path, list) = fixture(dir.path());
        let engine = ComparisonEngine::new(&path);

        let (first, c1) = engine.compare(list).await.unwrap();
        let (second, c2) = engine.compare(first.clone()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(c1, c2);
    }

    #[tokio::test]
    async fn test_clear_resets_previous_results() {
        let dir = tempfile::tempdir().unwrap();
        let (path, list) = fixture(dir.path());
        let engine = ComparisonEngine::new(&path);
        engine.compare(list).await.unwrap();

        let counts = engine.clear().unwrap();

        assert_eq!(counts.unavailable, counts.total);
        let on_disk = TestList::load(&path).unwrap();
        assert_eq!(on_disk.get("same").unwrap().result(), TestResult::Unavailable);
        assert_eq!(on_disk.names(), vec!["same", "diff", "noref", "nodut"]);
    }

    #[tokio::test]
    async fn test_length_mismatch_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DUT_DUMP), b"abc").unwrap();
        std::fs::write(dir.path().join(REF_DUMP), b"abcd").unwrap();

        let verdict = compare_entry(&TestListEntry::new(dir.path())).await;
        assert_eq!(verdict.result, TestResult::Failed);
        assert!(verdict.detail.contains("byte 3"));
    }

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference(b"abc", b"abc"), None);
        assert_eq!(first_difference(b"abc", b"abd"), Some(2));
        assert_eq!(first_difference(b"", b"a"), Some(0));
    }
}
