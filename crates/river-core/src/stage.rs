//! Stage selection and run state.
//!
//! DUT and reference each get a [`StageSelector`]. [`resolve_stages`] turns the
//! pair into a [`StagePlan`] saying how far each side runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RiverError;

/// One simulator lifecycle stage. Ordered: `Init < Build < Run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Build,
    Run,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Init, Stage::Build, Stage::Run];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Build => "build",
            Stage::Run => "run",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stage requested for one side on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSelector {
    Init,
    Build,
    Run,
    #[default]
    Auto,
}

impl StageSelector {
    /// The explicit stage, or `None` for `auto`.
    pub fn explicit(&self) -> Option<Stage> {
        match self {
            StageSelector::Init => Some(Stage::Init),
            StageSelector::Build => Some(Stage::Build),
            StageSelector::Run => Some(Stage::Run),
            StageSelector::Auto => None,
        }
    }
}

impl fmt::Display for StageSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.explicit() {
            Some(stage) => stage.fmt(f),
            None => f.write_str("auto"),
        }
    }
}

impl FromStr for StageSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "init" => Ok(StageSelector::Init),
            "build" => Ok(StageSelector::Build),
            "run" => Ok(StageSelector::Run),
            "auto" => Ok(StageSelector::Auto),
            other => Err(format!("unknown stage `{other}` (expected init, build, run or auto)")),
        }
    }
}

/// How far one side runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidePlan {
    Disabled,
    /// Every stage up to and including this one.
    UpTo(Stage),
}

impl SidePlan {
    /// Stages to execute, in order.
    pub fn stages(&self) -> Vec<Stage> {
        match self {
            SidePlan::Disabled => Vec::new(),
            SidePlan::UpTo(last) => Stage::ALL.into_iter().filter(|s| s <= last).collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, SidePlan::Disabled)
    }

    pub fn reaches_run(&self) -> bool {
        matches!(self, SidePlan::UpTo(Stage::Run))
    }
}

/// Resolved plan for a compile run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub dut: SidePlan,
    pub reference: SidePlan,
    pub compare: bool,
    /// Set when comparison was requested but one side was auto-disabled.
    pub incomplete: Option<String>,
}

/// Resolve the DUT and reference selectors.
///
/// - `auto`/`auto` runs both sides fully.
/// - `auto` against an explicit selector disables the `auto` side.
/// - explicit/explicit runs each side as requested.
pub fn resolve_stages(dut: StageSelector, reference: StageSelector, compare: bool) -> StagePlan {
    let (dut_plan, ref_plan, disabled) = match (dut.explicit(), reference.explicit()) {
        (None, None) => (SidePlan::UpTo(Stage::Run), SidePlan::UpTo(Stage::Run), None),
        (None, Some(r)) => (SidePlan::Disabled, SidePlan::UpTo(r), Some("dut")),
        (Some(d), None) => (SidePlan::UpTo(d), SidePlan::Disabled, Some("reference")),
        (Some(d), Some(r)) => (SidePlan::UpTo(d), SidePlan::UpTo(r), None),
    };

    let incomplete = match disabled {
        Some(side) if compare => {
            let reason = format!(
                "{side} side is disabled (dut={dut}, reference={reference}); comparison will be incomplete"
            );
            warn!(event = "stage.incomplete_compare", "{reason}");
            Some(reason)
        }
        _ => None,
    };

    StagePlan {
        dut: dut_plan,
        reference: ref_plan,
        compare,
        incomplete,
    }
}

/// Position of a compile run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    GeneratorDone,
    GeneratorSkipped,
    DutDone,
    DutSkipped,
    RefDone,
    RefSkipped,
    Compared,
    ComparisonSkipped,
    Reported,
    Aborted,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::NotStarted => "not_started",
            RunState::GeneratorDone => "generator_done",
            RunState::GeneratorSkipped => "generator_skipped",
            RunState::DutDone => "dut_done",
            RunState::DutSkipped => "dut_skipped",
            RunState::RefDone => "ref_done",
            RunState::RefSkipped => "ref_skipped",
            RunState::Compared => "compared",
            RunState::ComparisonSkipped => "comparison_skipped",
            RunState::Reported => "reported",
            RunState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Reported | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a single controller stage produced.
#[derive(Debug)]
pub enum StageOutcome {
    Success,
    /// The stage finished but left the run degraded.
    Incomplete(String),
    Fatal(RiverError),
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Success => "success",
            StageOutcome::Incomplete(_) => "incomplete",
            StageOutcome::Fatal(_) => "fatal",
        }
    }
}

impl From<crate::error::Result<()>> for StageOutcome {
    fn from(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => StageOutcome::Success,
            Err(e) => StageOutcome::Fatal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::StageSelector::{Auto, Build, Run};

    #[test]
    fn test_auto_auto_runs_both() {
        let plan = resolve_stages(Auto, Auto, true);
        assert_eq!(plan.dut, SidePlan::UpTo(Stage::Run));
        assert_eq!(plan.reference, SidePlan::UpTo(Stage::Run));
        assert!(plan.incomplete.is_none());
    }

    #[test]
    fn test_auto_dut_with_explicit_ref_disables_dut() {
        let plan = resolve_stages(Auto, Build, true);
        assert_eq!(plan.dut, SidePlan::Disabled);
        assert_eq!(plan.reference.stages(), vec![Stage::Init, Stage::Build]);
        assert!(plan.incomplete.as_deref().unwrap().contains("dut side is disabled"));
    }

    #[test]
    fn test_explicit_dut_with_auto_ref_disables_ref() {
        let plan = resolve_stages(Run, Auto, false);
        assert_eq!(plan.dut.stages(), Stage::ALL.to_vec());
        assert_eq!(plan.reference, SidePlan::Disabled);
        // no comparison requested, nothing to warn about
        assert!(plan.incomplete.is_none());
    }

    #[test]
    fn test_explicit_both_independent() {
        let plan = resolve_stages(Build, Build, true);
        assert_eq!(plan.dut.stages(), vec![Stage::Init, Stage::Build]);
        assert_eq!(plan.reference.stages(), vec![Stage::Init, Stage::Build]);
        assert!(!plan.dut.reaches_run());
        assert!(plan.incomplete.is_none());
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!("BUILD".parse::<StageSelector>(), Ok(Build));
        assert_eq!("auto".parse::<StageSelector>(), Ok(Auto));
        assert!("compile".parse::<StageSelector>().is_err());
        assert_eq!(Run.to_string(), "run");
    }

    #[test]
    fn test_disabled_plan_has_no_stages() {
        assert!(SidePlan::Disabled.stages().is_empty());
        assert!(!SidePlan::Disabled.is_enabled());
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Reported.is_terminal());
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::Compared.is_terminal());
    }
}
