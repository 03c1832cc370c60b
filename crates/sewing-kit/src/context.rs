//! Runtime handle passed to a running step.

use crate::exec::{self, ExecOutput};
use crate::group::{FocusedStep, GroupRun, Lineage};
use crate::step::{display_label, Result, StepRef};
use crate::ui::Style;
use sewing_core::{LogLevel, StepCounts, StepTarget};
use std::ffi::OsStr;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// What a step can do while it runs: execute processes in its target, log
/// through its group, publish a status line, and submit nested steps.
#[derive(Clone)]
pub struct StepContext {
    group: Arc<GroupRun>,
    step: StepRef,
    target: StepTarget,
    focused: Arc<FocusedStep>,
    lineage: Arc<Lineage>,
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("step", &self.step.id())
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl StepContext {
    pub(crate) fn new(
        group: Arc<GroupRun>,
        step: StepRef,
        target: StepTarget,
        focused: Arc<FocusedStep>,
        lineage: Arc<Lineage>,
    ) -> Self {
        Self {
            group,
            step,
            target,
            focused,
            lineage,
        }
    }

    pub fn step_id(&self) -> &str {
        self.step.id()
    }

    pub fn target(&self) -> &StepTarget {
        &self.target
    }

    /// Run a program in the target's root.
    pub async fn exec<I, S>(&self, program: &str, args: I) -> exec::Result<ExecOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        exec::exec(program, args, self.target.root()).await
    }

    /// Run a shell command line in the target's root.
    pub async fn shell(&self, command_line: &str) -> exec::Result<ExecOutput> {
        exec::shell(command_line, self.target.root()).await
    }

    /// Start long-running work without waiting for it.
    pub fn indefinite<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(step = %self.step.id(), "starting indefinite work");
        tokio::spawn(work);
    }

    /// Log through the step's group. The text is preceded by a group line
    /// naming the step.
    pub fn log(&self, text: &str, level: LogLevel) {
        let ui = self.group.view().ui();
        self.group.log(
            &format!(
                "log from {}",
                ui.style(Style::Info, display_label(self.step.as_ref()))
            ),
            level,
        );
        self.group.view().log(text, level);
    }

    /// Set the live status shown under the running step.
    pub fn status(&self, text: impl Into<String>) {
        self.focused.set_content(Some(text.into()));
    }

    pub fn clear_status(&self) {
        self.focused.set_content(None);
    }

    /// Tally of nested steps submitted under the running top-level step.
    pub fn progress(&self) -> StepCounts {
        self.focused.counts()
    }

    /// Run nested steps against this step's target.
    pub async fn run_nested(&self, steps: Vec<StepRef>) -> Result<()> {
        self.run_nested_in(steps, self.target.clone()).await
    }

    /// Run nested steps against another target.
    pub async fn run_nested_in(&self, steps: Vec<StepRef>, target: StepTarget) -> Result<()> {
        self.group
            .run_nested(&self.step, &self.focused, &self.lineage, steps, target)
            .await
    }
}
