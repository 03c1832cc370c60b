//! Drives a run: pre steps, main steps, post steps, then the epilogue.
//!
//! Groups run one after another and the first failing group ends the run.
//! Render timers only run in interactive mode and are always stopped before
//! the final redraw, whether the run succeeded or not.

use crate::group::{RunError, StepGroup};
use crate::queue::StepQueue;
use crate::render::ProgressView;
use crate::step::StepRef;
use crate::tracker::StepTracker;
use crate::ui::Style;
use parking_lot::Mutex;
use sewing_core::{GroupKind, LogLevel, StepCounts, StepInclusion, StepTarget, Workspace};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    RunningPre,
    RunningMain,
    RunningPost,
    Epilogue,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RunningPre => "running_pre",
            Self::RunningMain => "running_main",
            Self::RunningPost => "running_post",
            Self::Epilogue => "epilogue",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Called after every group succeeded, with the view to log through.
pub type Epilogue = Box<dyn FnOnce(&ProgressView) + Send>;

/// Everything a run executes. Pre and post steps always target the
/// workspace.
pub struct RunOptions {
    pub title: String,
    pub workspace: Workspace,
    pub pre: Vec<StepRef>,
    pub steps: Vec<(StepRef, StepTarget)>,
    pub post: Vec<StepRef>,
    pub inclusion: StepInclusion,
    pub epilogue: Option<Epilogue>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = |steps: &[StepRef]| {
            steps
                .iter()
                .map(|s| s.id().to_string())
                .collect::<Vec<_>>()
        };
        f.debug_struct("RunOptions")
            .field("title", &self.title)
            .field("pre", &ids(self.pre.as_slice()))
            .field(
                "steps",
                &self.steps.iter().map(|(s, _)| s.id()).collect::<Vec<_>>(),
            )
            .field("post", &ids(self.post.as_slice()))
            .field("epilogue", &self.epilogue.is_some())
            .finish_non_exhaustive()
    }
}

impl RunOptions {
    pub fn new(title: impl Into<String>, workspace: Workspace) -> Self {
        Self {
            title: title.into(),
            workspace,
            pre: Vec::new(),
            steps: Vec::new(),
            post: Vec::new(),
            inclusion: StepInclusion::default(),
            epilogue: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderIntervals {
    pub redraw: Duration,
    pub spinner: Duration,
}

impl Default for RenderIntervals {
    fn default() -> Self {
        Self {
            redraw: Duration::from_millis(16),
            spinner: Duration::from_millis(60),
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub phase: RunPhase,
    /// Tally per group that ran, in run order.
    pub groups: Vec<(String, StepCounts)>,
    pub error: Option<RunError>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.phase == RunPhase::Done
    }

    pub fn exit_code(&self) -> u8 {
        u8::from(!self.success())
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    view: Arc<ProgressView>,
    queue: Arc<StepQueue>,
    tracker: Arc<StepTracker>,
    intervals: RenderIntervals,
    phase: Mutex<RunPhase>,
}

impl Orchestrator {
    pub fn new(view: Arc<ProgressView>, queue: Arc<StepQueue>, tracker: Arc<StepTracker>) -> Self {
        Self {
            view,
            queue,
            tracker,
            intervals: RenderIntervals::default(),
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    #[must_use]
    pub fn with_intervals(mut self, intervals: RenderIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock()
    }

    pub fn view(&self) -> &Arc<ProgressView> {
        &self.view
    }

    fn set_phase(&self, phase: RunPhase) {
        debug!(phase = phase.as_str(), "run phase");
        *self.phase.lock() = phase;
    }

    pub async fn run(&self, options: RunOptions) -> RunOutcome {
        info!(title = %options.title, width = self.queue.width(), "run started");

        let timers = self.view.is_interactive().then(|| {
            self.view
                .start_timers(self.intervals.redraw, self.intervals.spinner)
        });
        self.view.set_separator('=');

        let ui = self.view.ui();
        self.view.log(
            &format!("🧵 {}\n", ui.style(Style::Title, &options.title)),
            LogLevel::Info,
        );

        let mut groups = Vec::new();
        let result = self.run_groups(options, &mut groups).await;

        drop(timers);
        self.view.redraw();

        match result {
            Ok(()) => {
                self.set_phase(RunPhase::Done);
                info!("run finished");
                RunOutcome {
                    phase: RunPhase::Done,
                    groups,
                    error: None,
                }
            }
            Err(err) => {
                self.set_phase(RunPhase::Failed);
                debug!(error = %err, "run failed");
                self.report(&err);
                RunOutcome {
                    phase: RunPhase::Failed,
                    groups,
                    error: Some(err),
                }
            }
        }
    }

    async fn run_groups(
        &self,
        options: RunOptions,
        groups: &mut Vec<(String, StepCounts)>,
    ) -> Result<(), RunError> {
        let RunOptions {
            title,
            workspace,
            pre,
            steps,
            post,
            inclusion,
            epilogue,
        } = options;
        let on_workspace = |steps: Vec<StepRef>| -> Vec<(StepRef, StepTarget)> {
            steps
                .into_iter()
                .map(|step| (step, StepTarget::Workspace(workspace.clone())))
                .collect()
        };

        let plan = [
            (RunPhase::RunningPre, GroupKind::Pre, "pre".to_string(), on_workspace(pre), false),
            (RunPhase::RunningMain, GroupKind::Main, title, steps, true),
            (RunPhase::RunningPost, GroupKind::Post, "post".to_string(), on_workspace(post), true),
        ];

        for (phase, kind, label, steps, separator) in plan {
            self.set_phase(phase);
            let group = StepGroup::new(label.clone(), steps)
                .with_filters(
                    inclusion.skip(kind).to_vec(),
                    inclusion.isolate(kind).to_vec(),
                )
                .with_flag_names(kind.flag_names())
                .with_separator(separator);
            let result = group.run(&self.view, &self.queue, &self.tracker).await;
            match result {
                Ok(counts) => groups.push((label, counts)),
                Err(err) => {
                    let RunError::GroupFailed { counts, .. } = &err;
                    groups.push((label, *counts));
                    return Err(err);
                }
            }
        }

        if let Some(epilogue) = epilogue {
            self.set_phase(RunPhase::Epilogue);
            let ui = self.view.ui();
            self.view
                .log(&ui.style(Style::Subdued, ui.rule('~')), LogLevel::Info);
            epilogue(&*self.view);
        }

        Ok(())
    }

    /// Write a failure and its causes to the error stream.
    fn report(&self, err: &RunError) {
        let ui = self.view.ui();
        self.view
            .error(&ui.style(Style::Error, err.to_string()), LogLevel::Errors);

        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            self.view
                .error(&format!("  caused by: {cause}"), LogLevel::Errors);
            source = std::error::Error::source(cause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepContext;
    use crate::step::{Result, Step, StepError};
    use crate::ui::{SharedBuffer, Ui};
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct Outcome(&'static str, bool);

    #[async_trait]
    impl Step for Outcome {
        fn id(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: StepContext) -> Result<()> {
            if self.1 {
                Ok(())
            } else {
                Err(StepError::Failed("exit 1".to_string()))
            }
        }
    }

    fn orchestrator(interactive: bool) -> (Orchestrator, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let ui = Ui::with_writers(
            Box::new(out.clone()),
            Box::new(err.clone()),
            LogLevel::Info,
            false,
            4,
        );
        let view = Arc::new(ProgressView::new(Arc::new(ui), interactive));
        (
            Orchestrator::new(view, Arc::new(StepQueue::new(2)), Arc::new(StepTracker::new())),
            out,
            err,
        )
    }

    struct SlowFailure;

    #[async_trait]
    impl Step for SlowFailure {
        fn id(&self) -> &str {
            "Build.Slow"
        }

        async fn run(&self, _ctx: StepContext) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Err(StepError::Failed("too slow".to_string()))
        }
    }

    fn workspace() -> Workspace {
        Workspace {
            name: "ws".to_string(),
            root: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn successful_run_reaches_done_and_runs_epilogue() {
        let (orchestrator, out, _) = orchestrator(false);
        let mut options = RunOptions::new("build", workspace());
        options.pre = vec![Arc::new(Outcome("Clean.All", true)) as StepRef];
        options.steps = vec![(
            Arc::new(Outcome("Build.Web", true)) as StepRef,
            StepTarget::Workspace(workspace()),
        )];
        options.epilogue = Some(Box::new(|view: &ProgressView| {
            view.log("all done", LogLevel::Info);
        }));

        let outcome = orchestrator.run(options).await;

        assert!(outcome.success());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(orchestrator.phase(), RunPhase::Done);
        let labels: Vec<&str> = outcome.groups.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["pre", "build", "post"]);

        let text = out.contents();
        assert!(text.starts_with("🧵 build\n\n"));
        assert!(text.contains("[pre]\n"));
        assert!(text.contains("~~~~\n[build]\n"));
        assert!(text.ends_with("~~~~\nall done\n"));
    }

    #[tokio::test]
    async fn failing_group_stops_run_and_reports() {
        let (orchestrator, out, err) = orchestrator(false);
        let mut options = RunOptions::new("build", workspace());
        options.pre = vec![Arc::new(Outcome("Clean.All", false)) as StepRef];
        options.steps = vec![(
            Arc::new(Outcome("Build.Web", true)) as StepRef,
            StepTarget::Workspace(workspace()),
        )];
        options.epilogue = Some(Box::new(|view: &ProgressView| {
            view.log("all done", LogLevel::Info);
        }));

        let outcome = orchestrator.run(options).await;

        assert!(!outcome.success());
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.phase, RunPhase::Failed);
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].1.fail, 1);

        let text = out.contents();
        assert!(!text.contains("Build.Web"));
        assert!(!text.contains("all done"));
        assert_eq!(
            err.contents(),
            "step group [pre] failed\n  caused by: exit 1\n"
        );
    }

    #[tokio::test]
    async fn interactive_run_flushes_queue_and_stops_timers_on_failure() {
        let (orchestrator, out, err) = orchestrator(true);
        let orchestrator = orchestrator.with_intervals(RenderIntervals {
            redraw: Duration::from_millis(5),
            spinner: Duration::from_millis(5),
        });
        let mut options = RunOptions::new("build", workspace());
        options.steps = vec![(
            Arc::new(SlowFailure) as StepRef,
            StepTarget::Workspace(workspace()),
        )];
        options.post = vec![Arc::new(Outcome("Report.All", true)) as StepRef];

        let outcome = orchestrator.run(options).await;

        assert_eq!(outcome.phase, RunPhase::Failed);
        let settled = orchestrator.view().tick();
        assert!(settled > 0);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(orchestrator.view().tick(), settled);

        let text = out.contents();
        assert!(text.contains("🧵 build"));
        assert!(text.contains("starting step Build.Slow"));
        assert!(text.contains("failed during step Build.Slow"));
        assert!(!text.contains("Report.All"));
        assert_eq!(
            err.contents(),
            "step group [build] failed\n  caused by: too slow\n"
        );
    }

    #[tokio::test]
    async fn inclusion_filters_apply_per_group() {
        let (orchestrator, out, _) = orchestrator(false);
        let mut options = RunOptions::new("build", workspace());
        options.pre = vec![Arc::new(Outcome("Clean.All", false)) as StepRef];
        options.post = vec![Arc::new(Outcome("Report.All", true)) as StepRef];
        options.inclusion.skip_pre_steps = vec!["Clean.*".to_string()];

        let outcome = orchestrator.run(options).await;

        assert!(outcome.success());
        assert_eq!(outcome.groups[0].1.skip, 1);
        assert_eq!(outcome.groups[2].1.finished, 1);
        assert!(out.contents().contains("skipped step: Clean.All"));
    }
}
