//! Running a group of steps through the step queue.
//!
//! Every top-level step is submitted to the queue; the group then waits for
//! all of them to settle before reporting the first failure. Steps may submit
//! nested steps through their [`StepContext`]; those run one after another
//! under the parent, are checked against the same filters, and are counted
//! on the parent's focused entry.

use crate::context::StepContext;
use crate::provenance;
use crate::queue::StepQueue;
use crate::render::{section, Frame, ProgressView};
use crate::step::{display_label, StepError, StepRef};
use crate::tracker::StepTracker;
use crate::ui::{timestamp, Style, Ui};
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use sewing_core::{FlagNames, LogLevel, StepChecker, StepCounts, StepRunPermission, StepTarget};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use thiserror::Error;
use tracing::debug;

type StepResult<T> = crate::step::Result<T>;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("step group [{label}] failed")]
    GroupFailed {
        label: String,
        counts: StepCounts,
        #[source]
        source: StepError,
    },
}

/// A labelled list of steps sharing one set of skip/isolate filters.
#[derive(Clone)]
pub struct StepGroup {
    pub label: String,
    pub steps: Vec<(StepRef, StepTarget)>,
    pub skip: Vec<String>,
    pub isolate: Vec<String>,
    pub flag_names: FlagNames,
    /// Log a `~` rule before the group's first line.
    pub separator: bool,
}

impl std::fmt::Debug for StepGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGroup")
            .field("label", &self.label)
            .field(
                "steps",
                &self.steps.iter().map(|(step, _)| step.id()).collect::<Vec<_>>(),
            )
            .field("skip", &self.skip)
            .field("isolate", &self.isolate)
            .finish_non_exhaustive()
    }
}

impl StepGroup {
    pub fn new(label: impl Into<String>, steps: Vec<(StepRef, StepTarget)>) -> Self {
        Self {
            label: label.into(),
            steps,
            skip: Vec::new(),
            isolate: Vec::new(),
            flag_names: FlagNames::default(),
            separator: false,
        }
    }

    #[must_use]
    pub fn with_filters(mut self, skip: Vec<String>, isolate: Vec<String>) -> Self {
        self.skip = skip;
        self.isolate = isolate;
        self
    }

    #[must_use]
    pub fn with_flag_names(mut self, flag_names: FlagNames) -> Self {
        self.flag_names = flag_names;
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: bool) -> Self {
        self.separator = separator;
        self
    }

    /// Run every step and return the group's final tally.
    pub async fn run(
        self,
        view: &Arc<ProgressView>,
        queue: &Arc<StepQueue>,
        tracker: &Arc<StepTracker>,
    ) -> Result<StepCounts, RunError> {
        if self.steps.is_empty() {
            return Ok(StepCounts::default());
        }

        let progress = Arc::new(GroupProgress::new(&self.label, self.steps.len()));
        let run = Arc::new(GroupRun {
            checker: StepChecker::new(&self.skip, &self.isolate),
            skip: self.skip,
            isolate: self.isolate,
            flag_names: self.flag_names,
            progress: Arc::clone(&progress),
            header: Once::new(),
            view: Arc::clone(view),
            queue: Arc::clone(queue),
            tracker: Arc::clone(tracker),
        });

        debug!(group = %self.label, steps = self.steps.len(), "running step group");
        view.set_active_group({
            let progress = Arc::clone(&progress);
            section(move |frame| progress.render(frame))
        });

        if self.separator {
            let ui = view.ui();
            view.log(&ui.style(Style::Subdued, ui.rule('~')), LogLevel::Info);
        }

        let submitted = self.steps.into_iter().map(|(step, target)| {
            let run = Arc::clone(&run);
            let queue = Arc::clone(queue);
            async move { queue.enqueue(run.run_step(step, target)).await }
        });
        let results = join_all(submitted).await;

        let counts = progress.counts();
        debug!(
            group = %self.label,
            finished = counts.finished,
            failed = counts.fail,
            skipped = counts.skip,
            "step group settled"
        );

        match results.into_iter().find_map(Result::err) {
            Some(source) => Err(RunError::GroupFailed {
                label: self.label,
                counts,
                source,
            }),
            None => Ok(counts),
        }
    }
}

/// A running top-level step, shown in the active group section. Nested
/// steps started under it are tallied in `counts`.
pub(crate) struct FocusedStep {
    step: StepRef,
    counts: Mutex<StepCounts>,
    content: Mutex<Option<String>>,
}

impl FocusedStep {
    fn new(step: StepRef) -> Self {
        Self {
            step,
            counts: Mutex::new(StepCounts::default()),
            content: Mutex::new(None),
        }
    }

    pub(crate) fn set_content(&self, content: Option<String>) {
        *self.content.lock() = content;
    }

    pub(crate) fn counts(&self) -> StepCounts {
        *self.counts.lock()
    }
}

/// Failure state of one running step and its ancestors. A step's entry is
/// marked only once its own `run` has returned an error.
#[derive(Debug, Default)]
pub(crate) struct Lineage {
    failed: AtomicBool,
    parent: Option<Arc<Lineage>>,
}

impl Lineage {
    fn root() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            failed: AtomicBool::new(false),
            parent: Some(Arc::clone(self)),
        })
    }

    fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    /// Whether this step or any step above it has failed.
    fn has_failed(&self) -> bool {
        let mut current = Some(self);
        while let Some(entry) = current {
            if entry.failed.load(Ordering::SeqCst) {
                return true;
            }
            current = entry.parent.as_deref();
        }
        false
    }
}

/// Counters and focused steps for one group, read by the renderer.
struct GroupProgress {
    label: String,
    counts: Mutex<StepCounts>,
    focused: Mutex<Vec<Arc<FocusedStep>>>,
}

impl GroupProgress {
    fn new(label: &str, total: usize) -> Self {
        Self {
            label: label.to_string(),
            counts: Mutex::new(StepCounts {
                total,
                ..StepCounts::default()
            }),
            focused: Mutex::new(Vec::new()),
        }
    }

    fn counts(&self) -> StepCounts {
        *self.counts.lock()
    }

    fn focus(&self, step: StepRef) -> Arc<FocusedStep> {
        let focused = Arc::new(FocusedStep::new(step));
        self.focused.lock().push(Arc::clone(&focused));
        focused
    }

    fn unfocus(&self, focused: &Arc<FocusedStep>) {
        self.focused.lock().retain(|entry| !Arc::ptr_eq(entry, focused));
    }

    fn render(&self, frame: &Frame<'_>) -> String {
        let ui = frame.ui;
        let counts = self.counts();
        let running = if counts.remaining() > 0 {
            "running"
        } else {
            "finished running"
        };
        let noun = if counts.total == 1 { "step" } else { "steps" };

        let mut out = format!(
            "{} {} {running} {} {noun} {}",
            ui.style(Style::Info, frame.spinner()),
            ui.style(Style::Emphasis, format!("[{}]", self.label)),
            counts.total,
            tally(ui, &counts),
        );

        for focused in self.focused.lock().iter() {
            out.push_str(&format!(
                "\n  {} running step {}",
                ui.style(Style::Subdued, "└"),
                ui.style(Style::Emphasis, display_label(focused.step.as_ref())),
            ));
            let nested = focused.counts();
            if nested.total > 0 {
                out.push(' ');
                out.push_str(&tally(ui, &nested));
            }
            if let Some(content) = focused.content.lock().as_deref() {
                out.push_str(&format!("\n  {content}"));
            }
        }

        out
    }
}

/// `(1 ✕, 2 ✓, 1 ⌦, 3 …)`, omitting zero counts.
fn tally(ui: &Ui, counts: &StepCounts) -> String {
    let parts: Vec<String> = [
        (counts.fail, Style::Error, "✕"),
        (counts.finished, Style::Success, "✓"),
        (counts.skip, Style::Subdued, "⌦"),
        (counts.remaining(), Style::Subdued, "…"),
    ]
    .into_iter()
    .filter(|(count, _, _)| *count > 0)
    .map(|(count, style, glyph)| ui.style(style, format!("{count} {glyph}")))
    .collect();

    format!(
        "{}{}{}",
        ui.style(Style::Subdued, "("),
        parts.join(&ui.style(Style::Subdued, ", ")),
        ui.style(Style::Subdued, ")"),
    )
}

/// Shared state of a running group. Step contexts hold onto it so nested
/// steps log and count through the same group.
pub(crate) struct GroupRun {
    checker: StepChecker,
    skip: Vec<String>,
    isolate: Vec<String>,
    flag_names: FlagNames,
    progress: Arc<GroupProgress>,
    header: Once,
    view: Arc<ProgressView>,
    queue: Arc<StepQueue>,
    tracker: Arc<StepTracker>,
}

impl GroupRun {
    pub(crate) fn view(&self) -> &ProgressView {
        &self.view
    }

    /// Log a line prefixed with a timestamp. The group label is logged once,
    /// before the first line that is actually displayed.
    pub(crate) fn log(&self, text: &str, level: LogLevel) {
        let ui = self.view.ui();
        if !ui.can_log_level(level) {
            return;
        }
        // Other callers block until the header is written.
        self.header.call_once(|| {
            self.view.log(
                &ui.style(Style::Emphasis, format!("[{}]", self.progress.label)),
                LogLevel::Info,
            );
        });
        let stamp = ui.style(Style::Subdued, format!("[{}]", timestamp()));
        self.view.log(&format!("{stamp} {text}"), level);
    }

    fn sub_step_log(&self, text: &str, parent_label: &str, level: LogLevel) {
        let suffix = self
            .view
            .ui()
            .style(Style::Subdued, format!("(started by \"{parent_label}\")"));
        self.log(&format!("{text} {suffix}"), level);
    }

    fn log_provenance(&self, step: &StepRef, target: &StepTarget) {
        if !self.view.ui().can_log_level(LogLevel::Debug) {
            return;
        }
        let text = provenance::describe(
            self.view.ui(),
            step,
            target,
            &self.tracker,
            &self.flag_names,
        );
        self.log(&text, LogLevel::Debug);
    }

    fn skip_reason(&self, permission: StepRunPermission) -> String {
        let ui = self.view.ui();
        if permission == StepRunPermission::Excluded {
            format!(
                "skip reason: not isolated in isolate patterns: {}",
                ui.style(Style::Code, self.isolate.join(" "))
            )
        } else {
            format!(
                "skip reason: omitted by skip patterns: {}",
                ui.style(Style::Code, self.skip.join(" "))
            )
        }
    }

    fn check(&self, step: &StepRef) -> StepRunPermission {
        let permission = self.checker.check(step.id());
        debug!(step = %step.id(), permission = permission.as_str(), "checked step");
        permission
    }

    async fn run_step(self: Arc<Self>, step: StepRef, target: StepTarget) -> StepResult<()> {
        let ui = self.view.ui();
        let label = ui.style(Style::Info, display_label(step.as_ref()));

        self.log(&format!("starting step {label}"), LogLevel::Info);
        self.log_provenance(&step, &target);

        let permission = self.check(&step);
        if !permission.runs() {
            self.progress.counts.lock().skip += 1;
            self.log(&format!("skipped step: {label}"), LogLevel::Info);
            self.log(&self.skip_reason(permission), LogLevel::Debug);
            return Ok(());
        }

        let focused = self.progress.focus(Arc::clone(&step));
        let lineage = Lineage::root();
        let ctx = StepContext::new(
            Arc::clone(&self),
            Arc::clone(&step),
            target,
            Arc::clone(&focused),
            Arc::clone(&lineage),
        );
        let result = step.run(ctx).await;
        self.progress.unfocus(&focused);

        match result {
            Ok(()) => {
                self.progress.counts.lock().finished += 1;
                self.log(&format!("finished step {label}"), LogLevel::Info);
                Ok(())
            }
            Err(err) => {
                lineage.mark_failed();
                self.progress.counts.lock().fail += 1;
                let line = format!(
                    "failed during step {}",
                    ui.style(Style::Error, display_label(step.as_ref()))
                );
                self.log(&line, LogLevel::Errors);
                self.view.alert(&line, LogLevel::Errors);
                debug!(step = %step.id(), error = %err, "step failed");
                Err(err)
            }
        }
    }

    /// Run `steps` one after another under `parent`. Each child goes through
    /// the queue, which runs it inline when the caller already holds a slot.
    /// The first failing child ends the loop; later calls start fresh unless
    /// the parent itself, or one of its ancestors, has already failed.
    pub(crate) fn run_nested<'a>(
        self: &'a Arc<Self>,
        parent: &'a StepRef,
        focused: &'a Arc<FocusedStep>,
        lineage: &'a Arc<Lineage>,
        steps: Vec<StepRef>,
        target: StepTarget,
    ) -> BoxFuture<'a, StepResult<()>> {
        async move {
            if steps.is_empty() {
                return Ok(());
            }

            focused.counts.lock().total += steps.len();
            let ui = self.view.ui();
            let parent_label = display_label(parent.as_ref()).to_string();

            for child in steps {
                if lineage.has_failed() {
                    return Err(StepError::AncestorFailed(child.id().to_string()));
                }

                self.tracker.set_parent(&child, parent);
                let label = ui.style(Style::Info, display_label(child.as_ref()));
                self.sub_step_log(
                    &format!("starting sub-step {label}"),
                    &parent_label,
                    LogLevel::Info,
                );
                self.log_provenance(&child, &target);

                let permission = self.check(&child);
                if !permission.runs() {
                    focused.counts.lock().skip += 1;
                    self.sub_step_log(
                        &format!("skipped sub-step {label}"),
                        &parent_label,
                        LogLevel::Info,
                    );
                    self.log(&self.skip_reason(permission), LogLevel::Debug);
                    continue;
                }

                let child_lineage = lineage.child();
                let ctx = StepContext::new(
                    Arc::clone(self),
                    Arc::clone(&child),
                    target.clone(),
                    Arc::clone(focused),
                    Arc::clone(&child_lineage),
                );
                let result = self.queue.enqueue(child.run(ctx)).await;

                match result {
                    Ok(()) => {
                        focused.counts.lock().finished += 1;
                        self.sub_step_log(
                            &format!("finished sub-step {label}"),
                            &parent_label,
                            LogLevel::Info,
                        );
                    }
                    Err(err) => {
                        focused.counts.lock().fail += 1;
                        child_lineage.mark_failed();
                        self.sub_step_log(
                            &format!(
                                "failed during sub-step {}",
                                ui.style(Style::Error, display_label(child.as_ref()))
                            ),
                            &parent_label,
                            LogLevel::Errors,
                        );
                        return Err(err);
                    }
                }
            }

            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;
    use crate::ui::SharedBuffer;
    use async_trait::async_trait;
    use sewing_core::Workspace;
    use std::path::PathBuf;

    struct Scripted {
        id: &'static str,
        fail: bool,
        nested: Vec<StepRef>,
    }

    #[async_trait]
    impl Step for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn run(&self, ctx: StepContext) -> StepResult<()> {
            ctx.run_nested(self.nested.clone()).await?;
            if self.fail {
                return Err(StepError::Failed(format!("{} broke", self.id)));
            }
            Ok(())
        }
    }

    fn leaf(id: &'static str) -> StepRef {
        Arc::new(Scripted {
            id,
            fail: false,
            nested: Vec::new(),
        })
    }

    fn failing(id: &'static str) -> StepRef {
        Arc::new(Scripted {
            id,
            fail: true,
            nested: Vec::new(),
        })
    }

    fn target() -> StepTarget {
        StepTarget::Workspace(Workspace {
            name: "ws".to_string(),
            root: PathBuf::from("."),
        })
    }

    fn harness(level: LogLevel) -> (Arc<ProgressView>, Arc<StepQueue>, Arc<StepTracker>, SharedBuffer) {
        let out = SharedBuffer::new();
        let ui = Ui::with_writers(
            Box::new(out.clone()),
            Box::new(SharedBuffer::new()),
            level,
            false,
            10,
        );
        (
            Arc::new(ProgressView::new(Arc::new(ui), false)),
            Arc::new(StepQueue::new(2)),
            Arc::new(StepTracker::new()),
            out,
        )
    }

    #[tokio::test]
    async fn empty_group_is_a_no_op() {
        let (view, queue, tracker, out) = harness(LogLevel::Debug);
        let counts = StepGroup::new("main", Vec::new())
            .run(&view, &queue, &tracker)
            .await
            .unwrap();
        assert_eq!(counts, StepCounts::default());
        assert!(out.contents().is_empty());
    }

    #[tokio::test]
    async fn skipped_steps_are_counted_not_run() {
        let (view, queue, tracker, out) = harness(LogLevel::Info);
        let steps = vec![(leaf("Build.Web"), target()), (failing("Test.Web"), target())];
        let counts = StepGroup::new("main", steps)
            .with_filters(vec!["Test.*".to_string()], Vec::new())
            .run(&view, &queue, &tracker)
            .await
            .unwrap();

        assert_eq!(counts.finished, 1);
        assert_eq!(counts.skip, 1);
        assert_eq!(counts.fail, 0);
        let text = out.contents();
        assert!(text.starts_with("[main]\n"));
        assert!(text.contains("skipped step: Test.Web"));
        assert!(!text.contains("skip reason"));
    }

    #[tokio::test]
    async fn failure_surfaces_after_siblings_settle() {
        let (view, queue, tracker, out) = harness(LogLevel::Info);
        let steps = vec![
            (failing("A.One"), target()),
            (leaf("A.Two"), target()),
            (leaf("A.Three"), target()),
        ];
        let err = StepGroup::new("main", steps)
            .run(&view, &queue, &tracker)
            .await
            .unwrap_err();

        let RunError::GroupFailed { label, counts, source } = err;
        assert_eq!(label, "main");
        assert_eq!(counts.fail, 1);
        assert_eq!(counts.finished, 2);
        assert!(source.to_string().contains("A.One broke"));
        let text = out.contents();
        assert!(text.starts_with("[main]\n"));
        assert_eq!(text.lines().filter(|line| *line == "[main]").count(), 1);
        assert!(text.contains("failed during step A.One"));
        assert_eq!(view.alerts(), vec!["failed during step A.One".to_string()]);
    }

    #[tokio::test]
    async fn nested_steps_record_parents_and_skip_independently() {
        let (view, queue, tracker, out) = harness(LogLevel::Info);
        let compile = leaf("Web.Build.Compile");
        let types = leaf("Web.Build.Types");
        let parent: StepRef = Arc::new(Scripted {
            id: "Web.Build",
            fail: false,
            nested: vec![Arc::clone(&compile), Arc::clone(&types)],
        });

        let counts = StepGroup::new("main", vec![(Arc::clone(&parent), target())])
            .with_filters(vec!["Web.Build.Types".to_string()], Vec::new())
            .run(&view, &queue, &tracker)
            .await
            .unwrap();

        assert_eq!(counts.finished, 1);
        let recorded = tracker.parent(&compile).unwrap();
        assert!(Arc::ptr_eq(&recorded, &parent));
        let text = out.contents();
        assert!(text.contains("finished sub-step Web.Build.Compile (started by \"Web.Build\")"));
        assert!(text.contains("skipped sub-step Web.Build.Types (started by \"Web.Build\")"));
        assert!(!text.contains("finished sub-step Web.Build.Types"));
    }

    #[tokio::test]
    async fn nested_failure_stops_remaining_siblings() {
        let (view, queue, tracker, out) = harness(LogLevel::Info);
        let parent: StepRef = Arc::new(Scripted {
            id: "Web.Build",
            fail: false,
            nested: vec![failing("Web.Build.Compile"), leaf("Web.Build.Types")],
        });

        let err = StepGroup::new("main", vec![(parent, target())])
            .run(&view, &queue, &tracker)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::GroupFailed { counts, .. } if counts.fail == 1));
        let text = out.contents();
        assert!(text.contains("failed during sub-step Web.Build.Compile"));
        assert!(!text.contains("starting sub-step Web.Build.Types"));
    }

    struct Flaky {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Step for Flaky {
        fn id(&self) -> &str {
            "App.Flaky"
        }

        async fn run(&self, _ctx: StepContext) -> StepResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StepError::Failed("first attempt".to_string()));
            }
            Ok(())
        }
    }

    struct Retrying {
        child: StepRef,
    }

    #[async_trait]
    impl Step for Retrying {
        fn id(&self) -> &str {
            "App.Parent"
        }

        async fn run(&self, ctx: StepContext) -> StepResult<()> {
            if ctx.run_nested(vec![Arc::clone(&self.child)]).await.is_err() {
                ctx.run_nested(vec![Arc::clone(&self.child)]).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn parent_can_retry_a_failed_child() {
        let (view, queue, tracker, out) = harness(LogLevel::Info);
        let flaky = Arc::new(Flaky {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let child: StepRef = Arc::clone(&flaky) as StepRef;
        let parent: StepRef = Arc::new(Retrying { child });

        let counts = StepGroup::new("main", vec![(parent, target())])
            .run(&view, &queue, &tracker)
            .await
            .unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert_eq!((counts.finished, counts.fail), (1, 0));
        let text = out.contents();
        assert!(text.contains("failed during sub-step App.Flaky"));
        assert!(text.contains("finished sub-step App.Flaky"));
    }

    #[test]
    fn lineage_failure_reaches_descendants_only() {
        let root = Lineage::root();
        let child = root.child();
        let grandchild = child.child();

        child.mark_failed();
        assert!(!root.has_failed());
        assert!(child.has_failed());
        assert!(grandchild.has_failed());
    }

    #[tokio::test]
    async fn debug_level_logs_provenance_and_skip_reason() {
        let (view, queue, tracker, out) = harness(LogLevel::Debug);
        let steps = vec![(leaf("Build.Web"), target())];
        StepGroup::new("main", steps)
            .with_filters(Vec::new(), vec!["Test.*".to_string()])
            .with_flag_names(FlagNames::new("--skip-step", "--isolate-step"))
            .run(&view, &queue, &tracker)
            .await
            .unwrap();

        let text = out.contents();
        assert!(text.contains("reason for step Build.Web (Build.Web):"));
        assert!(text.contains("to skip this step, add --skip-step Build.Web to your command."));
        assert!(text.contains("skip reason: not isolated in isolate patterns: Test.*"));
    }

    #[test]
    fn status_line_summarizes_counts() {
        let ui = Ui::with_writers(
            Box::new(SharedBuffer::new()),
            Box::new(SharedBuffer::new()),
            LogLevel::Info,
            false,
            10,
        );
        let progress = GroupProgress::new("build", 4);
        {
            let mut counts = progress.counts.lock();
            counts.finished = 1;
            counts.skip = 1;
        }
        let focused = progress.focus(leaf("Web.Build"));
        focused.set_content(Some("compiling".to_string()));

        let frame = Frame { ui: &ui, tick: 0 };
        assert_eq!(
            progress.render(&frame),
            "⠄ [build] running 4 steps (1 ✓, 1 ⌦, 2 …)\n  └ running step Web.Build\n  compiling"
        );

        progress.unfocus(&focused);
        {
            let mut counts = progress.counts.lock();
            counts.finished = 3;
        }
        assert_eq!(
            progress.render(&frame),
            "⠄ [build] finished running 4 steps (3 ✓, 1 ⌦)"
        );
    }
}
