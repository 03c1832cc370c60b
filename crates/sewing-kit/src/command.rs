//! Steps declared in a manifest.
//!
//! A [`CommandStep`] runs its shell command in the target root and then
//! submits its declared children as nested steps against the same target.

use crate::context::StepContext;
use crate::exec;
use crate::orchestrator::RunOptions;
use crate::render::ProgressView;
use crate::step::{Result, Step, StepRef};
use crate::tracker::StepTracker;
use crate::ui::Style;
use async_trait::async_trait;
use sewing_core::manifest::StepDecl;
use sewing_core::{GroupKind, LogLevel, Manifest, StepInclusion, StepResources};
use std::sync::Arc;
use tracing::debug;

pub struct CommandStep {
    id: String,
    label: Option<String>,
    command: Option<String>,
    indefinite: bool,
    resources: StepResources,
    nested: Vec<StepRef>,
}

impl std::fmt::Debug for CommandStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStep")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("indefinite", &self.indefinite)
            .field(
                "nested",
                &self.nested.iter().map(|step| step.id()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl CommandStep {
    /// Build a step tree from a declaration, registering plugin sources
    /// from the manifest as it goes.
    pub fn from_decl(decl: &StepDecl, manifest: &Manifest, tracker: &StepTracker) -> StepRef {
        let nested = decl
            .nested
            .iter()
            .map(|child| Self::from_decl(child, manifest, tracker))
            .collect();

        let step: StepRef = Arc::new(Self {
            id: decl.id.clone(),
            label: decl.label.clone(),
            command: decl.run.clone(),
            indefinite: decl.indefinite,
            resources: decl.resources,
            nested,
        });

        if let Some(plugins) = manifest.source_for(&decl.id) {
            tracker.set_source(&step, plugins.to_vec());
        }
        step
    }
}

#[async_trait]
impl Step for CommandStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn resources(&self) -> StepResources {
        self.resources
    }

    async fn run(&self, ctx: StepContext) -> Result<()> {
        if let Some(command) = &self.command {
            if self.indefinite {
                let command = command.clone();
                let root = ctx.target().root().to_path_buf();
                let reporter = ctx.clone();
                ctx.indefinite(async move {
                    if let Err(err) = exec::shell(&command, &root).await {
                        debug!(
                            step = %reporter.step_id(),
                            error = %err,
                            "indefinite command failed"
                        );
                        reporter.log(
                            &format!("indefinite command failed: {err}"),
                            LogLevel::Errors,
                        );
                    }
                });
            } else {
                let output = ctx.shell(command).await?;
                debug!(step = %self.id, duration_ms = output.duration_ms, "command finished");
                let stdout = output.stdout.trim_end();
                if !stdout.is_empty() {
                    ctx.log(stdout, LogLevel::Debug);
                }
            }
        }

        ctx.run_nested(self.nested.clone()).await
    }
}

/// Turn a manifest into run options. Pre and post steps target the
/// workspace; main steps target their declared project, if any.
pub fn plan_from_manifest(
    manifest: &Manifest,
    tracker: &StepTracker,
    inclusion: StepInclusion,
) -> RunOptions {
    let build = |group: GroupKind| -> Vec<StepRef> {
        manifest
            .group(group)
            .iter()
            .map(|decl| CommandStep::from_decl(decl, manifest, tracker))
            .collect()
    };

    let mut options = RunOptions::new(manifest.title.clone(), manifest.workspace());
    options.pre = build(GroupKind::Pre);
    options.post = build(GroupKind::Post);
    options.steps = manifest
        .steps
        .iter()
        .map(|decl| {
            (
                CommandStep::from_decl(decl, manifest, tracker),
                manifest.target_for(decl),
            )
        })
        .collect();
    options.inclusion = inclusion;

    if let Some(epilogue) = manifest.epilogue.clone() {
        options.epilogue = Some(Box::new(move |view: &ProgressView| {
            let ui = view.ui();
            view.log(&ui.style(Style::Success, &epilogue), LogLevel::Info);
        }));
    }

    options
}
