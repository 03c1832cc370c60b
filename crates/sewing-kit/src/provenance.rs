//! The "reason for step" debug block logged before a step runs.

use crate::step::{display_label, StepRef};
use crate::tracker::StepTracker;
use crate::ui::{Style, Ui};
use sewing_core::{is_core_id, FlagNames, StepTarget};

fn key(name: &str) -> String {
    format!("{:<8}", format!("{name}:"))
}

/// Describe where a step came from, what it targets, and how to skip or
/// isolate it.
pub fn describe(
    ui: &Ui,
    step: &StepRef,
    target: &StepTarget,
    tracker: &StepTracker,
    flags: &FlagNames,
) -> String {
    let mut out = format!(
        "reason for step {} {}:\n\n  {}{}\n  {}{}",
        ui.style(Style::Info, display_label(step.as_ref())),
        ui.style(Style::Subdued, format!("({})", step.id())),
        ui.style(Style::Subdued, key("target")),
        describe_target(ui, target),
        ui.style(Style::Subdued, key("source")),
        describe_source(ui, step, tracker),
    );

    let hints = flag_hints(ui, step, tracker, flags);
    if !hints.is_empty() {
        out.push_str("\n\n");
        out.push_str(&hints.join("\n"));
    }
    out
}

fn describe_target(ui: &Ui, target: &StepTarget) -> String {
    let root = ui.style(Style::Subdued, format!("({})", target.root().display()));
    match target {
        StepTarget::Workspace(workspace) => format!(
            "workspace {} {root}",
            ui.style(Style::Emphasis, &workspace.name)
        ),
        StepTarget::Project(project) => format!("{} {root}", project.name),
    }
}

fn describe_source(ui: &Ui, step: &StepRef, tracker: &StepTracker) -> String {
    match tracker.source(step) {
        Some(chain) => {
            let (root, rest) = chain.split_first().map_or(("", &[][..]), |(root, rest)| {
                (root.as_str(), rest)
            });
            let kind = if rest.is_empty() { "plugin" } else { "plugin chain" };
            let rest: String = rest.iter().map(|plugin| format!(" > {plugin}")).collect();
            format!("{kind} {}{rest}", ui.style(Style::Emphasis, root))
        }
        None if is_core_id(step.id()) => format!(
            "created by sewing-kit {}",
            ui.style(Style::Subdued, "(can't be skipped)")
        ),
        None => "declared by the workspace".to_string(),
    }
}

/// Step id followed by every non-reserved ancestor id, nearest first.
pub fn isolate_content(step: &StepRef, tracker: &StepTracker) -> String {
    std::iter::once(step.id().to_string())
        .chain(
            tracker
                .ancestors(step)
                .iter()
                .map(|ancestor| ancestor.id())
                .filter(|id| !is_core_id(id))
                .map(str::to_string),
        )
        .collect::<Vec<_>>()
        .join(",")
}

fn flag_hints(ui: &Ui, step: &StepRef, tracker: &StepTracker, flags: &FlagNames) -> Vec<String> {
    if is_core_id(step.id()) {
        return Vec::new();
    }

    let mut hints = Vec::new();
    if let Some(skip) = &flags.skip {
        hints.push(format!(
            "to skip this step, add {} to your command.",
            ui.style(Style::Code, format!("{skip} {}", step.id()))
        ));
    }
    if let Some(isolate) = &flags.isolate {
        hints.push(format!(
            "to isolate this step, add {} to your command.",
            ui.style(
                Style::Code,
                format!("{isolate} {}", isolate_content(step, tracker))
            )
        ));
    }
    hints
}
