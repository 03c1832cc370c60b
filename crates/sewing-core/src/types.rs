//! Core types shared by the step engine and the CLI.
//!
//! Steps themselves are trait objects owned by the engine crate; this module
//! holds the plain data that describes them: where they run, how loud a log
//! line is, and what the permission checker decided.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identifier prefix reserved for the engine's own steps.
///
/// Steps in this namespace are never skipped, excluded, or offered as
/// skip/isolate hints.
pub const RESERVED_PREFIX: &str = "SewingKit.";

/// Returns true when `id` belongs to the reserved namespace.
pub fn is_core_id(id: &str) -> bool {
    id.starts_with(RESERVED_PREFIX)
}

// --- Targets ---

/// The whole workspace a run operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    pub root: PathBuf,
}

/// A single project inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
}

/// What a step operates on. Purely descriptive; used for logging and as the
/// working directory for commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepTarget {
    Workspace(Workspace),
    Project(Project),
}

impl StepTarget {
    pub fn name(&self) -> &str {
        match self {
            Self::Workspace(workspace) => &workspace.name,
            Self::Project(project) => &project.name,
        }
    }

    pub fn root(&self) -> &Path {
        match self {
            Self::Workspace(workspace) => &workspace.root,
            Self::Project(project) => &project.root,
        }
    }

    pub fn is_workspace(&self) -> bool {
        matches!(self, Self::Workspace(_))
    }
}

impl From<Workspace> for StepTarget {
    fn from(workspace: Workspace) -> Self {
        Self::Workspace(workspace)
    }
}

impl From<Project> for StepTarget {
    fn from(project: Project) -> Self {
        Self::Project(project)
    }
}

// --- Enumerations ---

/// Verbosity of a log line. A line is shown when the display level is at
/// least the line's level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Errors,
    Warnings,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Errors => "errors",
            Self::Warnings => "warnings",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    /// Parse a level name as written in config files and CLI flags.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "errors" | "error" => Some(Self::Errors),
            "warnings" | "warning" | "warn" => Some(Self::Warnings),
            "info" => Some(Self::Info),
            "debug" | "verbose" => Some(Self::Debug),
            _ => None,
        }
    }

    /// Whether a line at `level` passes a display threshold of `self`.
    pub fn allows(self, level: LogLevel) -> bool {
        self >= level
    }
}

/// Whether the live progress view is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractiveMode {
    /// Draw only when stdout is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl InteractiveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Always => "always",
            Self::Never => "never",
        }
    }

    pub fn resolve(self, is_terminal: bool) -> bool {
        match self {
            Self::Auto => is_terminal,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// Outcome of checking a step against the skip and isolate filters.
///
/// Only [`StepRunPermission::Skipped`] and [`StepRunPermission::Excluded`]
/// prevent a step from running; the remaining variants exist so log lines can
/// say why a step ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepRunPermission {
    Default,
    Skipped,
    NotSkipped,
    Excluded,
    Isolated,
    IsolatedAndNotSkipped,
}

impl StepRunPermission {
    pub fn runs(self) -> bool {
        !matches!(self, Self::Skipped | Self::Excluded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Skipped => "skipped",
            Self::NotSkipped => "not_skipped",
            Self::Excluded => "excluded",
            Self::Isolated => "isolated",
            Self::IsolatedAndNotSkipped => "isolated_and_not_skipped",
        }
    }
}

// --- Step data ---

/// Resources a step declares it needs.
///
/// Carried for reporting only: the step queue schedules by slot count and
/// never weighs these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepResources {
    pub cpu: Option<u32>,
    /// Megabytes.
    pub memory: Option<u64>,
}

/// Running tally for a set of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepCounts {
    pub finished: usize,
    pub fail: usize,
    pub skip: usize,
    pub total: usize,
}

impl StepCounts {
    pub fn resolved(&self) -> usize {
        self.finished + self.fail + self.skip
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.resolved())
    }
}
