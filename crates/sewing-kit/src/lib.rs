//! sewing-kit - hierarchical build step engine
//!
//! Runs groups of steps through a bounded queue, lets steps submit nested
//! steps, filters steps by skip/isolate patterns, and renders progress to a
//! terminal.

pub mod command;
pub mod context;
pub mod exec;
pub mod group;
pub mod orchestrator;
pub mod provenance;
pub mod queue;
pub mod render;
pub mod step;
pub mod tracker;
pub mod ui;

pub use command::{plan_from_manifest, CommandStep};
pub use context::StepContext;
pub use group::{RunError, StepGroup};
pub use orchestrator::{Orchestrator, RenderIntervals, RunOptions, RunOutcome, RunPhase};
pub use queue::StepQueue;
pub use render::ProgressView;
pub use step::{Step, StepError, StepRef};
pub use tracker::StepTracker;
pub use ui::Ui;
