//! The step contract.

use crate::context::StepContext;
use crate::exec::ExecError;
use async_trait::async_trait;
use sewing_core::StepResources;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("{0}")]
    Failed(String),
    #[error("not starting {0}: an ancestor step already failed")]
    AncestorFailed(String),
}

pub type Result<T> = std::result::Result<T, StepError>;

/// A unit of orchestrated work.
///
/// Steps are immutable descriptors shared behind [`StepRef`]. The engine keys
/// its bookkeeping (ancestry, plugin sources) on the `Arc` allocation, so the
/// same step value can be reused across runs.
#[async_trait]
pub trait Step: Send + Sync {
    /// Hierarchical dot-separated id, e.g. `SewingKit.BuildPackage.Compile`.
    fn id(&self) -> &str;

    fn label(&self) -> Option<&str> {
        None
    }

    /// Declared resource needs. Not used for scheduling.
    fn resources(&self) -> StepResources {
        StepResources::default()
    }

    async fn run(&self, ctx: StepContext) -> Result<()>;
}

pub type StepRef = Arc<dyn Step>;

/// Label for display, falling back to the id.
pub fn display_label(step: &dyn Step) -> &str {
    step.label().unwrap_or_else(|| step.id())
}

/// Identity of a step allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepKey(usize);

impl StepKey {
    pub fn of(step: &StepRef) -> Self {
        Self(Arc::as_ptr(step).cast::<()>() as usize)
    }
}
