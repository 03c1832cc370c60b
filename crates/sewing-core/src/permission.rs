//! Deciding whether a step runs under the skip and isolate filters.

use crate::matcher::IdMatcher;
use crate::types::{is_core_id, StepRunPermission};

/// Compiled skip/isolate filters for one step group.
#[derive(Debug, Clone, Default)]
pub struct StepChecker {
    skip: Option<IdMatcher>,
    isolate: Option<IdMatcher>,
}

impl StepChecker {
    pub fn new<S: AsRef<str>>(skip: &[S], isolate: &[S]) -> Self {
        Self {
            skip: IdMatcher::compile(skip),
            isolate: IdMatcher::compile(isolate),
        }
    }

    /// Check a step identifier.
    ///
    /// Reserved-namespace ids always get [`StepRunPermission::Default`]. An
    /// isolate filter excludes everything it does not match before the skip
    /// filter is consulted.
    pub fn check(&self, id: &str) -> StepRunPermission {
        if is_core_id(id) {
            return StepRunPermission::Default;
        }

        let isolated = match &self.isolate {
            Some(isolate) if !isolate.matches(id) => return StepRunPermission::Excluded,
            Some(_) => true,
            None => false,
        };

        match &self.skip {
            Some(skip) if skip.matches(id) => StepRunPermission::Skipped,
            Some(_) if isolated => StepRunPermission::IsolatedAndNotSkipped,
            Some(_) => StepRunPermission::NotSkipped,
            None if isolated => StepRunPermission::Isolated,
            None => StepRunPermission::Default,
        }
    }
}
