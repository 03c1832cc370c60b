//! Skip and isolate filters for the three step groups of a run.

use serde::{Deserialize, Serialize};

/// Which group of a run a filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Pre,
    Main,
    Post,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Main => "main",
            Self::Post => "post",
        }
    }

    /// The CLI flags that control this group, for log hints.
    pub fn flag_names(self) -> FlagNames {
        match self {
            Self::Pre => FlagNames::new("--skip-pre-step", "--isolate-pre-step"),
            Self::Main => FlagNames::new("--skip-step", "--isolate-step"),
            Self::Post => FlagNames::new("--skip-post-step", "--isolate-post-step"),
        }
    }
}

/// Flag names shown in "to skip this step, add ..." hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagNames {
    pub skip: Option<String>,
    pub isolate: Option<String>,
}

impl FlagNames {
    pub fn new(skip: impl Into<String>, isolate: impl Into<String>) -> Self {
        Self {
            skip: Some(skip.into()),
            isolate: Some(isolate.into()),
        }
    }
}

/// Skip/isolate patterns for every group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepInclusion {
    pub skip_pre_steps: Vec<String>,
    pub isolate_pre_steps: Vec<String>,
    pub skip_steps: Vec<String>,
    pub isolate_steps: Vec<String>,
    pub skip_post_steps: Vec<String>,
    pub isolate_post_steps: Vec<String>,
}

impl StepInclusion {
    pub fn skip(&self, group: GroupKind) -> &[String] {
        match group {
            GroupKind::Pre => &self.skip_pre_steps,
            GroupKind::Main => &self.skip_steps,
            GroupKind::Post => &self.skip_post_steps,
        }
    }

    pub fn isolate(&self, group: GroupKind) -> &[String] {
        match group {
            GroupKind::Pre => &self.isolate_pre_steps,
            GroupKind::Main => &self.isolate_steps,
            GroupKind::Post => &self.isolate_post_steps,
        }
    }

    pub fn skip_mut(&mut self, group: GroupKind) -> &mut Vec<String> {
        match group {
            GroupKind::Pre => &mut self.skip_pre_steps,
            GroupKind::Main => &mut self.skip_steps,
            GroupKind::Post => &mut self.skip_post_steps,
        }
    }

    pub fn isolate_mut(&mut self, group: GroupKind) -> &mut Vec<String> {
        match group {
            GroupKind::Pre => &mut self.isolate_pre_steps,
            GroupKind::Main => &mut self.isolate_steps,
            GroupKind::Post => &mut self.isolate_post_steps,
        }
    }

    /// Replace each non-empty list in `other` into `self`. Lists given on the
    /// command line win over lists from config files.
    pub fn override_with(&mut self, other: &StepInclusion) {
        for group in [GroupKind::Pre, GroupKind::Main, GroupKind::Post] {
            if !other.skip(group).is_empty() {
                *self.skip_mut(group) = other.skip(group).to_vec();
            }
            if !other.isolate(group).is_empty() {
                *self.isolate_mut(group) = other.isolate(group).to_vec();
            }
        }
    }
}

/// Split flag values on commas and whitespace, dropping empty fragments.
pub fn parse_patterns<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| {
            value
                .as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}
