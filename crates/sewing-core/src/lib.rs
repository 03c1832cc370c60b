pub mod config;
pub mod inclusion;
pub mod manifest;
pub mod matcher;
pub mod permission;
pub mod types;

pub use config::Config;
pub use inclusion::{FlagNames, GroupKind, StepInclusion};
pub use manifest::Manifest;
pub use matcher::IdMatcher;
pub use permission::StepChecker;
pub use types::*;
