//! Step manifest: the declarative list of steps a run executes.
//!
//! ```toml
//! title = "build"
//! epilogue = "build completed successfully!"
//!
//! [workspace]
//! name = "my-app"
//!
//! [[projects]]
//! name = "web"
//! root = "packages/web"
//!
//! [[steps]]
//! id = "Web.Build"
//! label = "build web"
//! project = "web"
//! run = "make build"
//!
//!   [[steps.nested]]
//!   id = "Web.Build.Compile"
//!   run = "make compile"
//! ```

use crate::inclusion::GroupKind;
use crate::types::{Project, StepResources, StepTarget, Workspace};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("step id must not be empty")]
    EmptyId,
    #[error("duplicate step id: {0}")]
    DuplicateId(String),
    #[error("step {step} references unknown project {project}")]
    UnknownProject { step: String, project: String },
    #[error("step {0} is a {1} step; only main steps may target a project")]
    ProjectOutsideMain(String, &'static str),
    #[error("nested step {0} may not target a project; it runs against its parent's target")]
    ProjectOnNested(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceDecl {
    pub name: Option<String>,
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDecl {
    pub name: String,
    pub root: PathBuf,
}

/// A declared step. `run` is a shell command; `nested` steps are submitted
/// by this step after its command succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDecl {
    pub id: String,
    pub label: Option<String>,
    pub run: Option<String>,
    pub project: Option<String>,
    /// Start the command without waiting for it.
    pub indefinite: bool,
    pub resources: StepResources,
    pub nested: Vec<StepDecl>,
}

/// Which plugins produced a step, root plugin first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDecl {
    pub step: String,
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub title: String,
    pub epilogue: Option<String>,
    pub workspace: WorkspaceDecl,
    pub projects: Vec<ProjectDecl>,
    pub pre: Vec<StepDecl>,
    pub steps: Vec<StepDecl>,
    pub post: Vec<StepDecl>,
    pub sources: Vec<SourceDecl>,
    /// Directory the manifest was read from; relative roots resolve here.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// A declared step flattened out of the tree, for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedStep<'a> {
    pub group: GroupKind,
    pub depth: usize,
    pub step: &'a StepDecl,
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::parse(&content, base_dir)
    }

    pub fn parse(content: &str, base_dir: PathBuf) -> Result<Self> {
        let mut manifest: Manifest = toml::from_str(content)?;
        manifest.base_dir = base_dir;
        if manifest.title.is_empty() {
            manifest.title = "run".to_string();
        }
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let projects: HashSet<&str> = self.projects.iter().map(|p| p.name.as_str()).collect();
        let mut seen = HashSet::new();

        for listed in self.all_steps() {
            let step = listed.step;
            if step.id.trim().is_empty() {
                return Err(ManifestError::EmptyId);
            }
            if !seen.insert(step.id.as_str()) {
                return Err(ManifestError::DuplicateId(step.id.clone()));
            }
            if let Some(project) = &step.project {
                if listed.depth > 0 {
                    return Err(ManifestError::ProjectOnNested(step.id.clone()));
                }
                if listed.group != GroupKind::Main {
                    return Err(ManifestError::ProjectOutsideMain(
                        step.id.clone(),
                        listed.group.as_str(),
                    ));
                }
                if !projects.contains(project.as_str()) {
                    return Err(ManifestError::UnknownProject {
                        step: step.id.clone(),
                        project: project.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn group(&self, group: GroupKind) -> &[StepDecl] {
        match group {
            GroupKind::Pre => &self.pre,
            GroupKind::Main => &self.steps,
            GroupKind::Post => &self.post,
        }
    }

    /// Every declared step, depth-first, in declaration order.
    pub fn all_steps(&self) -> Vec<ListedStep<'_>> {
        fn walk<'a>(
            group: GroupKind,
            depth: usize,
            steps: &'a [StepDecl],
            out: &mut Vec<ListedStep<'a>>,
        ) {
            for step in steps {
                out.push(ListedStep { group, depth, step });
                walk(group, depth + 1, &step.nested, out);
            }
        }

        let mut out = Vec::new();
        for group in [GroupKind::Pre, GroupKind::Main, GroupKind::Post] {
            walk(group, 0, self.group(group), &mut out);
        }
        out
    }

    pub fn workspace(&self) -> Workspace {
        let root = match &self.workspace.root {
            Some(root) => self.resolve(root),
            None => self.base_dir.clone(),
        };
        let name = self.workspace.name.clone().unwrap_or_else(|| {
            root.file_name()
                .map_or_else(|| "workspace".to_string(), |n| n.to_string_lossy().into_owned())
        });
        Workspace { name, root }
    }

    /// Target for a top-level or nested declaration. Steps without a project
    /// run against the workspace.
    pub fn target_for(&self, step: &StepDecl) -> StepTarget {
        step.project
            .as_deref()
            .and_then(|name| self.projects.iter().find(|p| p.name == name))
            .map_or_else(
                || StepTarget::Workspace(self.workspace()),
                |project| {
                    StepTarget::Project(Project {
                        name: project.name.clone(),
                        root: self.resolve(&project.root),
                    })
                },
            )
    }

    /// Plugin chain recorded for a step id, root plugin first.
    pub fn source_for(&self, id: &str) -> Option<&[String]> {
        self.sources
            .iter()
            .find(|source| source.step == id)
            .map(|source| source.plugins.as_slice())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.base_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }
}
