//! `SignatureTool` backed by the `git` binary in a source checkout.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use crate::provenance::{ObjectType, SignatureCheck, SignatureTool, ToolError};

/// Exit status git uses for fatal errors such as unknown revisions.
const GIT_FATAL_EXIT: i32 = 128;

#[derive(Debug, Clone)]
pub struct GitSignatureTool {
    repo_dir: PathBuf,
    program: String,
}

impl GitSignatureTool {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            program: "git".to_string(),
        }
    }

    /// Use a different git executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn run(&self, args: &[&str]) -> Result<Output, ToolError> {
        debug!(program = %self.program, ?args, "running signature tool");
        Command::new(&self.program)
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    fn failed(&self, args: &[&str], output: &Output) -> ToolError {
        ToolError::Failed {
            command: format!("{} {}", self.program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    fn verify(&self, args: &[&str]) -> Result<SignatureCheck, ToolError> {
        let output = self.run(args)?;
        if output.status.code() == Some(GIT_FATAL_EXIT) {
            return Err(self.failed(args, &output));
        }
        // `--raw` status lines go to stderr; keep stdout too for SSH output.
        let mut raw = String::from_utf8_lossy(&output.stdout).into_owned();
        raw.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(SignatureCheck::from_raw(raw, output.status.success()))
    }
}

impl SignatureTool for GitSignatureTool {
    fn tag_object_type(&self, name: &str) -> Result<Option<ObjectType>, ToolError> {
        let tag_ref = format!("refs/tags/{name}");
        let exists = self.run(&["rev-parse", "--verify", "--quiet", &tag_ref])?;
        if !exists.status.success() {
            return Ok(None);
        }

        let args = ["cat-file", "-t", tag_ref.as_str()];
        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(self.failed(&args, &output));
        }
        Ok(Some(ObjectType::parse(&String::from_utf8_lossy(
            &output.stdout,
        ))))
    }

    fn verify_tag(&self, name: &str) -> Result<SignatureCheck, ToolError> {
        self.verify(&["verify-tag", "--raw", &format!("refs/tags/{name}")])
    }

    fn verify_commit(&self, rev: &str) -> Result<SignatureCheck, ToolError> {
        // verify-commit reports unknown objects with a plain error exit, so
        // resolve first to tell "unknown" apart from "unsigned".
        let sha = self.resolve_commit(rev)?;
        self.verify(&["verify-commit", "--raw", &sha])
    }

    fn resolve_commit(&self, rev: &str) -> Result<String, ToolError> {
        let peeled = format!("{rev}^{{commit}}");
        let args = ["rev-parse", "--verify", peeled.as_str()];
        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(self.failed(&args, &output));
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if sha.is_empty() {
            return Err(self.failed(&args, &output));
        }
        Ok(sha)
    }
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
