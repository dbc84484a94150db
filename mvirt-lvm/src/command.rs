//! LVM command execution
//!
//! Every binary the reconciler may run is a variant of [`LvmTool`]. Paths are
//! resolved once at startup into [`ToolPaths`]; nothing outside the enum can be
//! invoked. Failures are handed back untouched, callers decide what they mean.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Allow-listed LVM binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LvmTool {
    VgCreate,
    VgRemove,
    Vgs,
    VgExtend,
    VgReduce,
    Pvs,
}

impl LvmTool {
    pub const ALL: [LvmTool; 6] = [
        LvmTool::VgCreate,
        LvmTool::VgRemove,
        LvmTool::Vgs,
        LvmTool::VgExtend,
        LvmTool::VgReduce,
        LvmTool::Pvs,
    ];

    pub fn binary_name(&self) -> &'static str {
        match self {
            LvmTool::VgCreate => "vgcreate",
            LvmTool::VgRemove => "vgremove",
            LvmTool::Vgs => "vgs",
            LvmTool::VgExtend => "vgextend",
            LvmTool::VgReduce => "vgreduce",
            LvmTool::Pvs => "pvs",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for LvmTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

#[derive(Debug, Error)]
#[error("unknown LVM tool '{0}' (expected one of vgcreate, vgremove, vgs, vgextend, vgreduce, pvs)")]
pub struct UnknownTool(pub String);

impl FromStr for LvmTool {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LvmTool::ALL
            .into_iter()
            .find(|tool| tool.binary_name() == s)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}

/// Binary path for every [`LvmTool`]
#[derive(Debug, Clone)]
pub struct ToolPaths {
    paths: [PathBuf; 6],
}

impl ToolPaths {
    /// Bare binary names, looked up through `PATH` at spawn time
    pub fn from_path_env() -> Self {
        Self {
            paths: LvmTool::ALL.map(|tool| PathBuf::from(tool.binary_name())),
        }
    }

    /// All binaries inside `dir` (e.g. `/usr/sbin`)
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            paths: LvmTool::ALL.map(|tool| dir.join(tool.binary_name())),
        }
    }

    pub fn with_override(mut self, tool: LvmTool, path: impl Into<PathBuf>) -> Self {
        self.paths[tool.index()] = path.into();
        self
    }

    pub fn path(&self, tool: LvmTool) -> &Path {
        &self.paths[tool.index()]
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::from_path_env()
    }
}

/// Failure to execute an LVM command
#[derive(Debug, Error)]
pub enum ExecError {
    /// The binary could not be started (missing, not executable, ...)
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: LvmTool,
        #[source]
        source: std::io::Error,
    },

    /// The binary ran and exited non-zero
    #[error("{tool} failed: {message}")]
    Failed {
        tool: LvmTool,
        code: Option<i32>,
        message: String,
    },
}

impl ExecError {
    pub fn tool(&self) -> LvmTool {
        match self {
            ExecError::Spawn { tool, .. } | ExecError::Failed { tool, .. } => *tool,
        }
    }

    /// Raw error text reported by the tool (or the OS for spawn failures)
    pub fn message(&self) -> String {
        match self {
            ExecError::Spawn { source, .. } => source.to_string(),
            ExecError::Failed { message, .. } => message.clone(),
        }
    }
}

/// Stdout on success
pub type ExecResult = Result<String, ExecError>;

/// Runs allow-listed LVM tools
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, tool: LvmTool, args: &[&str]) -> ExecResult;
}

/// Runs the real binaries as child processes
pub struct SystemRunner {
    paths: ToolPaths,
}

impl SystemRunner {
    pub fn new(paths: ToolPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, tool: LvmTool, args: &[&str]) -> ExecResult {
        let path = self.paths.path(tool);
        debug!(tool = %tool, path = %path.display(), args = ?args, "Running LVM command");

        // LVM messages are matched on ("not found"), keep them untranslated
        let output = Command::new(path)
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .await
            .map_err(|source| ExecError::Spawn { tool, source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr
            };
            debug!(tool = %tool, code = ?output.status.code(), message = %message, "LVM command failed");
            return Err(ExecError::Failed {
                tool,
                code: output.status.code(),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_roundtrip() {
        for tool in LvmTool::ALL {
            assert_eq!(tool.binary_name().parse::<LvmTool>().unwrap(), tool);
        }
    }

    #[test]
    fn test_unknown_tool_rejected() {
        assert!("rm".parse::<LvmTool>().is_err());
        assert!("lvcreate".parse::<LvmTool>().is_err());
        assert!("VGS".parse::<LvmTool>().is_err());

        let err = "/bin/sh".parse::<LvmTool>().unwrap_err();
        assert!(err.to_string().contains("/bin/sh"));
    }

    #[test]
    fn test_tool_paths() {
        let paths = ToolPaths::from_path_env();
        assert_eq!(paths.path(LvmTool::Vgs), Path::new("vgs"));

        let paths = ToolPaths::in_dir(Path::new("/usr/sbin"))
            .with_override(LvmTool::Pvs, "/opt/lvm/bin/pvs");
        assert_eq!(paths.path(LvmTool::VgCreate), Path::new("/usr/sbin/vgcreate"));
        assert_eq!(paths.path(LvmTool::Pvs), Path::new("/opt/lvm/bin/pvs"));
    }

    #[tokio::test]
    async fn test_system_runner_returns_stdout() {
        let runner = SystemRunner::new(ToolPaths::default().with_override(LvmTool::Vgs, "echo"));
        let output = runner.run(LvmTool::Vgs, &["vg01"]).await.unwrap();
        assert_eq!(output, "vg01\n");
    }

    #[tokio::test]
    async fn test_system_runner_nonzero_exit() {
        let runner = SystemRunner::new(ToolPaths::default().with_override(LvmTool::Vgs, "false"));
        let err = runner.run(LvmTool::Vgs, &["vg01"]).await.unwrap_err();
        match err {
            ExecError::Failed { tool, code, .. } => {
                assert_eq!(tool, LvmTool::Vgs);
                assert_eq!(code, Some(1));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary() {
        let runner = SystemRunner::new(ToolPaths::in_dir(Path::new("/nonexistent/mvirt-lvm")));
        let err = runner.run(LvmTool::VgCreate, &["data"]).await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { tool: LvmTool::VgCreate, .. }));
        assert!(err.to_string().starts_with("failed to run vgcreate"));
    }
}
