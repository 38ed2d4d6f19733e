//! Command execution: shell spawning with tee'd output capture, and the
//! per-session log directory layout.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

/// Separator between records in the command execution log.
const RECORD_SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// Executes one command and reports its exit code. The engine only ever
/// talks to this trait; tests substitute a scripted implementation.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `cmd` under a shell with `env` exported, capturing output into
    /// `log_path` and, when `tee_to_stdout` is set, mirroring it to the
    /// terminal. Returns the child's exit code.
    async fn run(
        &self,
        cmd: &str,
        env: &BTreeMap<String, String>,
        log_path: &Path,
        tee_to_stdout: bool,
    ) -> Result<i32>;
}

/// Real implementation: `sh -c`, line-buffered tee preserving the child's
/// exit status.
pub struct ShellRunner;

#[async_trait]
impl Runner for ShellRunner {
    async fn run(
        &self,
        cmd: &str,
        env: &BTreeMap<String, String>,
        log_path: &Path,
        tee_to_stdout: bool,
    ) -> Result<i32> {
        debug!(command = %cmd, log = %log_path.display(), "spawning shell");

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn shell for: {cmd}"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("child stderr not captured"))?;

        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;
        let log = Arc::new(Mutex::new(log));

        let out_task = tee_lines(stdout, log.clone(), tee_to_stdout, false);
        let err_task = tee_lines(stderr, log.clone(), tee_to_stdout, true);
        let (out_res, err_res, status) = tokio::join!(out_task, err_task, child.wait());
        out_res?;
        err_res?;

        let status = status.context("failed to wait for child")?;
        log.lock().await.flush().await.ok();

        // On Unix, `code()` is already the high byte of the wait status;
        // signal deaths surface as -1.
        Ok(status.code().unwrap_or(-1))
    }
}

async fn tee_lines<R>(
    stream: R,
    log: Arc<Mutex<tokio::fs::File>>,
    tee_to_stdout: bool,
    is_stderr: bool,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        {
            let mut file = log.lock().await;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        if tee_to_stdout {
            if is_stderr {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        }
    }
    Ok(())
}

// ─── Session logs ─────────────────────────────────────────────

/// Any character outside `[A-Za-z0-9._-]` becomes `_` in log file names.
pub fn sanitize_node_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One record in the chronological command execution log.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub node: String,
    pub command: String,
    pub log_file: String,
    pub result: String,
}

/// Per-build log directory: `<build_root>/logs/build_<yyyymmdd_HHMMSS>_<pid>`,
/// created lazily on first use.
pub struct SessionLogs {
    build_root: PathBuf,
    session_dir: Option<PathBuf>,
}

impl SessionLogs {
    pub fn new(build_root: impl Into<PathBuf>) -> Self {
        Self {
            build_root: build_root.into(),
            session_dir: None,
        }
    }

    /// The session directory, creating it on first call.
    pub fn session_dir(&mut self) -> Result<&Path> {
        if self.session_dir.is_none() {
            let stamp = Local::now().format("%Y%m%d_%H%M%S");
            let dir = self
                .build_root
                .join("logs")
                .join(format!("build_{}_{}", stamp, std::process::id()));
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            self.session_dir = Some(dir);
        }
        Ok(self.session_dir.as_deref().expect("session dir just set"))
    }

    /// Captured-output path for one node.
    pub fn node_log_path(&mut self, node_name: &str) -> Result<PathBuf> {
        let file = format!("{}.log", sanitize_node_name(node_name));
        Ok(self.session_dir()?.join(file))
    }

    /// Append one record to `COMMAND_EXECUTION.log`. The file is opened,
    /// flushed, and closed per record so a crash mid-build loses at most
    /// the record being written.
    pub fn append_command_record(&mut self, record: &CommandRecord) -> Result<()> {
        let path = self.session_dir()?.join("COMMAND_EXECUTION.log");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{ts}] EXECUTING {}", record.node)?;
        writeln!(file, "[{ts}] COMMAND {}", record.command)?;
        writeln!(file, "[{ts}] LOG_FILE {}", record.log_file)?;
        writeln!(file, "[{ts}] RESULT {}", record.result)?;
        writeln!(file, "{RECORD_SEPARATOR}")?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_node_name() {
        assert_eq!(sanitize_node_name("build all"), "build_all");
        assert_eq!(sanitize_node_name("a/b:c"), "a_b_c");
        assert_eq!(sanitize_node_name("ok-1.2_x"), "ok-1.2_x");
    }

    #[test]
    fn test_session_dir_created_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let mut logs = SessionLogs::new(tmp.path());
        assert!(!tmp.path().join("logs").exists());
        let dir = logs.session_dir().unwrap().to_path_buf();
        assert!(dir.exists());
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("build_"), "{name}");
        assert!(name.ends_with(&std::process::id().to_string()), "{name}");
    }

    #[test]
    fn test_command_record_format() {
        let tmp = tempfile::tempdir().unwrap();
        let mut logs = SessionLogs::new(tmp.path());
        logs.append_command_record(&CommandRecord {
            node: "T".to_string(),
            command: "true".to_string(),
            log_file: "T.log".to_string(),
            result: "done (exit 0)".to_string(),
        })
        .unwrap();
        let content =
            std::fs::read_to_string(logs.session_dir().unwrap().join("COMMAND_EXECUTION.log"))
                .unwrap();
        assert!(content.contains("EXECUTING T"));
        assert!(content.contains("COMMAND true"));
        assert!(content.contains("LOG_FILE T.log"));
        assert!(content.contains("RESULT done (exit 0)"));
        assert!(content.contains(RECORD_SEPARATOR));
    }

    #[tokio::test]
    async fn test_shell_runner_exit_codes() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("out.log");
        let runner = ShellRunner;
        let code = runner
            .run("exit 3", &BTreeMap::new(), &log, false)
            .await
            .unwrap();
        assert_eq!(code, 3);
        let code = runner
            .run("true", &BTreeMap::new(), &log, false)
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_shell_runner_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("out.log");
        let runner = ShellRunner;
        runner
            .run("echo hello; echo oops >&2", &BTreeMap::new(), &log, false)
            .await
            .unwrap();
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("hello"));
        assert!(content.contains("oops"));
    }

    #[tokio::test]
    async fn test_shell_runner_exports_env() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("out.log");
        let mut env = BTreeMap::new();
        env.insert("BUILD_MODE".to_string(), "fast".to_string());
        ShellRunner
            .run("echo mode=$BUILD_MODE", &env, &log, false)
            .await
            .unwrap();
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("mode=fast"));
    }
}
