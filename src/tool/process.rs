//! Tool process spawning and control.
//!
//! This module provides a builder for describing how to launch an external
//! knowledge tool, along with control methods for the running process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The executable was not found.
    #[error("Tool executable not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied spawning {0}")]
    PermissionDenied(String),
    /// The process was started without one of its piped streams.
    #[error("Tool process {0} is missing a piped stdio stream")]
    MissingStdio(String),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Builder describing how to launch a tool process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl ToolCommand {
    /// Create a new builder for the given executable.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments, in order.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an extra environment variable for the process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory for the process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The executable to launch.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in launch order.
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Render as a shell-like string for log output.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A running tool process with piped stdio.
///
/// The child is killed if this handle is dropped while it is still running.
#[derive(Debug)]
pub struct ToolProcess {
    child: Child,
    program: String,
}

impl ToolProcess {
    /// Spawn a tool process.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn start(command: &ToolCommand) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&command.program, e))?;

        tracing::debug!(command = %command.display(), pid = ?child.id(), "Started tool process");

        Ok(Self {
            child,
            program: command.program.clone(),
        })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Take both stdio pipes used by the transport.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError::MissingStdio` if either pipe was already taken.
    pub fn take_stdio(&mut self) -> Result<(ChildStdin, ChildStdout), SpawnError> {
        match (self.take_stdin(), self.take_stdout()) {
            (Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
            _ => Err(SpawnError::MissingStdio(self.program.clone())),
        }
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Terminate the process, waiting up to `grace` for it to exit cleanly.
    ///
    /// Safe to call repeatedly and on a process that has already exited.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn terminate(&mut self, grace: Duration) -> std::io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            self.terminate_unix(grace).await
        }

        #[cfg(not(unix))]
        {
            let _ = grace;
            self.child.kill().await
        }
    }

    #[cfg(unix)]
    async fn terminate_unix(&mut self, grace: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            return Ok(());
        };

        let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        let _ = kill(nix_pid, Signal::SIGTERM);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(program = %self.program, %status, "Tool process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::debug!(program = %self.program, "Grace period elapsed, killing tool process");
                self.child.kill().await
            }
        }
    }
}

/// Forward a tool's stderr into the log, one line per event.
///
/// Keeps the pipe drained so a chatty tool never blocks on a full buffer.
pub fn forward_stderr(source: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(source = %source, "tool stderr: {line}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_builder_collects_args_in_order() {
        let command = ToolCommand::new("python3")
            .arg("server.py")
            .args(["--port", "0"])
            .env("MODE", "test");

        assert_eq!(command.program(), "python3");
        assert_eq!(command.get_args(), ["server.py", "--port", "0"]);
        assert_eq!(command.display(), "python3 server.py --port 0");
        assert!(command.get_working_dir().is_none());
    }

    #[tokio::test]
    async fn start_missing_binary_is_not_found() {
        let err = ToolProcess::start(&ToolCommand::new("/nonexistent/knowledge-tool")).unwrap_err();
        assert!(matches!(err, SpawnError::NotFound(_)));
    }

    #[tokio::test]
    async fn take_stdio_once() {
        let mut process = ToolProcess::start(&ToolCommand::new("cat")).unwrap();

        assert!(process.take_stdio().is_ok());
        assert!(matches!(
            process.take_stdio(),
            Err(SpawnError::MissingStdio(_))
        ));

        process.terminate(Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let mut process = ToolProcess::start(&ToolCommand::new("sleep").arg("10")).unwrap();
        assert!(process.is_alive());

        process.terminate(Duration::from_millis(200)).await.unwrap();
        assert!(!process.is_alive());

        process.terminate(Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn terminate_after_natural_exit() {
        let mut process = ToolProcess::start(&ToolCommand::new("true")).unwrap();
        process.wait().await.unwrap();

        assert!(process.terminate(Duration::from_millis(50)).await.is_ok());
    }
}
