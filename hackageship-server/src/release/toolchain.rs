use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use tracing_attributes::instrument;

/// Longest slice of a command's output kept in an error message.
const MAX_OUTPUT_IN_ERROR: usize = 2000;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {output}")]
    Failed {
        command: String,
        status: ExitStatus,
        output: String,
    },
    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },
}

/// The external tools a release needs. Every operation names the directory
/// it works in; nothing here depends on the process working directory.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn clone_repository(&self, clone_url: &str, destination: &Path)
        -> Result<(), CommandError>;

    async fn checkout_tag(&self, checkout: &Path, tag: &str) -> Result<(), CommandError>;

    async fn build_source_distribution(&self, checkout: &Path) -> Result<(), CommandError>;
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Runs `program` inside `working_dir` and waits for it. A non-zero exit
    /// is an error carrying the tail of stderr (or stdout when stderr is
    /// empty). The child is killed if the timeout elapses.
    pub async fn run<I, S>(
        &self,
        program: &str,
        args: I,
        working_dir: &Path,
    ) -> Result<(), CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let command_line = describe(program, &args);

        let mut command = Command::new(program);
        command
            .args(&args)
            .current_dir(working_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(dir = %working_dir.display(), "Running `{}`", command_line);
        let started = Instant::now();

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, command.output()).await {
                Ok(output) => output,
                Err(_) => {
                    return Err(CommandError::TimedOut {
                        command: command_line,
                        timeout,
                    })
                }
            },
            None => command.output().await,
        };

        let output = output.map_err(|source| CommandError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            status = %output.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            stdout = %stdout,
            stderr = %stderr,
            "`{}` finished",
            command_line
        );

        if output.status.success() {
            return Ok(());
        }

        let detail = if stderr.trim().is_empty() {
            stdout
        } else {
            stderr
        };
        Err(CommandError::Failed {
            command: command_line,
            status: output.status,
            output: tail(detail.trim(), MAX_OUTPUT_IN_ERROR).to_owned(),
        })
    }
}

fn describe(program: &str, args: &[OsString]) -> String {
    let mut line = program.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

fn tail(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut start = text.len() - max_len;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// `git` and `cabal`, as found on the `PATH`.
#[derive(Debug, Clone)]
pub struct CabalToolchain {
    runner: CommandRunner,
    git: String,
    cabal: String,
}

impl CabalToolchain {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            git: "git".to_owned(),
            cabal: "cabal".to_owned(),
        }
    }
}

#[async_trait]
impl Toolchain for CabalToolchain {
    #[instrument(skip(self, destination), fields(destination = %destination.display()))]
    async fn clone_repository(
        &self,
        clone_url: &str,
        destination: &Path,
    ) -> Result<(), CommandError> {
        let parent = destination.parent().unwrap_or(destination);
        info!("Cloning {}", clone_url);
        self.runner
            .run(
                &self.git,
                [
                    OsStr::new("clone"),
                    OsStr::new("--quiet"),
                    OsStr::new(clone_url),
                    destination.as_os_str(),
                ],
                parent,
            )
            .await
    }

    #[instrument(skip(self, checkout))]
    async fn checkout_tag(&self, checkout: &Path, tag: &str) -> Result<(), CommandError> {
        let reference = format!("tags/{}", tag);
        self.runner
            .run(&self.git, ["checkout", "--quiet", reference.as_str()], checkout)
            .await
    }

    #[instrument(skip(self, checkout))]
    async fn build_source_distribution(&self, checkout: &Path) -> Result<(), CommandError> {
        self.runner.run(&self.cabal, ["sdist"], checkout).await
    }
}
