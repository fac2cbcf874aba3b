use crate::error::RunnerError;
use log::{debug, warn};
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Exit code reported when a pipeline is killed after its deadline
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One external program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolCommand {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

fn quote(word: &str) -> String {
    shlex::try_quote(word)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{}'", word.replace('\0', "")))
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

/// Commands whose stdout feeds the next command's stdin, left to right
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub steps: Vec<ToolCommand>,
}

impl Pipeline {
    pub fn new(steps: Vec<ToolCommand>) -> Self {
        Pipeline { steps }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every step rendered as a shell-quoted command line
    pub fn command_strings(&self) -> Vec<String> {
        self.steps.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_strings().join(" | "))
    }
}

/// Result of a finished pipeline. The exit code is the first non-zero code
/// along the chain, or zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stderr: String,
}

impl ToolOutput {
    #[inline]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes command pipelines on behalf of the orchestrator
pub trait CommandRunner: Send + Sync {
    fn run(&self, pipeline: &Pipeline) -> Result<ToolOutput, RunnerError>;
}

/// Runs pipelines as real child processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    cancel: Arc<AtomicBool>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>, cancel: Arc<AtomicBool>) -> Self {
        ProcessRunner { timeout, cancel }
    }
}

fn kill_all(children: &mut [Child]) {
    for child in children.iter_mut() {
        if let Err(e) = child.kill() {
            debug!("Kill failed (process probably exited): {}", e);
        }
        let _ = child.wait();
    }
}

/// Kills the whole chain when waiting on one member failed.
fn or_kill_all<T>(children: &mut [Child], result: std::io::Result<T>) -> Result<T, RunnerError> {
    result.map_err(|e| {
        kill_all(children);
        RunnerError::Io(e)
    })
}

impl CommandRunner for ProcessRunner {
    fn run(&self, pipeline: &Pipeline) -> Result<ToolOutput, RunnerError> {
        if pipeline.is_empty() {
            return Err(RunnerError::EmptyPipeline);
        }
        debug!("Running: {}", pipeline);

        let mut children: Vec<Child> = Vec::with_capacity(pipeline.steps.len());
        let mut stderr_readers = Vec::with_capacity(pipeline.steps.len());
        let last = pipeline.steps.len() - 1;

        for (i, step) in pipeline.steps.iter().enumerate() {
            let mut command = Command::new(&step.program);
            command.args(&step.args).stderr(Stdio::piped());
            command.stdin(match children.last_mut().and_then(|c| c.stdout.take()) {
                Some(previous) => Stdio::from(previous),
                None => Stdio::null(),
            });
            command.stdout(if i == last {
                Stdio::null()
            } else {
                Stdio::piped()
            });

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(source) => {
                    kill_all(&mut children);
                    return Err(RunnerError::Spawn {
                        program: step.program.clone(),
                        source,
                    });
                }
            };
            // Drain stderr on a side thread so a chatty tool cannot block on a full pipe.
            if let Some(mut stderr) = child.stderr.take() {
                stderr_readers.push(thread::spawn(move || {
                    let mut buf = String::new();
                    let _ = stderr.read_to_string(&mut buf);
                    buf
                }));
            }
            children.push(child);
        }

        let started = Instant::now();
        let mut codes: Vec<Option<i32>> = vec![None; children.len()];
        let mut timed_out = false;
        while codes.iter().any(Option::is_none) {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Cancelling pipeline: {}", pipeline);
                kill_all(&mut children);
                return Err(RunnerError::Cancelled);
            }
            if self.timeout.is_some_and(|t| started.elapsed() >= t) {
                warn!(
                    "Pipeline exceeded {:?}, killing: {}",
                    self.timeout.unwrap_or_default(),
                    pipeline
                );
                kill_all(&mut children);
                timed_out = true;
                break;
            }
            let polled = children
                .iter_mut()
                .zip(codes.iter_mut())
                .filter(|(_, code)| code.is_none())
                .try_for_each(|(child, code)| {
                    if let Some(status) = child.try_wait()? {
                        // Killed by a signal: no code, report failure.
                        *code = Some(status.code().unwrap_or(-1));
                    }
                    Ok::<(), std::io::Error>(())
                });
            or_kill_all(&mut children, polled)?;
            if codes.iter().any(Option::is_none) {
                thread::sleep(POLL_INTERVAL);
            }
        }

        let stderr = stderr_readers
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let exit_code = if timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            codes.into_iter().flatten().find(|c| *c != 0).unwrap_or(0)
        };
        Ok(ToolOutput { exit_code, stderr })
    }
}
