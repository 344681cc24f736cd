// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running short-lived commands inside a software image.
//!
//! - In production, this is usually a [`HostProcessRunner`], which asks a
//!   container runtime on the host to run the command in an isolated,
//!   throwaway container.
//! - Under test, a `FakeProcessRunner` may be used to return canned output.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use slog::{debug, info, Logger};
use slog_error_chain::SlogInlineError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Output captured from a command that ran to completion.
///
/// A non-zero exit code is not an error at this layer; callers decide what a
/// failing command means to them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum ExecutionError {
    #[error("no command given to run in image {image:?}")]
    EmptyCommand { image: String },

    #[error("failed to start command [{command}]")]
    Start {
        command: String,
        #[source]
        err: std::io::Error,
    },

    #[error("command [{command}] did not complete within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Shared handle to whichever runner a component was given.
pub type BoxedProcessRunner = Arc<dyn ProcessRunner>;

/// Runs a command inside a software image, waiting for it to complete.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `args[0]` with the remaining `args` inside `image`, giving up once
    /// `timeout` has elapsed.
    async fn run(
        &self,
        image: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ProcessOutput, ExecutionError>;
}

fn log_input(log: &Logger, id: u64, image: &str, args: &[&str]) {
    info!(
        log,
        "running command in image";
        "id" => id,
        "image" => image,
        "command" => args.join(" "),
    );
}

fn log_output(log: &Logger, id: u64, output: &ProcessOutput) {
    info!(
        log,
        "finished running command in image";
        "id" => id,
        "result" => if output.success() { "OK" } else { "ERROR" },
        "status" => output
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );
    if !output.stdout.is_empty() {
        debug!(log, "finished command stdout"; "id" => id, "stdout" => &output.stdout);
    }
    if !output.stderr.is_empty() {
        debug!(log, "finished command stderr"; "id" => id, "stderr" => &output.stderr);
    }
}

/// Runs commands in throwaway containers through a container runtime CLI
/// (e.g., `podman` or `docker`).
pub struct HostProcessRunner {
    log: Logger,
    container_runtime: Utf8PathBuf,
    counter: AtomicU64,
}

impl HostProcessRunner {
    pub fn new(log: &Logger, container_runtime: Utf8PathBuf) -> Self {
        let log = log.new(slog::o!(
            "component" => "HostProcessRunner",
            "runtime" => container_runtime.to_string(),
        ));
        Self { log, container_runtime, counter: AtomicU64::new(0) }
    }

    /// Erases the concrete runner type.
    pub fn as_runner(self: Arc<Self>) -> BoxedProcessRunner {
        self
    }

    /// Arguments passed to the container runtime to run `entrypoint` with
    /// `args` in a fresh container of `image`.
    fn runtime_args<'a>(
        image: &'a str,
        entrypoint: &'a str,
        args: &[&'a str],
    ) -> Vec<&'a str> {
        let mut argv = vec![
            "run",
            "--rm",
            "--network=none",
            "--entrypoint",
            entrypoint,
            image,
        ];
        argv.extend_from_slice(args);
        argv
    }
}

#[async_trait]
impl ProcessRunner for HostProcessRunner {
    async fn run(
        &self,
        image: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ProcessOutput, ExecutionError> {
        let Some((entrypoint, rest)) = args.split_first() else {
            return Err(ExecutionError::EmptyCommand {
                image: image.to_string(),
            });
        };
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.log, id, image, args);

        let runtime_args = Self::runtime_args(image, entrypoint, rest);
        let rendered = format!(
            "{} {}",
            self.container_runtime,
            runtime_args.join(" ")
        );
        let mut command = tokio::process::Command::new(&self.container_runtime);
        command
            .args(&runtime_args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        let output = match tokio::time::timeout(timeout, command.output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(ExecutionError::Start { command: rendered, err });
            }
            // Dropping the future kills the child (`kill_on_drop`).
            Err(_) => {
                return Err(ExecutionError::Timeout {
                    command: rendered,
                    timeout,
                });
            }
        };

        let output = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        log_output(&self.log, id, &output);
        Ok(output)
    }
}

#[cfg(any(test, feature = "testing"))]
pub use fake::{FakeProcessRunner, RunHandler};

#[cfg(any(test, feature = "testing"))]
mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Handler called for each command the fake is asked to run.
    pub type RunHandler = Box<
        dyn Fn(&str, &[&str]) -> Result<ProcessOutput, ExecutionError>
            + Send
            + Sync,
    >;

    /// A runner which responds to every command with whatever its handler
    /// returns, recording what it was asked to run.
    pub struct FakeProcessRunner {
        log: Logger,
        counter: AtomicU64,
        handler: Mutex<RunHandler>,
        invocations: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeProcessRunner {
        pub fn new(log: &Logger) -> Arc<FakeProcessRunner> {
            Arc::new(Self {
                log: log.new(slog::o!("component" => "FakeProcessRunner")),
                counter: AtomicU64::new(0),
                handler: Mutex::new(Box::new(|_, _| {
                    Ok(ProcessOutput {
                        stdout: String::new(),
                        stderr: String::new(),
                        exit_code: Some(0),
                    })
                })),
                invocations: Mutex::new(Vec::new()),
            })
        }

        /// Set the handler to an arbitrary function.
        pub fn set_handler(&self, f: RunHandler) {
            *self.handler.lock().unwrap() = f;
        }

        /// Respond to every command with the given output.
        pub fn set_output(&self, stdout: &str, stderr: &str, exit_code: i32) {
            let output = ProcessOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code: Some(exit_code),
            };
            self.set_handler(Box::new(move |_, _| Ok(output.clone())));
        }

        /// Returns the `(image, args)` of every command run so far.
        pub fn invocations(&self) -> Vec<(String, Vec<String>)> {
            self.invocations.lock().unwrap().clone()
        }

        pub fn as_runner(self: Arc<Self>) -> BoxedProcessRunner {
            self
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeProcessRunner {
        async fn run(
            &self,
            image: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> Result<ProcessOutput, ExecutionError> {
            let id = self.counter.fetch_add(1, Ordering::SeqCst);
            log_input(&self.log, id, image, args);
            self.invocations.lock().unwrap().push((
                image.to_string(),
                args.iter().map(|a| a.to_string()).collect(),
            ));
            let output = (self.handler.lock().unwrap())(image, args)?;
            log_output(&self.log, id, &output);
            Ok(output)
        }
    }
}
