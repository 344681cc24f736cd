// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Determines which software version an image contains by running it.

use cluster_types::version::ParseVersionError;
use cluster_types::SoftwareVersion;
use operator_common::process::BoxedProcessRunner;
use operator_common::process::ExecutionError;
use slog::info;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use std::time::Duration;

/// Command run inside the image to report its version.
const VERSION_COMMAND: &[&str] = &["ceph", "--version"];

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum ProbeError {
    #[error("version probe of image {image:?} did not finish within {timeout:?}")]
    ProbeTimeout { image: String, timeout: Duration },

    #[error("version probe of image {image:?} failed")]
    ProbeFailed {
        image: String,
        #[source]
        reason: ProbeFailure,
    },

    #[error("could not find a version in probe output {output:?}")]
    VersionUnparseable {
        output: String,
        #[source]
        err: ParseVersionError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeFailure {
    #[error("could not run the probe")]
    Execution(#[source] ExecutionError),

    #[error(
        "probe exited unsuccessfully (status {code:?}, stdout: {stdout:?}, \
         stderr: {stderr:?})"
    )]
    NonZeroExit { code: Option<i32>, stdout: String, stderr: String },
}

/// Runs a one-off command inside the desired image and parses the version it
/// reports.
///
/// This is the only source of truth for what version an image contains; the
/// image tag is never trusted.
pub struct VersionProbe {
    log: Logger,
    runner: BoxedProcessRunner,
}

impl VersionProbe {
    pub fn new(log: &Logger, runner: BoxedProcessRunner) -> Self {
        let log = log.new(slog::o!("component" => "VersionProbe"));
        VersionProbe { log, runner }
    }

    pub async fn detect(
        &self,
        image: &str,
        timeout: Duration,
    ) -> Result<SoftwareVersion, ProbeError> {
        info!(self.log, "detecting software version"; "image" => image);

        let output = match self.runner.run(image, VERSION_COMMAND, timeout).await
        {
            Ok(output) => output,
            Err(ExecutionError::Timeout { .. }) => {
                warn!(
                    self.log,
                    "version probe timed out";
                    "image" => image,
                    "timeout" => ?timeout,
                );
                return Err(ProbeError::ProbeTimeout {
                    image: image.to_string(),
                    timeout,
                });
            }
            Err(err) => {
                warn!(
                    self.log,
                    "version probe could not run";
                    "image" => image,
                    InlineErrorChain::new(&err),
                );
                return Err(ProbeError::ProbeFailed {
                    image: image.to_string(),
                    reason: ProbeFailure::Execution(err),
                });
            }
        };

        if !output.success() {
            return Err(ProbeError::ProbeFailed {
                image: image.to_string(),
                reason: ProbeFailure::NonZeroExit {
                    code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                },
            });
        }

        let version = SoftwareVersion::extract(&output.stdout).map_err(|err| {
            ProbeError::VersionUnparseable { output: output.stdout.clone(), err }
        })?;
        info!(
            self.log,
            "detected software version";
            "image" => image,
            "version" => %version,
            "release" => version.release_name(),
        );
        Ok(version)
    }
}
