// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decides whether moving a cluster to a desired version is safe.

use crate::config::UpgradeConfig;
use crate::facilities::ClusterHealth;
use crate::facilities::ClusterStatusReader;
use crate::facilities::StatusError;
use cluster_types::version::MINIMUM_VERSION;
use cluster_types::ClusterIdentity;
use cluster_types::RunningVersionSet;
use cluster_types::SoftwareVersion;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use slog_error_chain::SlogInlineError;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum GateError {
    #[error("software version {version} is not supported: {reason}")]
    UnsupportedVersion { version: SoftwareVersion, reason: UnsupportedReason },

    #[error("the cluster reported no running daemon versions")]
    VersionUnavailable,

    #[error(
        "refusing to downgrade cluster from {running} to {desired}; \
         change the image back or upgrade it past {running}"
    )]
    DowngradeRejected { desired: SoftwareVersion, running: SoftwareVersion },

    #[error("upgrade to {desired} blocked until the cluster is healthy")]
    UpgradeBlockedUnhealthy {
        desired: SoftwareVersion,
        #[source]
        reason: UnhealthyReason,
    },
}

impl GateError {
    /// Failures that need a spec change or a cluster repair before a retried
    /// pass can succeed.
    pub fn is_fatal_retriable(&self) -> bool {
        matches!(
            self,
            GateError::DowngradeRejected { .. }
                | GateError::UpgradeBlockedUnhealthy { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsupportedReason {
    BelowMinimum,
    NotOnSupportedList,
}

impl std::fmt::Display for UnsupportedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnsupportedReason::BelowMinimum => {
                write!(f, "the minimum version is {MINIMUM_VERSION}")
            }
            UnsupportedReason::NotOnSupportedList => f.write_str(
                "release is not on the supported list and \
                 allowUnsupported is not set",
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UnhealthyReason {
    #[error("cluster reports: {summary}")]
    Reported { summary: String },
    #[error("cluster health could not be determined")]
    Unknown(#[source] StatusError),
}

/// What the gate decided for one pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateOutcome {
    /// The pass moves the cluster to a new version.
    pub is_upgrade: bool,
    /// Running versions, if they could be fetched.
    pub running_versions: Option<RunningVersionSet>,
}

pub struct UpgradeGate {
    log: Logger,
    status: Arc<dyn ClusterStatusReader>,
    config: UpgradeConfig,
}

impl UpgradeGate {
    pub fn new(
        log: &Logger,
        status: Arc<dyn ClusterStatusReader>,
        config: UpgradeConfig,
    ) -> Self {
        let log = log.new(slog::o!("component" => "UpgradeGate"));
        UpgradeGate { log, status, config }
    }

    /// Decide whether `desired` may be rolled out to the cluster described by
    /// `identity`.
    ///
    /// The cluster's health is only queried once we know an upgrade is
    /// needed, so steady-state passes never pay for it.
    pub async fn evaluate(
        &self,
        desired: &SoftwareVersion,
        allow_unsupported: bool,
        identity: Option<&ClusterIdentity>,
    ) -> Result<GateOutcome, GateError> {
        let log = self.log.new(slog::o!("desired" => desired.to_string()));

        if !desired.is_at_least(&MINIMUM_VERSION) {
            return Err(GateError::UnsupportedVersion {
                version: desired.clone(),
                reason: UnsupportedReason::BelowMinimum,
            });
        }
        if !desired.is_supported() {
            if !allow_unsupported {
                return Err(GateError::UnsupportedVersion {
                    version: desired.clone(),
                    reason: UnsupportedReason::NotOnSupportedList,
                });
            }
            warn!(log, "running an unsupported version as requested");
        }

        // Until every role has started once, there are no daemons whose
        // versions could be compared.
        let Some(identity) = identity.filter(|id| id.is_bootstrapped()) else {
            info!(log, "cluster not yet bootstrapped; no upgrade decision");
            return Ok(GateOutcome::default());
        };

        let running = match self.status.running_versions().await {
            Ok(running) => running,
            Err(err) => {
                warn!(
                    log,
                    "could not fetch running versions; \
                     continuing without an upgrade decision";
                    InlineErrorChain::new(&err),
                );
                self.check_unknown_versions(&log, desired, identity).await?;
                return Ok(GateOutcome::default());
            }
        };

        let is_upgrade = match running.distinct_overall() {
            0 => return Err(GateError::VersionUnavailable),
            1 => {
                let Some(raw) = running.overall.keys().next() else {
                    return Err(GateError::VersionUnavailable);
                };
                match SoftwareVersion::extract(raw) {
                    Ok(current) => {
                        self.compare_single(&log, desired, current)?
                    }
                    Err(err) => {
                        warn!(
                            log,
                            "could not parse running version; \
                             continuing without an upgrade decision";
                            "running" => raw,
                            InlineErrorChain::new(&err),
                        );
                        self.check_unknown_versions(&log, desired, identity)
                            .await?;
                        return Ok(GateOutcome {
                            is_upgrade: false,
                            running_versions: Some(running),
                        });
                    }
                }
            }
            n => {
                info!(
                    log,
                    "daemons are running different versions; \
                     an upgrade is in progress";
                    "distinct_versions" => n,
                );
                true
            }
        };

        if is_upgrade {
            self.require_healthy(&log, desired).await?;
            info!(log, "cluster is healthy; proceeding with upgrade");
        }
        Ok(GateOutcome { is_upgrade, running_versions: Some(running) })
    }

    fn compare_single(
        &self,
        log: &Logger,
        desired: &SoftwareVersion,
        current: SoftwareVersion,
    ) -> Result<bool, GateError> {
        if desired.is_identical(&current) {
            debug!(log, "cluster already runs the desired version");
            Ok(false)
        } else if desired.is_superior_to(&current) {
            info!(
                log,
                "upgrade needed";
                "running" => %current,
                "from_release" => current.release_name(),
                "to_release" => desired.release_name(),
            );
            Ok(true)
        } else {
            Err(GateError::DowngradeRejected {
                desired: desired.clone(),
                running: current,
            })
        }
    }

    /// Runs the health check on the degraded path if configured to, and the
    /// desired version is not the one last recorded for the cluster.
    async fn check_unknown_versions(
        &self,
        log: &Logger,
        desired: &SoftwareVersion,
        identity: &ClusterIdentity,
    ) -> Result<(), GateError> {
        if !self.config.require_health_on_unknown_versions {
            return Ok(());
        }
        if identity.running_version.as_ref() == Some(desired) {
            return Ok(());
        }
        info!(
            log,
            "running versions unknown and desired version differs from the \
             recorded one; checking cluster health";
            "recorded" => identity
                .running_version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string()),
        );
        self.require_healthy(log, desired).await
    }

    async fn require_healthy(
        &self,
        log: &Logger,
        desired: &SoftwareVersion,
    ) -> Result<(), GateError> {
        let reason = match self.status.health().await {
            Ok(ClusterHealth::Healthy) => return Ok(()),
            Ok(ClusterHealth::Unhealthy { summary }) => {
                UnhealthyReason::Reported { summary }
            }
            Err(err) => UnhealthyReason::Unknown(err),
        };
        warn!(log, "cluster is not healthy"; "reason" => %reason);
        Err(GateError::UpgradeBlockedUnhealthy {
            desired: desired.clone(),
            reason,
        })
    }
}
