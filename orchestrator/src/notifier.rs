// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Telling dependent controllers that their parent cluster changed

use cluster_types::ClusterIdentity;
use cluster_types::ClusterSpec;
use slog::info;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use std::sync::Mutex;

/// A controller that owns resources scoped inside a cluster (pools, object
/// stores, file systems, ...).
pub trait ChildController: Send + Sync {
    /// Called after every successful pass.  Implementations should not
    /// block for long: the next pass waits for every child to return.
    fn parent_cluster_changed(
        &self,
        spec: &ClusterSpec,
        identity: &ClusterIdentity,
        is_upgrade: bool,
    ) -> anyhow::Result<()>;
}

/// How a round of notifications went.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotifySummary {
    pub delivered: usize,
    /// Names of the children that returned an error.
    pub failed: Vec<String>,
}

/// The children registered with one cluster.
pub struct ChildRegistry {
    log: Logger,
    children: Mutex<Vec<(String, Arc<dyn ChildController>)>>,
}

impl ChildRegistry {
    pub fn new(log: &Logger) -> Self {
        ChildRegistry {
            log: log.new(slog::o!("component" => "ChildRegistry")),
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        child: Arc<dyn ChildController>,
    ) {
        let name = name.into();
        info!(self.log, "registered child controller"; "child" => &name);
        self.children.lock().unwrap().push((name, child));
    }

    pub fn len(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers the new spec and identity to every child, in registration
    /// order.  A child that fails is logged and skipped; it will catch up on
    /// its own next reconciliation.
    pub fn notify_all(
        &self,
        spec: &ClusterSpec,
        identity: &ClusterIdentity,
        is_upgrade: bool,
    ) -> NotifySummary {
        // Don't hold the lock while calling out: a child may register more.
        let children = self.children.lock().unwrap().clone();
        let mut summary = NotifySummary::default();
        for (name, child) in &children {
            match child.parent_cluster_changed(spec, identity, is_upgrade) {
                Ok(()) => summary.delivered += 1,
                Err(error) => {
                    warn!(
                        self.log,
                        "child controller failed to handle cluster change";
                        "child" => name,
                        "error" => format!("{error:#}"),
                    );
                    summary.failed.push(name.clone());
                }
            }
        }
        info!(
            self.log,
            "notified child controllers";
            "delivered" => summary.delivered,
            "failed" => summary.failed.len(),
            "is_upgrade" => is_upgrade,
        );
        summary
    }
}
