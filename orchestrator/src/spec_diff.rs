// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deciding whether a new cluster spec differs from the applied one.

use cluster_types::ClusterSpec;
use similar::TextDiff;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;

/// Result of comparing two specs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecChange {
    pub changed: bool,
    /// Unified diff of the two specs, rendered as JSON.  Only present when
    /// `changed` is set and the diff could be rendered.
    pub diff: Option<String>,
}

/// Puts order-insensitive lists into a canonical order.
fn normalize(spec: &ClusterSpec) -> ClusterSpec {
    let mut spec = spec.clone();
    spec.storage.nodes.sort_by(|a, b| a.name.cmp(&b.name));
    spec
}

/// Compares `old` and `new`
///
/// `changed` is decided by plain equality on the normalized specs and cannot
/// fail.  The diff is only for humans: if it cannot be produced we log and
/// move on.
pub fn cluster_changed(
    log: &Logger,
    old: &ClusterSpec,
    new: &ClusterSpec,
) -> SpecChange {
    let old = normalize(old);
    let new = normalize(new);
    if old == new {
        return SpecChange { changed: false, diff: None };
    }

    let diff = match render_diff(&old, &new) {
        Ok(diff) => Some(diff),
        Err(err) => {
            warn!(
                log,
                "failed to render cluster spec diff";
                InlineErrorChain::new(&err),
            );
            None
        }
    };
    SpecChange { changed: true, diff }
}

fn render_diff(
    old: &ClusterSpec,
    new: &ClusterSpec,
) -> Result<String, serde_json::Error> {
    let old = serde_json::to_string_pretty(old)?;
    let new = serde_json::to_string_pretty(new)?;
    Ok(TextDiff::from_lines(&old, &new)
        .unified_diff()
        .context_radius(2)
        .header("applied", "desired")
        .to_string())
}
