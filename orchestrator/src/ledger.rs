// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A file on local disk holding the cluster identity record.

use crate::facilities::IdentityStore;
use crate::facilities::IdentityStoreError;
use async_trait::async_trait;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use cluster_types::ClusterIdentity;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;

/// Stores the identity as JSON at a fixed path
///
/// Writes go to a temporary file beside the record and are renamed into
/// place, so a crash mid-write leaves the previous record intact.
pub struct LedgerIdentityStore {
    log: Logger,
    path: Utf8PathBuf,
}

impl LedgerIdentityStore {
    pub fn new(log: &Logger, path: Utf8PathBuf) -> Self {
        let log = log.new(slog::o!(
            "component" => "LedgerIdentityStore",
            "path" => path.to_string(),
        ));
        LedgerIdentityStore { log, path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn tmp_path(&self) -> Utf8PathBuf {
        let mut name = self.path.file_name().unwrap_or("identity").to_string();
        name.push_str(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(path: &Utf8Path, err: std::io::Error) -> IdentityStoreError {
        IdentityStoreError::Io { path: path.to_owned(), err }
    }
}

#[async_trait]
impl IdentityStore for LedgerIdentityStore {
    async fn load(&self) -> Result<Option<ClusterIdentity>, IdentityStoreError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(self.log, "no identity record yet");
                return Ok(None);
            }
            Err(err) => return Err(Self::io_err(&self.path, err)),
        };
        let identity: ClusterIdentity = serde_json::from_slice(&contents)
            .map_err(|err| IdentityStoreError::Parse {
                path: self.path.clone(),
                err,
            })?;
        debug!(
            self.log,
            "loaded identity record";
            "cluster_id" => %identity.cluster_id,
        );
        Ok(Some(identity))
    }

    async fn save(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<(), IdentityStoreError> {
        let contents = serde_json::to_vec_pretty(identity)
            .map_err(IdentityStoreError::Serialize)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| Self::io_err(parent, err))?;
            }
        }

        let tmp_path = self.tmp_path();
        if let Err(err) = tokio::fs::write(&tmp_path, &contents).await {
            return Err(Self::io_err(&tmp_path, err));
        }
        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            if let Err(unlink_err) = tokio::fs::remove_file(&tmp_path).await {
                warn!(
                    self.log,
                    "failed to remove temporary identity record";
                    "error" => %unlink_err,
                );
            }
            return Err(Self::io_err(&self.path, err));
        }
        info!(
            self.log,
            "saved identity record";
            "cluster_id" => %identity.cluster_id,
        );
        Ok(())
    }
}
