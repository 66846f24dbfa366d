// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The snapshot manager: exports or adopts a source transaction snapshot
//! and holds the transaction open for the lifetime of the run so every
//! worker connection can `SET TRANSACTION SNAPSHOT` against the same
//! consistent view.

use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{info, warn};

use copydb_repr::CopydbError;

/// Where the manager is in its lifecycle. `Exported` and `Set` both mean
/// "a transaction is open and `snapshot_id()` is usable"; they're kept
/// distinct only so callers can tell whether this run minted the
/// snapshot or adopted one minted elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Unknown,
    Exported,
    Set,
    Skipped,
    Closed,
}

/// Holds the live connection and its background I/O task for as long as
/// the snapshot transaction needs to stay open. Dropping it without
/// calling [`SnapshotManager::close`] leaves the transaction to roll back
/// when the connection is torn down, same as the source tool's "just die"
/// failure path.
struct Holder {
    client: Client,
    connection_task: JoinHandle<()>,
}

pub struct SnapshotManager {
    state: SnapshotState,
    snapshot_id: Option<String>,
    holder: Option<Holder>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        SnapshotManager { state: SnapshotState::Unknown, snapshot_id: None, holder: None }
    }

    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub fn snapshot_id(&self) -> Option<&str> {
        self.snapshot_id.as_deref()
    }

    /// `prepare`, per §4.3: if the run is not snapshot-consistent, the
    /// manager moves straight to `Skipped`. Otherwise it either adopts a
    /// caller-supplied snapshot id or exports a fresh one, holding the
    /// transaction open until [`close`](Self::close) is called.
    ///
    /// Failure to set the isolation level, export, or adopt the snapshot
    /// is fatal for the whole run, not just this manager.
    pub async fn prepare(
        &mut self,
        source_uri: &str,
        consistent: bool,
        adopt_snapshot_id: Option<&str>,
    ) -> Result<(), CopydbError> {
        if !consistent {
            info!("running without a consistent snapshot (--no-consistent)");
            self.state = SnapshotState::Skipped;
            return Ok(());
        }

        let (client, connection) = tokio_postgres::connect(source_uri, NoTls)
            .await
            .map_err(|e| CopydbError::upstream(format!("connecting for snapshot: {e}")))?;
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "snapshot-holding connection closed with an error");
            }
        });

        match adopt_snapshot_id {
            Some(id) => {
                client
                    .batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ READ WRITE DEFERRABLE")
                    .await
                    .map_err(|e| CopydbError::upstream(format!("opening adopting transaction: {e}")))?;
                let set_snapshot = format!("SET TRANSACTION SNAPSHOT '{id}'");
                client.batch_execute(&set_snapshot).await.map_err(|e| {
                    CopydbError::upstream(format!("adopting snapshot {id}: {e}"))
                })?;
                self.snapshot_id = Some(id.to_string());
                self.state = SnapshotState::Set;
                info!(snapshot_id = id, "adopted caller-supplied snapshot");
            }
            None => {
                client
                    .batch_execute("BEGIN ISOLATION LEVEL SERIALIZABLE READ WRITE DEFERRABLE")
                    .await
                    .map_err(|e| CopydbError::upstream(format!("opening exporting transaction: {e}")))?;
                let row = client
                    .query_one("SELECT pg_export_snapshot()", &[])
                    .await
                    .map_err(|e| CopydbError::upstream(format!("exporting snapshot: {e}")))?;
                let id: String = row.get(0);
                info!(snapshot_id = %id, "exported fresh snapshot");
                self.snapshot_id = Some(id);
                self.state = SnapshotState::Exported;
            }
        }

        self.holder = Some(Holder { client, connection_task });
        Ok(())
    }

    /// `copy`, per §4.3: a value copy of the snapshot id and connection
    /// string a worker needs to join this snapshot on its own connection.
    pub fn copy(&self, source_uri: &str) -> Option<SnapshotHandle> {
        self.snapshot_id.as_ref().map(|id| SnapshotHandle {
            snapshot_id: id.clone(),
            source_uri: source_uri.to_string(),
        })
    }

    /// Commits the held transaction and disconnects. Idempotent: calling
    /// this more than once, or on a manager that never held a
    /// transaction (`Skipped`), is a no-op.
    pub async fn close(&mut self) -> Result<(), CopydbError> {
        if self.state == SnapshotState::Closed {
            return Ok(());
        }
        if let Some(holder) = self.holder.take() {
            holder
                .client
                .batch_execute("COMMIT")
                .await
                .map_err(|e| CopydbError::upstream(format!("committing snapshot transaction: {e}")))?;
            drop(holder.client);
            let _ = holder.connection_task.await;
        }
        self.state = SnapshotState::Closed;
        Ok(())
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheaply cloneable handle a worker uses to join the shared snapshot on
/// its own connection, via `SET TRANSACTION SNAPSHOT`.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    pub snapshot_id: String,
    pub source_uri: String,
}

impl SnapshotHandle {
    /// Opens a fresh connection and joins the shared snapshot. The
    /// returned client is in an open `REPEATABLE READ` transaction bound
    /// to the same consistent view every other worker reads from.
    pub async fn connect(&self) -> Result<(Client, JoinHandle<()>), CopydbError> {
        let (client, connection) = tokio_postgres::connect(&self.source_uri, NoTls)
            .await
            .map_err(|e| CopydbError::upstream(format!("worker connecting to source: {e}")))?;
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "worker source connection closed with an error");
            }
        });
        client
            .batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .await
            .map_err(|e| CopydbError::upstream(format!("opening worker transaction: {e}")))?;
        let set_snapshot = format!("SET TRANSACTION SNAPSHOT '{}'", self.snapshot_id);
        client
            .batch_execute(&set_snapshot)
            .await
            .map_err(|e| CopydbError::upstream(format!("joining snapshot {}: {e}", self.snapshot_id)))?;
        Ok((client, connection_task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_starts_unknown_with_no_id() {
        let manager = SnapshotManager::new();
        assert_eq!(manager.state(), SnapshotState::Unknown);
        assert!(manager.snapshot_id().is_none());
    }

    #[tokio::test]
    async fn non_consistent_run_skips_without_connecting() {
        let mut manager = SnapshotManager::new();
        manager.prepare("postgres://unused/unused", false, None).await.unwrap();
        assert_eq!(manager.state(), SnapshotState::Skipped);
        assert!(manager.copy("postgres://unused/unused").is_none());
    }

    #[tokio::test]
    async fn close_on_skipped_manager_is_a_noop() {
        let mut manager = SnapshotManager::new();
        manager.prepare("postgres://unused/unused", false, None).await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(manager.state(), SnapshotState::Closed);
        manager.close().await.unwrap();
        assert_eq!(manager.state(), SnapshotState::Closed);
    }
}
