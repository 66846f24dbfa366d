// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! `stream receive` (C6, §4.5 step 1-2): streams a logical replication
//! slot and appends decoded messages as JSON lines into WAL-segment-sized
//! files under the CDC directory.
//!
//! Segment files are the handoff to `transform`: a segment is closed
//! (renamed with a `.closed` sibling marker) once `receive` rotates past
//! it or shuts down cleanly, and `transform` only ever reads closed
//! segments. This lets `receive`/`transform`/`apply` run as independent
//! CLI invocations against the same CDC directory.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::interval;
use tokio_postgres::{Client, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use copydb_repr::{CopydbError, Lsn};
use copydb_workdir::WorkDirPaths;

use crate::plugin::{self, DecodeState, Plugin};

/// Microseconds between the Postgres epoch (2000-01-01) and the Unix epoch.
const PG_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

pub struct ReceiveConfig {
    pub slot_name: String,
    pub plugin: Plugin,
    pub wal_seg_size: u64,
    pub cdc_dir: PathBuf,
    pub keepalive_interval: Duration,
}

/// Streams the slot until `cancel` fires, then flushes and closes the
/// current segment before returning.
pub async fn receive(source_uri: &str, config: ReceiveConfig, cancel: CancellationToken) -> Result<(), CopydbError> {
    let paths = WorkDirPaths::new(None);
    tokio::fs::create_dir_all(&config.cdc_dir).await?;

    let replication_uri = with_replication_param(source_uri)?;
    let (client, connection) = tokio_postgres::connect(&replication_uri, NoTls)
        .await
        .map_err(|e| CopydbError::upstream(format!("connecting for replication: {e}")))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "replication connection closed with error");
        }
    });

    ensure_slot(&client, &config.slot_name, config.plugin).await?;
    let start_lsn = confirmed_flush_lsn(&client, &config.slot_name).await?;

    let query = start_replication_query(&config.slot_name, config.plugin, start_lsn);
    let mut duplex = client
        .copy_both_simple::<Bytes>(&query)
        .await
        .map_err(|e| CopydbError::upstream(format!("START_REPLICATION failed: {e}")))?;

    let mut state = DecodeState::new();
    let mut writer = SegmentWriter::new(&paths, &config.cdc_dir, config.wal_seg_size);
    let mut received_lsn = start_lsn;
    let mut ticker = interval(config.keepalive_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                writer.close_current().await?;
                send_feedback(&mut duplex, received_lsn).await?;
                info!(lsn = %received_lsn, "receive stopped on request");
                return Ok(());
            }
            _ = ticker.tick() => {
                send_feedback(&mut duplex, received_lsn).await?;
            }
            msg = duplex.next() => {
                let Some(msg) = msg else {
                    writer.close_current().await?;
                    return Err(CopydbError::upstream("replication stream closed by server"));
                };
                let mut buf = msg.map_err(|e| CopydbError::upstream(format!("replication stream error: {e}")))?;
                match buf.get_u8() {
                    b'w' => {
                        let (lsn, payload) = parse_xlog_data(&mut buf)?;
                        received_lsn = lsn;
                        for message in plugin::decode(config.plugin, &payload, lsn, &mut state)? {
                            writer.append(&message).await?;
                        }
                    }
                    b'k' => {
                        let (keepalive_lsn, reply_requested) = parse_keepalive(&mut buf)?;
                        if keepalive_lsn > received_lsn {
                            received_lsn = keepalive_lsn;
                        }
                        writer
                            .append(&copydb_repr::LogicalMessage::Keepalive {
                                lsn: received_lsn,
                                timestamp: now_pg_micros().to_string(),
                            })
                            .await?;
                        if reply_requested {
                            send_feedback(&mut duplex, received_lsn).await?;
                        }
                    }
                    other => warn!(tag = other, "ignoring unknown replication message tag"),
                }
            }
        }
    }
}

fn with_replication_param(uri: &str) -> Result<String, CopydbError> {
    if uri.contains("replication=") {
        return Ok(uri.to_string());
    }
    let separator = if uri.contains('?') { '&' } else { '?' };
    Ok(format!("{uri}{separator}replication=database"))
}

async fn ensure_slot(client: &Client, slot_name: &str, plugin: Plugin) -> Result<(), CopydbError> {
    let exists = client
        .query_opt("SELECT 1 FROM pg_replication_slots WHERE slot_name = $1", &[&slot_name])
        .await
        .map_err(|e| CopydbError::upstream(format!("checking replication slot: {e}")))?
        .is_some();
    if exists {
        return Ok(());
    }
    let plugin_name = plugin_name(plugin);
    let query = format!("CREATE_REPLICATION_SLOT \"{slot_name}\" LOGICAL {plugin_name}");
    client
        .simple_query(&query)
        .await
        .map_err(|e| CopydbError::upstream(format!("creating replication slot: {e}")))?;
    info!(slot_name, plugin_name, "created replication slot");
    Ok(())
}

async fn confirmed_flush_lsn(client: &Client, slot_name: &str) -> Result<Lsn, CopydbError> {
    let row = client
        .query_one(
            "SELECT confirmed_flush_lsn::text FROM pg_replication_slots WHERE slot_name = $1",
            &[&slot_name],
        )
        .await
        .map_err(|e| CopydbError::upstream(format!("reading slot confirmed_flush_lsn: {e}")))?;
    let lsn: String = row.get(0);
    lsn.parse()
}

fn plugin_name(plugin: Plugin) -> &'static str {
    match plugin {
        Plugin::TestDecoding => "test_decoding",
        Plugin::Wal2Json => "wal2json",
    }
}

fn start_replication_query(slot_name: &str, plugin: Plugin, start_lsn: Lsn) -> String {
    let options = match plugin {
        Plugin::TestDecoding => String::new(),
        Plugin::Wal2Json => " (\"include-timestamp\" 'true')".to_string(),
    };
    format!("START_REPLICATION SLOT \"{slot_name}\" LOGICAL {start_lsn}{options}")
}

/// Parses the body of an XLogData ('w') message: start LSN (8 bytes),
/// end LSN (8 bytes), sender timestamp (8 bytes), then the plugin payload.
fn parse_xlog_data(buf: &mut Bytes) -> Result<(Lsn, String), CopydbError> {
    if buf.remaining() < 24 {
        return Err(CopydbError::data("truncated XLogData message"));
    }
    let start = buf.get_u64();
    let _end = buf.get_u64();
    let _timestamp = buf.get_i64();
    let payload = String::from_utf8(buf.chunk().to_vec())
        .map_err(|e| CopydbError::data(format!("non-UTF8 replication payload: {e}")))?;
    Ok((Lsn(start), payload))
}

/// Parses the body of a Primary keepalive ('k') message: end LSN (8
/// bytes), sender timestamp (8 bytes), reply-requested flag (1 byte).
fn parse_keepalive(buf: &mut Bytes) -> Result<(Lsn, bool), CopydbError> {
    if buf.remaining() < 17 {
        return Err(CopydbError::data("truncated keepalive message"));
    }
    let end = buf.get_u64();
    let _timestamp = buf.get_i64();
    Ok((Lsn(end), buf.get_u8() != 0))
}

async fn send_feedback<S>(duplex: &mut S, lsn: Lsn) -> Result<(), CopydbError>
where
    S: futures::Sink<Bytes, Error = tokio_postgres::Error> + Unpin,
{
    let mut buf = BytesMut::with_capacity(34);
    buf.put_u8(b'r');
    buf.put_u64(lsn.0);
    buf.put_u64(lsn.0);
    buf.put_u64(lsn.0);
    buf.put_i64(now_pg_micros());
    buf.put_u8(0);
    duplex
        .send(buf.freeze())
        .await
        .map_err(|e| CopydbError::upstream(format!("sending standby status update: {e}")))
}

fn now_pg_micros() -> i64 {
    let unix_micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    unix_micros - PG_EPOCH_OFFSET_MICROS
}

/// Owns the currently-open segment file, rotating (and marking the
/// previous one `.closed`) whenever a message's LSN crosses into a new
/// WAL segment.
struct SegmentWriter<'a> {
    paths: &'a WorkDirPaths,
    cdc_dir: &'a Path,
    wal_seg_size: u64,
    current_segment: Option<u64>,
    file: Option<File>,
}

impl<'a> SegmentWriter<'a> {
    fn new(paths: &'a WorkDirPaths, cdc_dir: &'a Path, wal_seg_size: u64) -> Self {
        SegmentWriter { paths, cdc_dir, wal_seg_size, current_segment: None, file: None }
    }

    async fn append(&mut self, message: &copydb_repr::LogicalMessage) -> Result<(), CopydbError> {
        let segment = message.lsn().segment(self.wal_seg_size);
        if self.current_segment != Some(segment) {
            self.rotate_to(segment).await?;
        }
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let file = self.file.as_mut().expect("rotate_to always opens a file");
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn rotate_to(&mut self, segment: u64) -> Result<(), CopydbError> {
        if self.file.is_some() {
            let boundary = Lsn(segment * self.wal_seg_size);
            let mut line = serde_json::to_string(&copydb_repr::LogicalMessage::SwitchWal { lsn: boundary })?;
            line.push('\n');
            self.file.as_mut().expect("checked above").write_all(line.as_bytes()).await?;
        }
        self.close_current().await?;
        let path = self.paths.cdc_json_file(self.cdc_dir, segment);
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.seek(SeekFrom::End(0)).await?;
        self.file = Some(file);
        self.current_segment = Some(segment);
        Ok(())
    }

    async fn close_current(&mut self) -> Result<(), CopydbError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            if let Some(segment) = self.current_segment {
                let path = self.paths.cdc_json_file(self.cdc_dir, segment);
                let marker = path.with_extension("json.closed");
                tokio::fs::write(&marker, b"").await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_param_is_appended_once() {
        assert_eq!(with_replication_param("postgres://h/db").unwrap(), "postgres://h/db?replication=database");
        assert_eq!(
            with_replication_param("postgres://h/db?sslmode=disable").unwrap(),
            "postgres://h/db?sslmode=disable&replication=database"
        );
        assert!(with_replication_param("postgres://h/db?replication=database").unwrap().matches("replication=").count() == 1);
    }

    #[test]
    fn start_replication_query_includes_slot_and_lsn() {
        let q = start_replication_query("copydb", Plugin::TestDecoding, Lsn::new(0, 100));
        assert!(q.contains("SLOT \"copydb\""));
        assert!(q.contains("LOGICAL 0/64"));
    }

    #[test]
    fn xlog_data_parses_start_lsn_and_payload() {
        let mut buf = BytesMut::new();
        buf.put_u64(0x1000);
        buf.put_u64(0x1100);
        buf.put_i64(0);
        buf.put_slice(b"BEGIN 1");
        let mut bytes = buf.freeze();
        let (lsn, payload) = parse_xlog_data(&mut bytes).unwrap();
        assert_eq!(lsn, Lsn(0x1000));
        assert_eq!(payload, "BEGIN 1");
    }

    #[test]
    fn keepalive_reply_flag_is_read() {
        let mut buf = BytesMut::new();
        buf.put_u64(0x2000);
        buf.put_i64(0);
        buf.put_u8(1);
        let mut bytes = buf.freeze();
        let (lsn, reply_requested) = parse_keepalive(&mut bytes).unwrap();
        assert_eq!(lsn, Lsn(0x2000));
        assert!(reply_requested);
    }
}
