// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! `stream transform` (C7, §4.6): a pure function from one closed JSON
//! segment file to a SQL file. Idempotent over a segment — re-running it
//! on an already-transformed segment is a no-op.

use std::path::{Path, PathBuf};

use copydb_repr::{CopydbError, Lsn, LogicalMessage, Statement, TupleData};
use copydb_workdir::WorkDirPaths;

use crate::encode::{quote_ident, render_begin_marker, render_commit_marker, sql_literal};

/// Lists closed segments that have not yet been transformed, oldest
/// first.
pub async fn pending_segments(cdc_dir: &Path) -> Result<Vec<PathBuf>, CopydbError> {
    let mut closed = Vec::new();
    let mut entries = tokio::fs::read_dir(cdc_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("closed") {
            let json_path = path.with_extension("");
            let transformed_marker = json_path.with_extension("json.transformed");
            if !tokio::fs::try_exists(&transformed_marker).await? {
                closed.push(json_path);
            }
        }
    }
    closed.sort();
    Ok(closed)
}

/// Transforms one closed JSON segment into a SQL file, returning its path
/// (or `None` if the segment had no messages worth writing out, or was
/// already transformed).
pub async fn transform_segment(
    paths: &WorkDirPaths,
    cdc_dir: &Path,
    json_path: &Path,
) -> Result<Option<PathBuf>, CopydbError> {
    let transformed_marker = json_path.with_extension("json.transformed");
    if tokio::fs::try_exists(&transformed_marker).await? {
        return Ok(None);
    }

    let content = tokio::fs::read_to_string(json_path).await?;
    let mut statements = Vec::new();
    let mut first_lsn: Option<Lsn> = None;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let message: LogicalMessage = serde_json::from_str(line)?;
        first_lsn.get_or_insert_with(|| message.lsn());
        if let Some(statement) = render_message(&message) {
            statements.push(statement);
        }
    }

    let Some(first_lsn) = first_lsn else {
        tokio::fs::write(&transformed_marker, b"").await?;
        return Ok(None);
    };

    let sql_path = paths.cdc_sql_file(cdc_dir, first_lsn);
    let mut text = String::new();
    for statement in &statements {
        text.push_str(&statement_to_text(statement));
        text.push('\n');
    }
    tokio::fs::write(&sql_path, text).await?;
    tokio::fs::write(&transformed_marker, b"").await?;
    Ok(Some(sql_path))
}

fn render_message(message: &LogicalMessage) -> Option<Statement> {
    match message {
        LogicalMessage::Begin { xid, lsn, timestamp } => {
            Some(Statement::Sql(render_begin_marker(*xid, &lsn.to_string(), timestamp)))
        }
        LogicalMessage::Commit { xid, lsn } => Some(Statement::Sql(render_commit_marker(*xid, &lsn.to_string()))),
        LogicalMessage::Insert { namespace, relation, new_tuple, .. } => {
            Some(Statement::Sql(render_insert(namespace, relation, new_tuple)))
        }
        LogicalMessage::Update { namespace, relation, old_tuple, new_tuple, .. } => {
            Some(Statement::Sql(render_update(namespace, relation, old_tuple.as_ref(), new_tuple)))
        }
        LogicalMessage::Delete { namespace, relation, old_tuple, .. } => {
            Some(Statement::Sql(render_delete(namespace, relation, old_tuple)))
        }
        LogicalMessage::Truncate { namespace, relation, .. } => {
            Some(Statement::Sql(format!("TRUNCATE TABLE {}.{};", quote_ident(namespace), quote_ident(relation))))
        }
        LogicalMessage::SwitchWal { lsn } => Some(Statement::SwitchWalComment(*lsn)),
        LogicalMessage::Keepalive { lsn, timestamp } => {
            Some(Statement::KeepaliveComment { lsn: *lsn, timestamp: timestamp.clone() })
        }
        LogicalMessage::Message { .. } => None,
    }
}

fn render_insert(namespace: &str, relation: &str, tuple: &TupleData) -> String {
    let columns: Vec<&str> = tuple.columns.iter().map(|c| c.name.as_str()).collect();
    let values: Vec<String> = tuple.columns.iter().map(|c| sql_literal(&c.value)).collect();
    format!(
        "INSERT INTO {}.{} ({}) VALUES ({});",
        quote_ident(namespace),
        quote_ident(relation),
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        values.join(", "),
    )
}

fn render_update(namespace: &str, relation: &str, old_tuple: Option<&TupleData>, new_tuple: &TupleData) -> String {
    let assignments: Vec<String> = new_tuple
        .columns
        .iter()
        .map(|c| format!("{} = {}", quote_ident(&c.name), sql_literal(&c.value)))
        .collect();
    let key_tuple = old_tuple.unwrap_or(new_tuple);
    let predicate = render_predicate(key_tuple);
    format!(
        "UPDATE {}.{} SET {} WHERE {};",
        quote_ident(namespace),
        quote_ident(relation),
        assignments.join(", "),
        predicate,
    )
}

fn render_delete(namespace: &str, relation: &str, old_tuple: &TupleData) -> String {
    format!(
        "DELETE FROM {}.{} WHERE {};",
        quote_ident(namespace),
        quote_ident(relation),
        render_predicate(old_tuple),
    )
}

fn render_predicate(tuple: &TupleData) -> String {
    tuple
        .columns
        .iter()
        .map(|c| format!("{} = {}", quote_ident(&c.name), sql_literal(&c.value)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn statement_to_text(statement: &Statement) -> String {
    match statement {
        Statement::Sql(s) => s.clone(),
        Statement::SwitchWalComment(lsn) => format!("-- SWITCH WAL {lsn}"),
        Statement::KeepaliveComment { lsn, timestamp } => format!("-- KEEPALIVE {lsn} {timestamp}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copydb_repr::{ColumnValue, DecodedValue};

    fn tuple(pairs: &[(&str, DecodedValue)]) -> TupleData {
        TupleData {
            columns: pairs.iter().map(|(n, v)| ColumnValue { name: n.to_string(), value: v.clone() }).collect(),
        }
    }

    #[test]
    fn insert_renders_columns_and_values() {
        let t = tuple(&[("id", DecodedValue::Int(1)), ("name", DecodedValue::Text("bob".into()))]);
        let sql = render_insert("public", "foo", &t);
        assert_eq!(sql, "INSERT INTO \"public\".\"foo\" (\"id\", \"name\") VALUES (1, 'bob');");
    }

    #[test]
    fn update_uses_old_tuple_as_predicate_when_present() {
        let old = tuple(&[("id", DecodedValue::Int(1))]);
        let new = tuple(&[("id", DecodedValue::Int(2)), ("name", DecodedValue::Text("x".into()))]);
        let sql = render_update("public", "foo", Some(&old), &new);
        assert!(sql.starts_with("UPDATE \"public\".\"foo\" SET"));
        assert!(sql.ends_with("WHERE \"id\" = 1;"));
    }

    #[test]
    fn delete_renders_where_clause_from_old_tuple() {
        let old = tuple(&[("id", DecodedValue::Int(7))]);
        assert_eq!(render_delete("public", "foo", &old), "DELETE FROM \"public\".\"foo\" WHERE \"id\" = 7;");
    }

    #[test]
    fn truncate_renders_plain_statement() {
        let msg = LogicalMessage::Truncate { xid: 1, lsn: Lsn::ZERO, namespace: "public".into(), relation: "foo".into() };
        let stmt = render_message(&msg).unwrap();
        assert_eq!(statement_to_text(&stmt), "TRUNCATE TABLE \"public\".\"foo\";");
    }

    #[test]
    fn switch_wal_renders_as_comment() {
        let stmt = Statement::SwitchWalComment(Lsn::new(0, 0x1000));
        assert_eq!(statement_to_text(&stmt), "-- SWITCH WAL 0/1000");
    }

    #[tokio::test]
    async fn transform_is_idempotent_on_an_already_transformed_segment() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(dir.path()));
        let json_path = dir.path().join("0000000000000000.json");
        tokio::fs::write(&json_path, b"").await.unwrap();
        let first = transform_segment(&paths, dir.path(), &json_path).await.unwrap();
        assert!(first.is_none());
        let second = transform_segment(&paths, dir.path(), &json_path).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn transform_renders_a_full_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(dir.path()));
        let json_path = dir.path().join("0000000000000000.json");
        let lsn = Lsn::new(0, 1);
        let begin = LogicalMessage::Begin { xid: 1, lsn, timestamp: "t".into() };
        let insert = LogicalMessage::Insert {
            xid: 1,
            lsn,
            namespace: "public".into(),
            relation: "foo".into(),
            new_tuple: tuple(&[("id", DecodedValue::Int(1))]),
        };
        let commit = LogicalMessage::Commit { xid: 1, lsn };
        let mut content = String::new();
        for msg in [begin, insert, commit] {
            content.push_str(&serde_json::to_string(&msg).unwrap());
            content.push('\n');
        }
        tokio::fs::write(&json_path, content).await.unwrap();

        let sql_path = transform_segment(&paths, dir.path(), &json_path).await.unwrap().unwrap();
        let sql = tokio::fs::read_to_string(&sql_path).await.unwrap();
        assert!(sql.starts_with("BEGIN; -- {"));
        assert!(sql.contains("INSERT INTO"));
        assert!(sql.contains("COMMIT; -- {"));
    }
}
