// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Parses `wal2json`'s single-line-per-transaction JSON format:
//!
//! ```text
//! {"xid":691,"timestamp":"...","change":[
//!   {"kind":"insert","schema":"public","table":"foo",
//!    "columnnames":["id","name"],"columntypes":["integer","text"],
//!    "columnvalues":[1,"bob"]},
//!   {"kind":"update", ..., "oldkeys":{"keynames":[...],"keytypes":[...],"keyvalues":[...]}},
//!   {"kind":"delete", "oldkeys":{...}}
//! ]}
//! ```
//!
//! One `LogicalMessage::Begin`/`Commit` pair plus one message per `change`
//! entry is emitted, since the rest of the pipeline is plugin-agnostic and
//! expects row changes bracketed that way regardless of source plugin.

use serde::Deserialize;
use serde_json::Value;

use copydb_repr::{ColumnValue, CopydbError, DecodedValue, Lsn, LogicalMessage, TupleData};

#[derive(Deserialize)]
struct Transaction {
    xid: u32,
    timestamp: String,
    #[serde(default)]
    change: Vec<Change>,
}

#[derive(Deserialize)]
struct Change {
    kind: String,
    schema: String,
    table: String,
    #[serde(default)]
    columnnames: Vec<String>,
    #[serde(default)]
    columntypes: Vec<String>,
    #[serde(default)]
    columnvalues: Vec<Value>,
    oldkeys: Option<OldKeys>,
}

#[derive(Deserialize)]
struct OldKeys {
    #[serde(default)]
    keynames: Vec<String>,
    #[serde(default)]
    keytypes: Vec<String>,
    #[serde(default)]
    keyvalues: Vec<Value>,
}

pub fn parse_transaction(raw: &str, lsn: Lsn) -> Result<Vec<LogicalMessage>, CopydbError> {
    let txn: Transaction = serde_json::from_str(raw)
        .map_err(|e| CopydbError::data(format!("malformed wal2json transaction: {e}")))?;

    let mut messages = Vec::with_capacity(txn.change.len() + 2);
    messages.push(LogicalMessage::Begin { xid: txn.xid, lsn, timestamp: txn.timestamp });

    for change in txn.change {
        let namespace = change.schema.clone();
        let relation = change.table.clone();
        let new_tuple = || build_tuple(&change.columnnames, &change.columntypes, &change.columnvalues);
        let old_tuple = |keys: &OldKeys| build_tuple(&keys.keynames, &keys.keytypes, &keys.keyvalues);

        let message = match change.kind.as_str() {
            "insert" => LogicalMessage::Insert {
                xid: txn.xid,
                lsn,
                namespace,
                relation,
                new_tuple: new_tuple()?,
            },
            "update" => LogicalMessage::Update {
                xid: txn.xid,
                lsn,
                namespace,
                relation,
                old_tuple: change.oldkeys.as_ref().map(old_tuple).transpose()?,
                new_tuple: new_tuple()?,
            },
            "delete" => {
                let keys = change
                    .oldkeys
                    .as_ref()
                    .ok_or_else(|| CopydbError::data("delete change missing oldkeys"))?;
                LogicalMessage::Delete { xid: txn.xid, lsn, namespace, relation, old_tuple: old_tuple(keys)? }
            }
            "truncate" => LogicalMessage::Truncate { xid: txn.xid, lsn, namespace, relation },
            other => return Err(CopydbError::data(format!("unknown wal2json change kind: {other:?}"))),
        };
        messages.push(message);
    }

    messages.push(LogicalMessage::Commit { xid: txn.xid, lsn });
    Ok(messages)
}

fn build_tuple(names: &[String], types: &[String], values: &[Value]) -> Result<TupleData, CopydbError> {
    if names.len() != values.len() || names.len() != types.len() {
        return Err(CopydbError::data("column name/type/value arrays have mismatched lengths"));
    }
    let columns = names
        .iter()
        .zip(types.iter())
        .zip(values.iter())
        .map(|((name, pg_type), value)| {
            Ok(ColumnValue { name: name.clone(), value: decode_value(pg_type, value)? })
        })
        .collect::<Result<Vec<_>, CopydbError>>()?;
    Ok(TupleData { columns })
}

fn decode_value(pg_type: &str, value: &Value) -> Result<DecodedValue, CopydbError> {
    if value.is_null() {
        return Ok(DecodedValue::Null);
    }
    match pg_type {
        "boolean" | "bool" => value
            .as_bool()
            .map(DecodedValue::Bool)
            .ok_or_else(|| CopydbError::data(format!("expected bool, got {value}"))),
        "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" | "oid" => value
            .as_i64()
            .map(DecodedValue::Int)
            .ok_or_else(|| CopydbError::data(format!("expected integer, got {value}"))),
        "real" | "double precision" | "float4" | "float8" | "numeric" | "decimal" => value
            .as_f64()
            .map(DecodedValue::Float)
            .ok_or_else(|| CopydbError::data(format!("expected float, got {value}"))),
        "text" | "varchar" | "character varying" | "character" | "bpchar" | "name" | "uuid" => value
            .as_str()
            .map(|s| DecodedValue::Text(s.to_string()))
            .ok_or_else(|| CopydbError::data(format!("expected string, got {value}"))),
        _ => Ok(DecodedValue::Raw(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brackets_changes_between_begin_and_commit() {
        let raw = r#"{"xid":1,"timestamp":"t","change":[
            {"kind":"insert","schema":"public","table":"foo",
             "columnnames":["id"],"columntypes":["integer"],"columnvalues":[1]}
        ]}"#;
        let msgs = parse_transaction(raw, Lsn::new(0, 1)).unwrap();
        assert_eq!(msgs.len(), 3);
        assert!(matches!(msgs[0], LogicalMessage::Begin { xid: 1, .. }));
        assert!(matches!(msgs[1], LogicalMessage::Insert { xid: 1, .. }));
        assert!(matches!(msgs[2], LogicalMessage::Commit { xid: 1, .. }));
    }

    #[test]
    fn update_carries_old_and_new_tuples() {
        let raw = r#"{"xid":2,"timestamp":"t","change":[
            {"kind":"update","schema":"public","table":"foo",
             "columnnames":["id","name"],"columntypes":["integer","text"],"columnvalues":[1,"bob"],
             "oldkeys":{"keynames":["id"],"keytypes":["integer"],"keyvalues":[1]}}
        ]}"#;
        let msgs = parse_transaction(raw, Lsn::ZERO).unwrap();
        match &msgs[1] {
            LogicalMessage::Update { old_tuple, new_tuple, .. } => {
                assert!(old_tuple.is_some());
                assert_eq!(new_tuple.columns.len(), 2);
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn delete_without_oldkeys_is_an_error() {
        let raw = r#"{"xid":3,"timestamp":"t","change":[
            {"kind":"delete","schema":"public","table":"foo"}
        ]}"#;
        assert!(parse_transaction(raw, Lsn::ZERO).is_err());
    }

    #[test]
    fn malformed_json_is_a_data_error() {
        let err = parse_transaction("not json", Lsn::ZERO).unwrap_err();
        assert!(matches!(err, CopydbError::Data(_)));
    }
}
