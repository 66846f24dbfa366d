// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Parses the `test_decoding` output plugin's human-readable lines.
//!
//! `test_decoding` writes one line per message:
//!
//! ```text
//! BEGIN 691
//! table public.foo: INSERT: id[integer]:1 name[text]:'bob'
//! table public.foo: UPDATE: old-key: id[integer]:1 new-tuple: id[integer]:1 name[text]:'bobby'
//! table public.foo: DELETE: id[integer]:1
//! table public.foo: TRUNCATE:
//! COMMIT 691
//! ```
//!
//! Unlike `wal2json`, a transaction's `xid` only appears on its `BEGIN`/
//! `COMMIT` lines, so the caller threads it through via `xid_context`.

use copydb_repr::{ColumnValue, CopydbError, DecodedValue, Lsn, LogicalMessage, TupleData};

pub fn parse_line(
    line: &str,
    lsn: Lsn,
    xid_context: &mut Option<u32>,
) -> Result<Option<LogicalMessage>, CopydbError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(rest) = line.strip_prefix("BEGIN ") {
        let xid = parse_xid(rest)?;
        *xid_context = Some(xid);
        return Ok(Some(LogicalMessage::Begin { xid, lsn, timestamp: String::new() }));
    }

    if let Some(rest) = line.strip_prefix("COMMIT ") {
        let xid = parse_xid(rest)?;
        *xid_context = None;
        return Ok(Some(LogicalMessage::Commit { xid, lsn }));
    }

    if let Some(rest) = line.strip_prefix("table ") {
        let xid = xid_context
            .ok_or_else(|| CopydbError::data("row change outside BEGIN/COMMIT bracket"))?;
        return parse_table_line(rest, xid, lsn).map(Some);
    }

    // Unrecognized lines (e.g. a decoder banner) are skipped, not fatal.
    Ok(None)
}

fn parse_xid(rest: &str) -> Result<u32, CopydbError> {
    rest.trim()
        .parse()
        .map_err(|e| CopydbError::data(format!("malformed xid in {rest:?}: {e}")))
}

fn parse_table_line(rest: &str, xid: u32, lsn: Lsn) -> Result<LogicalMessage, CopydbError> {
    let (qualified, rest) = rest
        .split_once(':')
        .ok_or_else(|| CopydbError::data(format!("malformed table line: {rest:?}")))?;
    let (namespace, relation) = qualified
        .trim()
        .split_once('.')
        .ok_or_else(|| CopydbError::data(format!("unqualified relation name: {qualified:?}")))?;
    let (namespace, relation) = (namespace.to_string(), relation.to_string());

    let rest = rest.trim();
    if let Some(cols) = rest.strip_prefix("INSERT:") {
        let new_tuple = parse_tuple(cols.trim())?;
        return Ok(LogicalMessage::Insert { xid, lsn, namespace, relation, new_tuple });
    }
    if let Some(cols) = rest.strip_prefix("DELETE:") {
        let old_tuple = parse_tuple(cols.trim())?;
        return Ok(LogicalMessage::Delete { xid, lsn, namespace, relation, old_tuple });
    }
    if let Some(cols) = rest.strip_prefix("TRUNCATE") {
        let _ = cols;
        return Ok(LogicalMessage::Truncate { xid, lsn, namespace, relation });
    }
    if let Some(cols) = rest.strip_prefix("UPDATE:") {
        let cols = cols.trim();
        if let Some(after_old) = cols.strip_prefix("old-key:") {
            let (old_part, new_part) = after_old
                .split_once("new-tuple:")
                .ok_or_else(|| CopydbError::data(format!("malformed UPDATE line: {rest:?}")))?;
            let old_tuple = Some(parse_tuple(old_part.trim())?);
            let new_tuple = parse_tuple(new_part.trim())?;
            return Ok(LogicalMessage::Update { xid, lsn, namespace, relation, old_tuple, new_tuple });
        }
        let new_tuple = parse_tuple(cols)?;
        return Ok(LogicalMessage::Update { xid, lsn, namespace, relation, old_tuple: None, new_tuple });
    }

    Err(CopydbError::data(format!("unrecognized table line action: {rest:?}")))
}

/// Splits `name[type]:value name[type]:value ...` into columns, respecting
/// single-quoted values that may contain embedded spaces.
fn parse_tuple(s: &str) -> Result<TupleData, CopydbError> {
    let mut columns = Vec::new();
    for token in split_respecting_quotes(s) {
        if token.is_empty() {
            continue;
        }
        columns.push(parse_column(&token)?);
    }
    Ok(TupleData { columns })
}

fn split_respecting_quotes(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                current.push(c);
                if in_quote && chars.peek() == Some(&'\'') {
                    // Escaped quote inside the literal: keep both chars.
                    current.push(chars.next().unwrap());
                } else {
                    in_quote = !in_quote;
                }
            }
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_column(token: &str) -> Result<ColumnValue, CopydbError> {
    let (name, rest) = token
        .split_once('[')
        .ok_or_else(|| CopydbError::data(format!("malformed column token: {token:?}")))?;
    let (pg_type, value) = rest
        .split_once("]:")
        .ok_or_else(|| CopydbError::data(format!("malformed column token: {token:?}")))?;

    let value = decode_value(pg_type, value)?;
    Ok(ColumnValue { name: name.to_string(), value })
}

fn decode_value(pg_type: &str, raw: &str) -> Result<DecodedValue, CopydbError> {
    if raw == "null" {
        return Ok(DecodedValue::Null);
    }
    match pg_type {
        "boolean" | "bool" => match raw {
            "t" | "true" => Ok(DecodedValue::Bool(true)),
            "f" | "false" => Ok(DecodedValue::Bool(false)),
            other => Ok(DecodedValue::Raw(other.to_string())),
        },
        "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" | "oid" => raw
            .parse::<i64>()
            .map(DecodedValue::Int)
            .or_else(|_| Ok(DecodedValue::Raw(raw.to_string()))),
        "real" | "double precision" | "float4" | "float8" | "numeric" | "decimal" => raw
            .parse::<f64>()
            .map(DecodedValue::Float)
            .or_else(|_| Ok(DecodedValue::Raw(raw.to_string()))),
        "text" | "varchar" | "character varying" | "character" | "bpchar" | "name" | "uuid" => {
            Ok(DecodedValue::Text(unquote(raw)))
        }
        _ => Ok(DecodedValue::Raw(raw.to_string())),
    }
}

fn unquote(raw: &str) -> String {
    let stripped = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')).unwrap_or(raw);
    stripped.replace("''", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_sets_xid_context() {
        let mut ctx = None;
        let msg = parse_line("BEGIN 42", Lsn::new(0, 1), &mut ctx).unwrap().unwrap();
        assert!(matches!(msg, LogicalMessage::Begin { xid: 42, .. }));
        assert_eq!(ctx, Some(42));
    }

    #[test]
    fn commit_clears_xid_context() {
        let mut ctx = Some(42);
        let msg = parse_line("COMMIT 42", Lsn::new(0, 1), &mut ctx).unwrap().unwrap();
        assert!(matches!(msg, LogicalMessage::Commit { xid: 42, .. }));
        assert_eq!(ctx, None);
    }

    #[test]
    fn insert_line_parses_typed_columns() {
        let mut ctx = Some(7);
        let line = "table public.foo: INSERT: id[integer]:1 name[text]:'bob'";
        let msg = parse_line(line, Lsn::new(0, 1), &mut ctx).unwrap().unwrap();
        match msg {
            LogicalMessage::Insert { namespace, relation, new_tuple, .. } => {
                assert_eq!(namespace, "public");
                assert_eq!(relation, "foo");
                assert_eq!(new_tuple.columns[0].value, DecodedValue::Int(1));
                assert_eq!(new_tuple.columns[1].value, DecodedValue::Text("bob".into()));
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn quoted_value_with_embedded_space_is_one_token() {
        let tokens = split_respecting_quotes("id[integer]:1 name[text]:'bob jones'");
        assert_eq!(tokens, vec!["id[integer]:1", "name[text]:'bob jones'"]);
    }

    #[test]
    fn embedded_quote_is_unescaped() {
        assert_eq!(unquote("'O''Brien'"), "O'Brien");
    }

    #[test]
    fn update_with_old_key_captures_both_tuples() {
        let mut ctx = Some(7);
        let line =
            "table public.foo: UPDATE: old-key: id[integer]:1 new-tuple: id[integer]:2 name[text]:'x'";
        let msg = parse_line(line, Lsn::new(0, 1), &mut ctx).unwrap().unwrap();
        match msg {
            LogicalMessage::Update { old_tuple, new_tuple, .. } => {
                assert_eq!(old_tuple.unwrap().columns[0].value, DecodedValue::Int(1));
                assert_eq!(new_tuple.columns[0].value, DecodedValue::Int(2));
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn row_change_without_begin_is_an_error() {
        let mut ctx = None;
        let line = "table public.foo: DELETE: id[integer]:1";
        assert!(parse_line(line, Lsn::new(0, 1), &mut ctx).is_err());
    }

    #[test]
    fn blank_line_is_ignored() {
        let mut ctx = None;
        assert!(parse_line("   ", Lsn::ZERO, &mut ctx).unwrap().is_none());
    }
}
