// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Renders [`DecodedValue`]s into SQL literals (§4.6). Booleans render as
//! `true`/`false`, integers as decimal, doubles with enough precision to
//! round-trip, strings with standard escaping, nulls as `NULL`, and
//! anything else verbatim as already-quoted decoder text.

use copydb_repr::DecodedValue;

pub fn sql_literal(value: &DecodedValue) -> String {
    match value {
        DecodedValue::Null => "NULL".to_string(),
        DecodedValue::Bool(b) => if *b { "true".to_string() } else { "false".to_string() },
        DecodedValue::Int(i) => i.to_string(),
        // Rust's float Display already emits the shortest string that
        // round-trips back to the same f64.
        DecodedValue::Float(f) => f.to_string(),
        DecodedValue::Text(s) => quote_literal(s),
        DecodedValue::Raw(s) => s.clone(),
    }
}

/// Quotes `s` as a standard SQL string literal, doubling embedded quotes.
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Renders a `BEGIN;` transaction marker with its xid/lsn/timestamp
/// carried in a trailing JSON comment (§6), so it is valid SQL on its own
/// and `apply` can recover the metadata without a side channel.
pub fn render_begin_marker(xid: u32, lsn: &str, timestamp: &str) -> String {
    let comment = serde_json::json!({ "xid": xid, "lsn": lsn, "timestamp": timestamp });
    format!("BEGIN; -- {comment}")
}

pub fn render_commit_marker(xid: u32, lsn: &str) -> String {
    let comment = serde_json::json!({ "xid": xid, "lsn": lsn });
    format!("COMMIT; -- {comment}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_renders_as_null_keyword() {
        assert_eq!(sql_literal(&DecodedValue::Null), "NULL");
    }

    #[test]
    fn booleans_render_lowercase() {
        assert_eq!(sql_literal(&DecodedValue::Bool(true)), "true");
        assert_eq!(sql_literal(&DecodedValue::Bool(false)), "false");
    }

    #[test]
    fn strings_escape_embedded_quotes() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn raw_values_pass_through_unquoted_by_us() {
        // The decoder already quoted this; we must not double-quote it.
        assert_eq!(sql_literal(&DecodedValue::Raw("'{1,2,3}'".into())), "'{1,2,3}'");
    }

    #[test]
    fn integers_render_as_plain_decimal() {
        assert_eq!(sql_literal(&DecodedValue::Int(-42)), "-42");
    }
}
