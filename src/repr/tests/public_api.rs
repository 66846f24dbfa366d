// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Black-box coverage of `copydb-repr`'s public surface: the types other
//! crates actually import, exercised the way they're actually used
//! together rather than in isolation.

use copydb_repr::{
    ColumnValue, DecodedValue, Lsn, LogicalMessage, Sentinel, Statement, TupleData,
};

#[test]
fn sentinel_tracks_replay_progress_against_a_parsed_lsn_window() {
    let start: Lsn = "0/0".parse().unwrap();
    let end: Lsn = "0/2000".parse().unwrap();
    let mut sentinel = Sentinel::new(start);
    sentinel.end_lsn = Some(end);
    sentinel.apply_enabled = true;

    assert!(!sentinel.reached_end_pos());

    sentinel.replay_lsn = "0/1000".parse().unwrap();
    assert!(!sentinel.reached_end_pos());

    sentinel.replay_lsn = end;
    assert!(sentinel.reached_end_pos());

    let json = serde_json::to_string(&sentinel).unwrap();
    let back: Sentinel = serde_json::from_str(&json).unwrap();
    assert_eq!(back, sentinel);
}

#[test]
fn a_decoded_transaction_serializes_as_a_json_lines_segment() {
    let lsn = Lsn::new(0, 0x40);
    let tuple = TupleData {
        columns: vec![
            ColumnValue { name: "id".into(), value: DecodedValue::Int(1) },
            ColumnValue { name: "label".into(), value: DecodedValue::Text("hi".into()) },
        ],
    };
    let messages = vec![
        LogicalMessage::Begin { xid: 9, lsn, timestamp: "2026-01-01 00:00:00".into() },
        LogicalMessage::Insert { xid: 9, lsn, namespace: "public".into(), relation: "t".into(), new_tuple: tuple },
        LogicalMessage::Commit { xid: 9, lsn },
    ];

    let mut jsonl = String::new();
    for msg in &messages {
        jsonl.push_str(&serde_json::to_string(msg).unwrap());
        jsonl.push('\n');
    }

    let parsed: Vec<LogicalMessage> = jsonl.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(parsed, messages);
    assert!(parsed.iter().all(|m| m.lsn() == lsn));
    assert_eq!(parsed[0].xid(), Some(9));
}

#[test]
fn statement_rendering_distinguishes_sql_from_markers() {
    let sql = Statement::Sql("INSERT INTO t DEFAULT VALUES;".into());
    let marker = Statement::SwitchWalComment(Lsn::new(1, 0));
    assert_ne!(sql, marker);
    assert_eq!(Lsn::new(1, 0).to_string(), "1/0");
}

#[test]
fn lsn_ordering_respects_segment_boundaries_not_string_length() {
    let low: Lsn = "0/FFFFFFF".parse().unwrap();
    let high: Lsn = "1/0".parse().unwrap();
    assert!(low < high);
}
