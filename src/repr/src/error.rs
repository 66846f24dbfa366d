// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The process-wide error taxonomy.
//!
//! Every layer `?`-propagates into [`CopydbError`] at its crate boundary;
//! the CLI is the only place that renders it to the user. The five variants
//! correspond one-to-one with the error kinds in the specification: bad
//! input never touches the network, environment problems get a remedy in
//! the message, upstream/data problems carry enough context to find the
//! offending relation or LSN, and bugs are never silently downgraded.

use thiserror::Error;

/// The unified error type for all of copydb.
#[derive(Debug, Error)]
pub enum CopydbError {
    /// Bad URI, missing environment variable, unparseable size — caught
    /// before any I/O is attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Work directory busy, permission denied, disk full.
    #[error("environmental error: {0}")]
    Environmental(String),

    /// Connection lost, query error, snapshot invalid.
    #[error("upstream database error: {0}")]
    Upstream(String),

    /// Truncated summary file, malformed JSON line, and other data
    /// corruption that is local to one unit of work.
    #[error("data error: {0}")]
    Data(String),

    /// A violated invariant. Always fatal, always logged with a `BUG:`
    /// prefix by the caller.
    #[error("BUG: {0}")]
    Bug(String),
}

impl CopydbError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        CopydbError::Configuration(msg.into())
    }

    pub fn environmental(msg: impl Into<String>) -> Self {
        CopydbError::Environmental(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        CopydbError::Upstream(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        CopydbError::Data(msg.into())
    }

    pub fn bug(msg: impl Into<String>) -> Self {
        CopydbError::Bug(msg.into())
    }

    /// Whether this error should be treated as fatal to the whole run
    /// (as opposed to a per-unit failure that `--fail-fast=false` can
    /// tolerate).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CopydbError::Data(_))
    }
}

impl From<std::io::Error> for CopydbError {
    fn from(e: std::io::Error) -> Self {
        CopydbError::Environmental(e.to_string())
    }
}

impl From<serde_json::Error> for CopydbError {
    fn from(e: serde_json::Error) -> Self {
        CopydbError::Data(e.to_string())
    }
}
