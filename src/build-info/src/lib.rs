// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Metadata about a `copydb` build, stamped in at compile time.
//!
//! Mirrors the teacher's own build-info crate: a small, dependency-light
//! struct that every binary and the end-of-run summary can embed without
//! paying for a full version-control integration at runtime.

use std::fmt;

/// Version and provenance information for a `copydb` build.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    /// The crate version, as set in `Cargo.toml`.
    pub version: &'static str,
    /// The git SHA the build was produced from, if known at compile time.
    pub sha: &'static str,
    /// The target triple the binary was compiled for.
    pub target_triple: &'static str,
}

impl BuildInfo {
    /// Parses [`Self::version`] as a [`semver::Version`].
    ///
    /// # Panics
    /// Panics if the crate version is not valid semver, which would indicate
    /// a broken `Cargo.toml`.
    pub fn semver_version(&self) -> semver::Version {
        self.version.parse().expect("crate version must be valid semver")
    }

    /// A short human-readable identifier, e.g. `0.1.0 (af31c9e)`.
    pub fn human_version(&self) -> String {
        if self.sha.is_empty() {
            self.version.to_string()
        } else {
            format!("{} ({})", self.version, self.sha)
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.human_version(), self.target_triple)
    }
}

/// The [`BuildInfo`] for the running binary.
///
/// `sha` comes from `COPYDB_BUILD_SHA`, set by the build script when building
/// from a git checkout; it's empty for a source-tarball build with no `.git`
/// to read.
pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: env!("CARGO_PKG_VERSION"),
    sha: compile_time_run::run_env!("COPYDB_BUILD_SHA"),
    target_triple: compile_time_run::run_env!("TARGET"),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_version_without_sha() {
        let info = BuildInfo {
            version: "1.2.3",
            sha: "",
            target_triple: "x86_64-unknown-linux-gnu",
        };
        assert_eq!(info.human_version(), "1.2.3");
    }

    #[test]
    fn human_version_with_sha() {
        let info = BuildInfo {
            version: "1.2.3",
            sha: "deadbee",
            target_triple: "x86_64-unknown-linux-gnu",
        };
        assert_eq!(info.human_version(), "1.2.3 (deadbee)");
    }

    #[test]
    fn semver_parses() {
        let info = BuildInfo {
            version: "1.2.3",
            sha: "",
            target_triple: "x86_64-unknown-linux-gnu",
        };
        assert_eq!(info.semver_version(), semver::Version::new(1, 2, 3));
    }
}
