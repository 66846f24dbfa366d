// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-role connection pools for the target database, sized to each
//! role's job count so a worker queued behind its semaphore never ties
//! up a dedicated OS connection.

use std::str::FromStr;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::{Config as PgConfig, NoTls};

use copydb_repr::CopydbError;

/// The three target-connection pools a copy run needs: one for the
/// table-copy workers, one for the index/constraint workers, and one for
/// the vacuum workers. Each is independently sized so a `--table-jobs 8
/// --index-jobs 2` run doesn't starve index workers of connections or
/// over-provision them. Large-object copying runs on its own dedicated
/// connection pair rather than a pool (§4.4 step 5 is a single worker).
pub struct WorkerPools {
    pub tables: Pool,
    pub indexes: Pool,
    pub vacuum: Pool,
}

impl WorkerPools {
    pub fn build(target_uri: &str, table_jobs: usize, index_jobs: usize, vacuum_jobs: usize) -> Result<Self, CopydbError> {
        Ok(WorkerPools {
            tables: build_pool(target_uri, table_jobs)?,
            indexes: build_pool(target_uri, index_jobs)?,
            vacuum: build_pool(target_uri, vacuum_jobs)?,
        })
    }
}

fn build_pool(uri: &str, size: usize) -> Result<Pool, CopydbError> {
    let pg_config =
        PgConfig::from_str(uri).map_err(|e| CopydbError::configuration(format!("parsing {uri}: {e}")))?;
    let manager_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };
    let manager = Manager::from_config(pg_config, NoTls, manager_config);
    Pool::builder(manager)
        .max_size(size.max(1))
        .build()
        .map_err(|e| CopydbError::configuration(format!("building pool for {uri}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_is_never_zero_even_for_a_zero_job_count() {
        let pool = build_pool("postgres://unused/unused", 0).unwrap();
        assert_eq!(pool.status().max_size, 1);
    }

    #[test]
    fn pool_size_matches_requested_job_count() {
        let pool = build_pool("postgres://unused/unused", 6).unwrap();
        assert_eq!(pool.status().max_size, 6);
    }
}
