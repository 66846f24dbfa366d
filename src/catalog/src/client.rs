// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Queries the source catalog for the objects a copy run needs to know
//! about: tables (with their indexes and, where applicable, a partition
//! plan), sequences, extensions, and the large-object count.

use copydb_repr::{CopydbError, PartitionRange, SourceIndex, SourceTable};
use deadpool_postgres::Pool;
use tracing::debug;

use crate::partition::{plan_partitions, should_split};

/// A client bound to one source connection pool, used once per run to
/// build the immutable catalog snapshot that every copy worker then
/// shares by value.
pub struct CatalogClient {
    pool: Pool,
}

impl CatalogClient {
    pub fn new(pool: Pool) -> Self {
        CatalogClient { pool }
    }

    /// Lists every ordinary table in the database, with its index list and
    /// (if it qualifies) a partition plan.
    pub async fn list_tables(&self, split_threshold_bytes: u64) -> Result<Vec<SourceTable>, CopydbError> {
        let client = self.pool.get().await.map_err(|e| CopydbError::upstream(e.to_string()))?;

        let rows = client
            .query(
                "SELECT c.oid, n.nspname, c.relname, \
                        pg_total_relation_size(c.oid) AS bytes, \
                        c.reltuples::bigint AS row_estimate, \
                        (SELECT a.attname FROM pg_index i \
                           JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = i.indkey[0] \
                          WHERE i.indrelid = c.oid AND i.indisprimary LIMIT 1) AS part_key \
                   FROM pg_class c \
                   JOIN pg_namespace n ON n.oid = c.relnamespace \
                  WHERE c.relkind = 'r' \
                    AND n.nspname NOT IN ('pg_catalog', 'information_schema') \
                  ORDER BY c.oid",
                &[],
            )
            .await
            .map_err(|e| CopydbError::upstream(e.to_string()))?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let oid: u32 = row.get::<_, i64>(0) as u32;
            let namespace: String = row.get(1);
            let relation: String = row.get(2);
            let bytes: i64 = row.get(3);
            let row_estimate: f32 = row.get::<_, f32>(4);
            let part_key: Option<String> = row.get(5);

            let index_list = self.list_indexes(&client, oid).await?;
            let parts = if should_split(bytes as u64, split_threshold_bytes, part_key.is_some()) {
                self.plan_table_partitions(&client, &namespace, &relation, part_key.as_deref().unwrap())
                    .await?
            } else {
                Vec::new()
            };

            debug!(oid, %namespace, %relation, bytes, parts = parts.len(), "discovered table");
            tables.push(SourceTable {
                oid,
                namespace,
                relation,
                bytes: bytes as u64,
                row_estimate: row_estimate as i64,
                part_key,
                parts,
                index_list,
            });
        }
        Ok(tables)
    }

    async fn list_indexes(
        &self,
        client: &deadpool_postgres::Client,
        table_oid: u32,
    ) -> Result<Vec<SourceIndex>, CopydbError> {
        let rows = client
            .query(
                "SELECT i.indexrelid, COALESCE(con.oid, 0), n.nspname, ic.relname, \
                        tn.nspname, tc.relname, \
                        con.conname, pg_get_indexdef(i.indexrelid), \
                        pg_get_constraintdef(con.oid) \
                   FROM pg_index i \
                   JOIN pg_class ic ON ic.oid = i.indexrelid \
                   JOIN pg_namespace n ON n.oid = ic.relnamespace \
                   JOIN pg_class tc ON tc.oid = i.indrelid \
                   JOIN pg_namespace tn ON tn.oid = tc.relnamespace \
                   LEFT JOIN pg_constraint con ON con.conindid = i.indexrelid \
                  WHERE i.indrelid = $1::oid \
                  ORDER BY i.indexrelid",
                &[&(table_oid as i64)],
            )
            .await
            .map_err(|e| CopydbError::upstream(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let constraint_oid: i64 = row.get(1);
                SourceIndex {
                    index_oid: row.get::<_, i64>(0) as u32,
                    constraint_oid: constraint_oid as u32,
                    index_namespace: row.get(2),
                    index_relation: row.get(3),
                    table_namespace: row.get(4),
                    table_relation: row.get(5),
                    constraint_name: row.get(6),
                    definition: row.get(7),
                    constraint_definition: row.get(8),
                }
            })
            .collect())
    }

    async fn plan_table_partitions(
        &self,
        client: &deadpool_postgres::Client,
        namespace: &str,
        relation: &str,
        part_key: &str,
    ) -> Result<Vec<PartitionRange>, CopydbError> {
        let query = format!(
            "SELECT min({part_key}), max({part_key}) FROM {namespace}.{relation}",
        );
        let row = client
            .query_one(query.as_str(), &[])
            .await
            .map_err(|e| CopydbError::upstream(e.to_string()))?;
        let min: Option<i64> = row.get(0);
        let max: Option<i64> = row.get(1);
        let part_count = default_part_count();
        match (min, max) {
            (Some(min), Some(max)) => Ok(plan_partitions(min, max, part_count)),
            // An empty table with a qualifying size (e.g. heavily bloated
            // and since vacuumed) produces a single no-op partition.
            _ => Ok(vec![PartitionRange { part_number: 0, part_count: 1, min: 1, max: 0 }]),
        }
    }

    pub async fn list_sequences(&self) -> Result<Vec<(String, String, i64)>, CopydbError> {
        let client = self.pool.get().await.map_err(|e| CopydbError::upstream(e.to_string()))?;
        let rows = client
            .query(
                "SELECT n.nspname, c.relname, pg_sequence_last_value(c.oid::regclass) \
                   FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
                  WHERE c.relkind = 'S'",
                &[],
            )
            .await
            .map_err(|e| CopydbError::upstream(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get(0), row.get(1), row.get::<_, Option<i64>>(2).unwrap_or(1)))
            .collect())
    }

    pub async fn list_extensions(&self) -> Result<Vec<String>, CopydbError> {
        let client = self.pool.get().await.map_err(|e| CopydbError::upstream(e.to_string()))?;
        let rows = client
            .query("SELECT extname FROM pg_extension ORDER BY extname", &[])
            .await
            .map_err(|e| CopydbError::upstream(e.to_string()))?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    pub async fn count_large_objects(&self) -> Result<u64, CopydbError> {
        let client = self.pool.get().await.map_err(|e| CopydbError::upstream(e.to_string()))?;
        let row = client
            .query_one("SELECT count(*) FROM pg_largeobject_metadata", &[])
            .await
            .map_err(|e| CopydbError::upstream(e.to_string()))?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }
}

/// Number of partitions a qualifying table is split into. Fixed for now;
/// a future revision could scale this with `table_jobs`.
fn default_part_count() -> u32 {
    4
}
