//! Cluster shard-distribution lookups: which DBserver leads each shard of a
//! collection, and grouping that information across collections so the
//! engine can dispatch one job per DBserver instead of one per collection.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::http::ManagedClient;

use super::error::DumpError;

/// One shard of one collection, scoped to the DBserver that currently
/// leads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ShardTarget {
    pub(super) collection: String,
    pub(super) shard_id: String,
}

/// Below this many shards on a DBserver, a plain [`super::jobs::DumpShardJob`]
/// per shard is cheaper than spinning up a [`super::parallel_server::ParallelDumpServer`]'s
/// network/writer thread pools.
const PARALLEL_SERVER_MIN_SHARDS: usize = 2;

/// Queries `/_api/collection/{collection}/shards?details=true`, returning
/// `(shard_id, leader_dbserver)` pairs in shard-id order.
///
/// # Errors
///
/// Returns [`DumpError::Client`] if the request fails, or
/// [`DumpError::MalformedShardDistribution`] if the response is not the
/// expected `{"shards": {shardId: [leader, ...follower]}}` shape.
pub(super) fn fetch_shard_distribution(
    client: &ManagedClient,
    collection: &str,
) -> Result<Vec<(String, String)>, DumpError> {
    let url = client.rewrite_location(&format!("/_api/collection/{collection}/shards?details=true"));
    let response = client
        .authed(client.http().get(&url))
        .send()
        .map_err(|source| crate::http::ClientError::Request { url: url.clone(), source })?;
    let decoded: Value = crate::http::check_and_decode(response)?;
    let shards = decoded.get("shards").and_then(Value::as_object).ok_or_else(|| DumpError::MalformedShardDistribution {
        collection: collection.to_string(),
        reason: "missing \"shards\" object in response".to_string(),
    })?;

    let mut distribution = Vec::with_capacity(shards.len());
    for (shard_id, servers) in shards {
        let leader = servers
            .as_array()
            .and_then(|servers| servers.first())
            .and_then(Value::as_str)
            .ok_or_else(|| DumpError::MalformedShardDistribution {
                collection: collection.to_string(),
                reason: format!("shard {shard_id} has no leader server listed"),
            })?;
        distribution.push((shard_id.clone(), leader.to_string()));
    }
    distribution.sort();
    Ok(distribution)
}

/// Assignment of work to one DBserver: either enough shards to warrant a
/// dedicated [`super::parallel_server::ParallelDumpServer`], or a short list
/// to run individually as [`super::jobs::DumpShardJob`]s.
pub(super) enum DbServerAssignment {
    Parallel(Vec<ShardTarget>),
    Individual(Vec<ShardTarget>),
}

/// Groups every collection's shards by leader DBserver, in DBserver-id
/// order, deciding per group whether it earns a [`ParallelDumpServer`] or
/// falls back to one [`DumpShardJob`] per shard.
///
/// [`ParallelDumpServer`]: super::parallel_server::ParallelDumpServer
/// [`DumpShardJob`]: super::jobs::DumpShardJob
pub(super) fn group_by_dbserver(
    collections: impl IntoIterator<Item = (String, Vec<(String, String)>)>,
) -> Vec<(String, DbServerAssignment)> {
    let mut by_server: BTreeMap<String, Vec<ShardTarget>> = BTreeMap::new();
    for (collection, distribution) in collections {
        for (shard_id, leader) in distribution {
            by_server.entry(leader).or_default().push(ShardTarget { collection: collection.clone(), shard_id });
        }
    }

    by_server
        .into_iter()
        .map(|(server, shards)| {
            let assignment = if shards.len() >= PARALLEL_SERVER_MIN_SHARDS {
                DbServerAssignment::Parallel(shards)
            } else {
                DbServerAssignment::Individual(shards)
            };
            (server, assignment)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_shards_by_leader_and_splits_small_groups_off() {
        let collections = vec![
            ("c1".to_string(), vec![("s1".to_string(), "dbserver-a".to_string())]),
            (
                "c2".to_string(),
                vec![
                    ("s2".to_string(), "dbserver-a".to_string()),
                    ("s3".to_string(), "dbserver-b".to_string()),
                    ("s4".to_string(), "dbserver-b".to_string()),
                ],
            ),
        ];
        let grouped = group_by_dbserver(collections);
        assert_eq!(grouped.len(), 2);

        let (server_a, assignment_a) = &grouped[0];
        assert_eq!(server_a, "dbserver-a");
        match assignment_a {
            DbServerAssignment::Parallel(shards) => assert_eq!(shards.len(), 2),
            DbServerAssignment::Individual(_) => panic!("dbserver-a has 2 shards, should use the parallel path"),
        }

        let (server_b, assignment_b) = &grouped[1];
        assert_eq!(server_b, "dbserver-b");
        match assignment_b {
            DbServerAssignment::Parallel(shards) => assert_eq!(shards.len(), 2),
            DbServerAssignment::Individual(_) => panic!("dbserver-b has 2 shards, should use the parallel path"),
        }
    }

    #[test]
    fn a_lone_shard_on_a_dbserver_falls_back_to_individual_jobs() {
        let collections = vec![("c1".to_string(), vec![("s1".to_string(), "dbserver-a".to_string())])];
        let grouped = group_by_dbserver(collections);
        assert_eq!(grouped.len(), 1);
        match &grouped[0].1 {
            DbServerAssignment::Individual(shards) => assert_eq!(shards.len(), 1),
            DbServerAssignment::Parallel(_) => panic!("single shard should not warrant a parallel server"),
        }
    }
}
