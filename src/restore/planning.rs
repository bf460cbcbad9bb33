//! Collection discovery and creation ordering.
//!
//! Collections are sorted so that any collection whose `distributeShardsLike`
//! points at another collection in this dump is created only after its
//! target, and grouped into dependency "waves": every collection within one
//! wave is independent of every other, so the engine can dispatch a whole
//! wave in parallel and only needs to synchronize between waves.

use std::collections::HashMap;
use std::fs;

use serde_json::Value;
use tracing::instrument;

use crate::directory::{Compressed, ManagedDirectory};

use super::error::RestoreError;
use super::options::RestoreOptions;

const STRUCTURE_SUFFIX: &str = ".structure.json";

/// One collection selected for restore, with its full `{parameters,
/// indexes}` structure as read from disk.
#[derive(Clone)]
pub(super) struct PlannedRestoreCollection {
    pub(super) name: String,
    pub(super) structure: Value,
}

impl PlannedRestoreCollection {
    fn parameters(&self) -> Option<&Value> {
        self.structure.get("parameters")
    }

    fn distribute_shards_like(&self) -> Option<&str> {
        self.parameters()?.get("distributeShardsLike")?.as_str()
    }

    fn collection_type(&self) -> i64 {
        self.parameters().and_then(|p| p.get("type")).and_then(Value::as_i64).unwrap_or(2)
    }
}

/// Scans `directory` for `*.structure.json` files, applies `options`'
/// collection filters, and returns them sorted into dependency waves
/// (outer `Vec`) each already ordered by type then name (inner `Vec`).
///
/// # Errors
///
/// Returns [`RestoreError::Directory`] if the directory cannot be listed or
/// a structure file cannot be read, or
/// [`RestoreError::MalformedStructureFile`] if one is missing `parameters`
/// or has a non-array `indexes`.
#[instrument(skip(directory, options))]
pub(super) fn discover_collections(
    directory: &ManagedDirectory,
    options: &RestoreOptions,
) -> Result<Vec<Vec<PlannedRestoreCollection>>, RestoreError> {
    let entries = fs::read_dir(directory.path())
        .map_err(|e| crate::directory::DirectoryError::io(directory.path(), e))?;

    let mut planned = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| crate::directory::DirectoryError::io(directory.path(), e))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else { continue };
        let Some(stem) = file_name.strip_suffix(STRUCTURE_SUFFIX) else { continue };

        let structure: Value = directory.value_from_json_file(file_name, Compressed::Plain)?;
        let parameters = structure.get("parameters").ok_or_else(|| RestoreError::MalformedStructureFile {
            collection: stem.to_string(),
            reason: "missing `parameters`".to_string(),
        })?;
        if !structure.get("indexes").is_none_or(Value::is_array) {
            return Err(RestoreError::MalformedStructureFile {
                collection: stem.to_string(),
                reason: "`indexes` is not an array".to_string(),
            });
        }
        let name = parameters.get("name").and_then(Value::as_str).unwrap_or(stem).to_string();
        let is_system = parameters.get("isSystem").and_then(Value::as_bool).unwrap_or(false);
        if is_system && !options.include_system_collections {
            continue;
        }
        if !options.collections.is_empty() && !options.collections.iter().any(|c| c == &name) {
            continue;
        }
        planned.push(PlannedRestoreCollection { name, structure });
    }

    planned.sort_by(|a, b| {
        a.distribute_shards_like()
            .is_some()
            .cmp(&b.distribute_shards_like().is_some())
            .then_with(|| a.collection_type().cmp(&b.collection_type()))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(group_into_waves(planned))
}

fn group_into_waves(collections: Vec<PlannedRestoreCollection>) -> Vec<Vec<PlannedRestoreCollection>> {
    let name_to_index: HashMap<&str, usize> =
        collections.iter().enumerate().map(|(i, c)| (c.name.as_str(), i)).collect();

    let mut levels: Vec<Option<usize>> = vec![None; collections.len()];
    for i in 0..collections.len() {
        compute_level(i, &collections, &name_to_index, &mut levels, &mut Vec::new());
    }

    let max_level = levels.iter().filter_map(|l| *l).max().unwrap_or(0);
    let mut waves: Vec<Vec<PlannedRestoreCollection>> = (0..=max_level).map(|_| Vec::new()).collect();
    for (collection, level) in collections.into_iter().zip(levels) {
        waves[level.unwrap_or(0)].push(collection);
    }
    waves.retain(|wave| !wave.is_empty());
    waves
}

fn compute_level(
    index: usize,
    collections: &[PlannedRestoreCollection],
    name_to_index: &HashMap<&str, usize>,
    levels: &mut [Option<usize>],
    visiting: &mut Vec<usize>,
) -> usize {
    if let Some(level) = levels[index] {
        return level;
    }
    if visiting.contains(&index) {
        // A distributeShardsLike cycle should never occur in a real dump;
        // treat it as independent rather than recursing forever.
        return 0;
    }
    visiting.push(index);
    let level = match collections[index].distribute_shards_like() {
        None => 0,
        Some(leader_name) => match name_to_index.get(leader_name) {
            Some(&leader_index) if leader_index != index => {
                compute_level(leader_index, collections, name_to_index, levels, visiting) + 1
            }
            // The leader isn't part of this dump (excluded by a collection
            // filter, or genuinely missing); nothing to order against.
            _ => 0,
        },
    };
    visiting.pop();
    levels[index] = Some(level);
    level
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(name: &str, collection_type: i64, distribute_shards_like: Option<&str>) -> PlannedRestoreCollection {
        let mut parameters = serde_json::json!({"name": name, "type": collection_type});
        if let Some(leader) = distribute_shards_like {
            parameters["distributeShardsLike"] = serde_json::json!(leader);
        }
        PlannedRestoreCollection { name: name.to_string(), structure: serde_json::json!({"parameters": parameters, "indexes": []}) }
    }

    #[test]
    fn follower_waves_after_its_leader() {
        let collections =
            vec![collection("c1", 2, None), collection("c2", 3, None), collection("c3", 2, Some("c2"))];
        let waves = group_into_waves(collections);
        assert_eq!(waves.len(), 2);
        let wave0_names: Vec<_> = waves[0].iter().map(|c| c.name.as_str()).collect();
        assert_eq!(wave0_names, vec!["c1", "c2"]);
        assert_eq!(waves[1][0].name, "c3");
    }

    #[test]
    fn missing_leader_is_treated_as_independent() {
        let collections = vec![collection("orphan", 2, Some("nonexistent"))];
        let waves = group_into_waves(collections);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0][0].name, "orphan");
    }
}
