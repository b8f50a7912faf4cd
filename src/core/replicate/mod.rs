//! Replication (§4.7): a one-way copy of files and records from a source
//! database to a destination, pruning whatever the destination holds that
//! the source no longer does. Built entirely on [`crate::core::merkle`]'s
//! file-tree diff and [`crate::core::collection`]'s tree-of-trees diff —
//! replication never inspects leaf content beyond the hash it already
//! has, except to re-verify a just-copied file.

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};

use crate::config::RuntimeConfig;
use crate::constants::THUMB_DIR;
use crate::core::collection::{self, Collection};
use crate::core::files;
use crate::core::merkle;
use crate::error::EngineError;
use crate::model::{FileLeaf, MerkleHash};
use crate::storage::Storage;
use crate::util::concurrency::num_tasks_for_items;
use crate::util::{hasher, progress::emit, retry, ProgressCallback, ProgressEvent};

#[derive(Debug, Clone)]
pub struct ReplicateOptions {
    /// Override a database-identity mismatch on the destination (§4.7
    /// step 1, §7 `Fatal`).
    pub force: bool,
    /// Normalized prefix match: `name == filter || name.starts_with(filter + "/")`.
    pub path_filter: Option<String>,
    /// Only root-level files and thumbnail-prefixed files are copied or
    /// pruned (GLOSSARY "Partial replica").
    pub partial: bool,
    /// Walk the full diff and report what would change without mutating
    /// either side (SPEC_FULL §3).
    pub dry_run: bool,
    /// Persist the destination files tree every this-many copies, so an
    /// interrupted replication leaves a recent, consistent checkpoint
    /// (§4.7 step 4).
    pub persist_every: usize,
}

impl Default for ReplicateOptions {
    fn default() -> Self {
        Self {
            force: false,
            path_filter: None,
            partial: false,
            dry_run: false,
            persist_every: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicateReport {
    pub files_copied: u64,
    pub files_pruned: u64,
    pub records_upserted: u64,
    pub records_deleted: u64,
}

fn in_scope(name: &str, path_filter: Option<&str>, partial: bool) -> bool {
    if let Some(filter) = path_filter {
        let filter = filter.trim_end_matches('/');
        if name != filter && !name.starts_with(&format!("{filter}/")) {
            return false;
        }
    }
    if partial {
        let is_root_level = !name.contains('/');
        let is_thumb = name.starts_with(&format!("{THUMB_DIR}/"));
        if !is_root_level && !is_thumb {
            return false;
        }
    }
    true
}

/// §4.7: copy files + records from `src` into `dst`, pruning whatever
/// `dst` has beyond `src`'s scope.
pub async fn replicate(
    src: &dyn Storage,
    dst: &dyn Storage,
    config: RuntimeConfig,
    options: ReplicateOptions,
    progress: &ProgressCallback,
) -> Result<ReplicateReport, EngineError> {
    emit(progress, ProgressEvent::Started { label: "replicate".to_string() });

    let src_config = files::open_database(src).await?;
    files::open_or_create_with_id(dst, src_config.database_id, options.force).await?;

    let src_tree = files::load_files_tree(src).await?;
    let mut dst_tree = files::load_files_tree(dst).await?;

    let diff = merkle::find_differences(&src_tree, &dst_tree);
    let copy_names: BTreeSet<String> = diff.only_in_a.iter().map(|l| l.name.clone()).collect();
    let prune_candidates: Vec<_> = diff
        .only_in_b
        .into_iter()
        .filter(|l| !copy_names.contains(&l.name))
        .collect();

    let mut report = ReplicateReport::default();
    let mut since_persist = 0usize;

    // Destination may already hold this exact content under the same
    // name if it raced ahead of the diff snapshot; skip the redundant
    // copy (§4.7 step 2).
    let to_copy: Vec<FileLeaf> = diff
        .only_in_a
        .into_iter()
        .filter(|leaf| in_scope(&leaf.name, options.path_filter.as_deref(), options.partial))
        .filter(|leaf| {
            dst_tree
                .get(&leaf.name)
                .map(|existing| existing.content_hash != leaf.content_hash)
                .unwrap_or(true)
        })
        .collect();

    if options.dry_run {
        report.files_copied += to_copy.len() as u64;
    } else {
        // §5 "many overlapping asynchronous I/O operations": copy and
        // verify up to `num_tasks_for_items` files concurrently rather
        // than one at a time; the files tree itself is only ever touched
        // back on this task, once each copy's result comes in.
        let concurrency = num_tasks_for_items(to_copy.len());
        let copied: Vec<Result<FileLeaf, EngineError>> = stream::iter(to_copy)
            .map(|leaf| async move {
                retry::with_retry(config.read_retry_count, || async {
                    let mut reader = src.read_stream(&leaf.name).await?;
                    dst.write_stream(&leaf.name, reader.as_mut()).await
                })
                .await?;

                let mut verify_reader = dst.read_stream(&leaf.name).await?;
                let rehash = MerkleHash::new(hasher::hash_stream(&mut *verify_reader).await?);
                if rehash != leaf.content_hash {
                    return Err(EngineError::integrity(format!(
                        "hash mismatch after replicating {}: expected {}, got {}",
                        leaf.name, leaf.content_hash, rehash
                    )));
                }
                Ok(leaf)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for result in copied {
            let leaf = result?;
            dst_tree.upsert_item(leaf.clone());
            report.files_copied += 1;
            since_persist += 1;
            emit(progress, ProgressEvent::Item(format!("replicated {}", leaf.name)));

            if since_persist >= options.persist_every.max(1) {
                files::save_files_tree(dst, &mut dst_tree).await?;
                since_persist = 0;
            }
        }
    }

    for leaf in &prune_candidates {
        if !in_scope(&leaf.name, options.path_filter.as_deref(), options.partial) {
            continue;
        }
        report.files_pruned += 1;
        if options.dry_run {
            continue;
        }
        dst.delete(&leaf.name).await?;
        dst_tree.prune_item(&leaf.name);
    }

    if !options.dry_run {
        files::save_files_tree(dst, &mut dst_tree).await?;
    }

    if !options.dry_run {
        replicate_records(src, dst, config, &mut report, progress).await?;
    }

    emit(progress, ProgressEvent::Finished);
    Ok(report)
}

/// §4.7 step 5: walk the tree-of-trees, upsert source-only/differing
/// records into `dst` (preserving timestamps via `set_internal_record`),
/// and delete destination-only records.
async fn replicate_records(
    src: &dyn Storage,
    dst: &dyn Storage,
    config: RuntimeConfig,
    report: &mut ReplicateReport,
    progress: &ProgressCallback,
) -> Result<(), EngineError> {
    let (only_in_src, only_in_dst) = collection::diff_collection_names(src, dst).await?;
    let mut names: Vec<String> = only_in_src.into_iter().chain(only_in_dst).collect();
    names.sort();
    names.dedup();

    for name in names {
        let diff = collection::diff_records(src, dst, &name).await?;
        let src_collection = Collection::new(src, &name, config);
        let dst_collection = Collection::new(dst, &name, config);

        for id in diff.only_in_a {
            if let Some(record) = src_collection.get_one(id).await? {
                dst_collection.set_internal_record(record).await?;
                report.records_upserted += 1;
            }
        }
        for id in diff.only_in_b {
            // Already handled above if src also has this id (differing
            // case); only a true destination-only id is pruned here.
            if src_collection.get_one(id).await?.is_none() {
                dst_collection.delete_record(id).await?;
                report.records_deleted += 1;
            }
        }
        emit(progress, ProgressEvent::Item(format!("replicated collection {name}")));
    }
    Ok(())
}
