//! Repair (§4.9): detect local file corruption against a healthy source
//! and fetch replacements, without the bidirectional reconciliation
//! [`crate::core::sync`] or the pruning [`crate::core::replicate`] does.
//! Repair only ever adds or overwrites local content; it never deletes.
//!
//! Detection walks `local`'s own recorded leaves and re-hashes the actual
//! bytes currently on `local` storage against each leaf's tracked
//! `contentHash` (§4.9 "recompute its hash ... if the hash no longer
//! matches"). This is deliberately not a tree-vs-tree diff: real
//! corruption — a bit flip on disk — never touches the persisted Merkle
//! tree, so comparing two trees would never see it. A leaf is only
//! re-hashed when it's missing, its size/mtime disagree with the tracked
//! leaf, or `full` mode forces every leaf to be checked regardless.
//!
//! Report category semantics (an Open Question the specification leaves
//! unresolved, decided here and recorded in DESIGN.md): `modified` is a
//! leaf local tracks whose on-disk bytes no longer hash to the tracked
//! value, and which the source can still repair; `new` is a leaf the
//! source has that local's tree lacks entirely; `removed` is a leaf
//! local tracks that is corrupted/missing locally and that the source no
//! longer lists at all (an unrepairable orphan — reported, not deleted,
//! since repair heals corruption, it doesn't prune); `repaired`/
//! `unrepaired` partition the `modified ∪ new` set by whether the
//! fetch-and-verify round-trip succeeded.

use crate::config::RuntimeConfig;
use crate::core::files;
use crate::core::merkle::FileTree;
use crate::error::EngineError;
use crate::model::{FileLeaf, MerkleHash};
use crate::storage::Storage;
use crate::util::{hasher, progress::emit, retry, ProgressCallback, ProgressEvent};

#[derive(Debug, Clone, Copy, Default)]
pub struct RepairOptions {
    pub dry_run: bool,
    /// §4.9 "or `full` mode is enabled": re-hash every tracked leaf
    /// regardless of whether its size/mtime still match.
    pub full: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RepairReport {
    pub modified: u64,
    pub new: u64,
    pub removed: u64,
    pub repaired: u64,
    pub unrepaired: u64,
}

/// §4.9: walk `local`'s files tree, re-hashing on-disk bytes against each
/// tracked leaf, and fetch-and-verify replacements from `source` for
/// anything that's missing, corrupted, or absent from local's tree
/// entirely.
pub async fn repair(
    local: &dyn Storage,
    source: &dyn Storage,
    config: RuntimeConfig,
    options: RepairOptions,
    progress: &ProgressCallback,
) -> Result<RepairReport, EngineError> {
    emit(progress, ProgressEvent::Started { label: "repair".to_string() });

    let mut local_tree = files::load_files_tree(local).await?;
    let source_tree = files::load_files_tree(source).await?;
    let mut report = RepairReport::default();

    let tracked: Vec<FileLeaf> = local_tree.iter_leaves().cloned().collect();
    for leaf in &tracked {
        if !needs_recheck(local, leaf, options.full).await? {
            continue;
        }
        if !is_corrupted(local, leaf).await? {
            continue;
        }

        match source_tree.get(&leaf.name) {
            Some(source_leaf) => {
                report.modified += 1;
                if options.dry_run {
                    continue;
                }
                repair_one(source, local, source_leaf, config, &mut local_tree, &mut report, progress).await;
            }
            None => {
                report.removed += 1;
            }
        }
    }

    for leaf in source_tree.iter_leaves() {
        if local_tree.get(&leaf.name).is_some() {
            continue;
        }
        report.new += 1;
        if options.dry_run {
            continue;
        }
        repair_one(source, local, leaf, config, &mut local_tree, &mut report, progress).await;
    }

    if !options.dry_run {
        files::save_files_tree(local, &mut local_tree).await?;
    }

    emit(progress, ProgressEvent::Finished);
    Ok(report)
}

async fn needs_recheck(local: &dyn Storage, leaf: &FileLeaf, full: bool) -> Result<bool, EngineError> {
    if full {
        return Ok(true);
    }
    match local.info(&leaf.name).await {
        Ok(info) => Ok(info.size != leaf.size || info.last_modified != leaf.last_modified),
        Err(_) => Ok(true),
    }
}

async fn is_corrupted(local: &dyn Storage, leaf: &FileLeaf) -> Result<bool, EngineError> {
    let mut reader = match local.read_stream(&leaf.name).await {
        Ok(r) => r,
        Err(_) => return Ok(true),
    };
    let actual = MerkleHash::new(hasher::hash_stream(&mut *reader).await?);
    Ok(actual != leaf.content_hash)
}

#[allow(clippy::too_many_arguments)]
async fn repair_one(
    source: &dyn Storage,
    local: &dyn Storage,
    leaf: &FileLeaf,
    config: RuntimeConfig,
    local_tree: &mut FileTree,
    report: &mut RepairReport,
    progress: &ProgressCallback,
) {
    match fetch_and_verify(source, local, leaf, config).await {
        Ok(()) => {
            local_tree.upsert_item(leaf.clone());
            report.repaired += 1;
            emit(progress, ProgressEvent::Item(format!("repaired {}", leaf.name)));
        }
        Err(e) => {
            report.unrepaired += 1;
            log::warn!("failed to repair {}: {e}", leaf.name);
        }
    }
}

async fn fetch_and_verify(
    source: &dyn Storage,
    local: &dyn Storage,
    leaf: &FileLeaf,
    config: RuntimeConfig,
) -> Result<(), EngineError> {
    retry::with_retry(config.read_retry_count, || async {
        let mut reader = source.read_stream(&leaf.name).await?;
        local.write_stream(&leaf.name, reader.as_mut()).await
    })
    .await?;

    let mut verify_reader = local.read_stream(&leaf.name).await?;
    let rehash = MerkleHash::new(hasher::hash_stream(&mut *verify_reader).await?);
    if rehash != leaf.content_hash {
        return Err(EngineError::integrity(format!(
            "hash mismatch after repairing {}: expected {}, got {}",
            leaf.name, leaf.content_hash, rehash
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::UuidV4Generator;
    use crate::storage::LocalStorage;
    use chrono::Utc;

    /// Writes `bytes` to storage and adds a matching tracked leaf — the
    /// "healthy, tracked" state both source and local start from.
    async fn seed_leaf(storage: &LocalStorage, name: &str, bytes: &[u8]) {
        storage.write(name, bytes).await.unwrap();
        let info = storage.info(name).await.unwrap();
        let mut tree = files::load_files_tree(storage).await.unwrap();
        tree.upsert_item(FileLeaf {
            name: name.to_string(),
            content_hash: MerkleHash::of(bytes),
            size: info.size,
            last_modified: info.last_modified,
        });
        files::save_files_tree(storage, &mut tree).await.unwrap();
    }

    #[tokio::test]
    async fn test_repair_detects_real_bitflip_corruption_not_tracked_by_the_tree() {
        let local_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let local = LocalStorage::new(local_dir.path());
        let source = LocalStorage::new(source_dir.path());
        files::create_database(&local, &UuidV4Generator).await.unwrap();
        files::create_database(&source, &UuidV4Generator).await.unwrap();

        seed_leaf(&source, "asset/a", b"good-a").await;
        seed_leaf(&local, "asset/a", b"good-a").await;
        // Corrupt the on-disk bytes directly, without updating the
        // tracked leaf — this is what a real bit flip looks like.
        local.write("asset/a", b"corrupt").await.unwrap();

        let progress = crate::util::noop_progress();
        let report = repair(
            &local,
            &source,
            RuntimeConfig::default(),
            RepairOptions {
                dry_run: false,
                full: true,
            },
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(report.modified, 1);
        assert_eq!(report.repaired, 1);
        assert_eq!(report.unrepaired, 0);
        assert_eq!(local.read("asset/a").await.unwrap(), b"good-a");
    }

    #[tokio::test]
    async fn test_repair_skips_untouched_leaves_without_full_mode() {
        let local_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let local = LocalStorage::new(local_dir.path());
        let source = LocalStorage::new(source_dir.path());
        files::create_database(&local, &UuidV4Generator).await.unwrap();
        files::create_database(&source, &UuidV4Generator).await.unwrap();

        seed_leaf(&source, "asset/a", b"good-a").await;
        seed_leaf(&local, "asset/a", b"good-a").await;

        let progress = crate::util::noop_progress();
        let report = repair(
            &local,
            &source,
            RuntimeConfig::default(),
            RepairOptions::default(),
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(report.modified, 0);
        assert_eq!(report.repaired, 0);
    }

    #[tokio::test]
    async fn test_repair_fetches_missing_leaf_as_new() {
        let local_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let local = LocalStorage::new(local_dir.path());
        let source = LocalStorage::new(source_dir.path());
        files::create_database(&local, &UuidV4Generator).await.unwrap();
        files::create_database(&source, &UuidV4Generator).await.unwrap();

        seed_leaf(&source, "asset/b", b"good-b").await;

        let progress = crate::util::noop_progress();
        let report = repair(
            &local,
            &source,
            RuntimeConfig::default(),
            RepairOptions::default(),
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(report.new, 1);
        assert_eq!(report.repaired, 1);
        let fetched = local.read("asset/b").await.unwrap();
        assert_eq!(fetched, b"good-b");
    }

    #[tokio::test]
    async fn test_repair_reports_unrepairable_orphan_as_removed_without_deleting() {
        let local_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let local = LocalStorage::new(local_dir.path());
        let source = LocalStorage::new(source_dir.path());
        files::create_database(&local, &UuidV4Generator).await.unwrap();
        files::create_database(&source, &UuidV4Generator).await.unwrap();

        seed_leaf(&local, "asset/orphan", b"local-only").await;
        local.write("asset/orphan", b"corrupted-orphan").await.unwrap();

        let progress = crate::util::noop_progress();
        let report = repair(
            &local,
            &source,
            RuntimeConfig::default(),
            RepairOptions {
                dry_run: false,
                full: true,
            },
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(report.removed, 1);
        assert!(local.file_exists("asset/orphan").await.unwrap());
        assert_eq!(local.read("asset/orphan").await.unwrap(), b"corrupted-orphan");
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_mutating_local() {
        let local_dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let local = LocalStorage::new(local_dir.path());
        let source = LocalStorage::new(source_dir.path());
        files::create_database(&local, &UuidV4Generator).await.unwrap();
        files::create_database(&source, &UuidV4Generator).await.unwrap();

        seed_leaf(&source, "asset/a", b"good-a").await;

        let progress = crate::util::noop_progress();
        let report = repair(
            &local,
            &source,
            RuntimeConfig::default(),
            RepairOptions {
                dry_run: true,
                full: false,
            },
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(report.new, 1);
        assert_eq!(report.repaired, 0);
        assert!(!local.file_exists("asset/a").await.unwrap());
    }
}
