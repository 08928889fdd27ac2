//! Garbage collection of internal objects.

use crate::error::Result;
use crate::hash::Hash;
use crate::local::{objects_dir, staging_dir};
use crate::tree::{Location, Tree};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Statistics from a garbage collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Number of objects deleted.
    pub objects_deleted: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

/// Delete objects under `root` that no file in `tree` references.
///
/// Leftover staging files from interrupted writes are swept too. If
/// `dry_run` is true, reports what would be deleted without deleting.
pub(crate) fn collect(root: &Path, tree: &Tree, dry_run: bool) -> Result<GcStats> {
    let reachable = mark_reachable(root, tree);
    let mut stats = sweep_objects(&objects_dir(root), &reachable, dry_run)?;

    let staging = staging_dir(root);
    if staging.is_dir() {
        for entry in fs::read_dir(&staging)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            stats.bytes_freed += fs::metadata(&path)?.len();
            stats.objects_deleted += 1;
            if !dry_run {
                fs::remove_file(&path)?;
            }
        }
    }

    Ok(stats)
}

/// Mark phase: every internal location the tree points at.
fn mark_reachable(root: &Path, tree: &Tree) -> HashSet<PathBuf> {
    tree.files()
        .into_iter()
        .filter_map(|(_, record)| match record.location {
            Location::Internal(rel) => Some(root.join(rel)),
            Location::External(_) => None,
        })
        .collect()
}

/// Sweep phase: delete unreachable objects.
fn sweep_objects(
    objects_dir: &Path,
    reachable: &HashSet<PathBuf>,
    dry_run: bool,
) -> Result<GcStats> {
    let mut stats = GcStats::default();
    if !objects_dir.exists() {
        return Ok(stats);
    }

    // Walk all shard directories
    for shard_entry in fs::read_dir(objects_dir)? {
        let shard_path = shard_entry?.path();
        if !shard_path.is_dir() {
            continue;
        }

        for obj_entry in fs::read_dir(&shard_path)? {
            let obj_path = obj_entry?.path();
            if !obj_path.is_file() || reachable.contains(&obj_path) {
                continue;
            }

            // Only touch files named like objects
            let shard = shard_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("");
            let stem = obj_path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split('.').next())
                .unwrap_or("");
            if Hash::from_hex(&format!("{}{}", shard, stem)).is_err() {
                continue;
            }

            let size = fs::metadata(&obj_path)?.len();
            stats.bytes_freed += size;
            stats.objects_deleted += 1;
            debug!(object = %obj_path.display(), size, dry_run, "Unreferenced object");

            if !dry_run {
                fs::remove_file(&obj_path)?;
            }
        }

        // Remove empty shard directories (only if not dry run)
        if !dry_run
            && let Ok(mut entries) = fs::read_dir(&shard_path)
            && entries.next().is_none()
        {
            let _ = fs::remove_dir(&shard_path);
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use crate::backend::ProjectStorage;
    use crate::local::LocalProject;
    use crate::path::ProjectPath;
    use std::fs;
    use tempfile::TempDir;

    fn store_bytes(project: &mut LocalProject, path: &str, bytes: &[u8]) {
        let path = ProjectPath::parse(path).unwrap();
        project
            .write(&path, "bin", &mut |staged| Ok(fs::write(staged, bytes)?))
            .unwrap();
    }

    #[test]
    fn test_gc_empty_project() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path().join("p")).unwrap();

        let stats = project.collect_garbage(false).unwrap();
        assert_eq!(stats.objects_deleted, 0);
        assert_eq!(stats.bytes_freed, 0);
    }

    #[test]
    fn test_gc_keeps_referenced_objects() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path().join("p")).unwrap();
        store_bytes(&mut project, "a.bin", b"kept");

        let stats = project.collect_garbage(false).unwrap();
        assert_eq!(stats.objects_deleted, 0);

        let real = project.resolve(&ProjectPath::parse("a.bin").unwrap()).unwrap();
        assert_eq!(fs::read(real).unwrap(), b"kept");
    }

    #[test]
    fn test_gc_deletes_unreferenced_objects() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path().join("p")).unwrap();
        store_bytes(&mut project, "a.bin", b"first version");
        let old = project.resolve(&ProjectPath::parse("a.bin").unwrap()).unwrap();

        // Overwriting leaves the old object orphaned
        store_bytes(&mut project, "a.bin", b"second version");
        assert!(old.exists());

        let stats = project.collect_garbage(false).unwrap();
        assert_eq!(stats.objects_deleted, 1);
        assert_eq!(stats.bytes_freed, b"first version".len() as u64);
        assert!(!old.exists());
    }

    #[test]
    fn test_gc_dry_run() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path().join("p")).unwrap();
        store_bytes(&mut project, "a.bin", b"orphan");
        let old = project.resolve(&ProjectPath::parse("a.bin").unwrap()).unwrap();
        project
            .remove(&ProjectPath::parse("a.bin").unwrap(), false)
            .unwrap();

        let stats = project.collect_garbage(true).unwrap();
        assert_eq!(stats.objects_deleted, 1);
        assert!(old.exists());

        let stats = project.collect_garbage(false).unwrap();
        assert_eq!(stats.objects_deleted, 1);
        assert!(!old.exists());
    }

    #[test]
    fn test_gc_shared_object_survives_partial_removal() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path().join("p")).unwrap();
        store_bytes(&mut project, "a.bin", b"same");
        store_bytes(&mut project, "b.bin", b"same");
        project
            .remove(&ProjectPath::parse("a.bin").unwrap(), false)
            .unwrap();

        let stats = project.collect_garbage(false).unwrap();
        assert_eq!(stats.objects_deleted, 0);
        let real = project.resolve(&ProjectPath::parse("b.bin").unwrap()).unwrap();
        assert_eq!(fs::read(real).unwrap(), b"same");
    }

    #[test]
    fn test_gc_ignores_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path().join("p")).unwrap();
        let shard = super::objects_dir(project.root()).join("zz");
        fs::create_dir_all(&shard).unwrap();
        fs::write(shard.join("notes.txt"), b"not an object").unwrap();

        let stats = project.collect_garbage(false).unwrap();
        assert_eq!(stats.objects_deleted, 0);
        assert!(shard.join("notes.txt").exists());
    }
}
