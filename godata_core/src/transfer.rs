//! Export and import of whole projects.
//!
//! Export copies a project into a hidden scratch project, materializes the
//! scratch storage as a plain directory, then archives that directory.
//! Import unpacks an archive into a fresh project's storage root and takes
//! ownership of every file in place.

use crate::archive::{self, ARCHIVE_EXTENSION};
use crate::error::{Error, ErrorKind, Result};
use crate::manager::ProjectManager;
use crate::path::{DEFAULT_COLLECTION, ProjectPath};
use crate::project::{ProjectHandle, ProjectTree, Retrieved};
use crate::tree::{NodeKind, ROOT};
use crate::value::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Collection holding scratch projects.
pub const SCRATCH_COLLECTION: &str = ".temp";

/// Name of the materialized directory inside a scratch project's root.
const EXPORT_DIR: &str = "export";

/// Options for [`ProjectManager::export`].
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Where the archive goes. Defaults to the current directory.
    pub output_dir: Option<PathBuf>,
    /// Checked between nodes; when set the export stops with `Interrupted`.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ExportOptions {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl ProjectManager {
    /// Export a project to `<output_dir>/<name>.tar.zst`.
    ///
    /// The scratch project is removed whatever the outcome; failing to
    /// remove it is logged and does not fail the export.
    pub fn export(
        &self,
        name: &str,
        collection: Option<&str>,
        options: &ExportOptions,
    ) -> Result<PathBuf> {
        let collection = collection.unwrap_or(DEFAULT_COLLECTION);
        let output_dir = match &options.output_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        if !output_dir.is_dir() {
            return Err(Error::invalid_path(
                output_dir.display().to_string(),
                "output directory does not exist or is not a directory",
            ));
        }
        let output_dir = std::path::absolute(&output_dir)?;

        let source = self.load(name, Some(collection))?;

        // Unique per export, so concurrent exports never share a scratch project
        let scratch_dir = tempfile::Builder::new()
            .prefix(&format!("{}.{}.{}.", SCRATCH_COLLECTION, collection, name))
            .tempdir_in(&output_dir)?;
        let scratch_root = scratch_dir.path().to_path_buf();
        let scratch_name = scratch_root
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(SCRATCH_COLLECTION))
            .and_then(|n| n.strip_prefix('.'))
            .ok_or_else(|| {
                Error::invalid_path(scratch_root.display().to_string(), "unusable scratch name")
            })?
            .to_string();

        let scratch = self.create_at(&scratch_name, Some(SCRATCH_COLLECTION), &scratch_root)?;
        info!(project = %source.id(), scratch = %scratch_root.display(), "Exporting project");

        let archive_path = output_dir.join(format!("{}.{}", name, ARCHIVE_EXTENSION));
        let outcome = export_via_scratch(&source, &scratch, &archive_path, options);

        drop(scratch);
        if let Err(e) = self.remove(&scratch_name, Some(SCRATCH_COLLECTION), true) {
            warn!(scratch = %scratch_root.display(), error = %e, "Failed to remove scratch project");
        }
        drop(scratch_dir);

        let entries = outcome?;
        info!(project = %source.id(), archive = %archive_path.display(), entries, "Exported project");
        Ok(archive_path)
    }

    /// Create project `name` from an exported archive.
    ///
    /// The project lives at `storage_root` if given, else at the backend's
    /// default location. `storage_root` must be missing or an empty
    /// directory. If anything fails the new project is removed.
    pub fn import(
        &self,
        archive_path: &Path,
        name: &str,
        collection: Option<&str>,
        storage_root: Option<&Path>,
    ) -> Result<ProjectHandle> {
        if !archive_path.is_file() {
            return Err(Error::path_not_found(
                archive_path.display().to_string(),
                "archive does not exist",
            ));
        }

        let handle = match storage_root {
            Some(root) => self.create_at(name, collection, root)?,
            None => self.create(name, collection)?,
        };

        match adopt_archive(&handle, archive_path) {
            Ok(files) => {
                info!(project = %handle.id(), archive = %archive_path.display(), files, "Imported project");
                Ok(handle)
            }
            Err(e) => {
                drop(handle);
                if let Err(cleanup) = self.remove(name, collection, true) {
                    warn!(project = name, error = %cleanup, "Failed to remove half-imported project");
                }
                Err(e)
            }
        }
    }
}

/// Copy, materialize, archive. Returns the number of archived entries.
fn export_via_scratch(
    source: &ProjectHandle,
    scratch: &ProjectHandle,
    archive_path: &Path,
    options: &ExportOptions,
) -> Result<usize> {
    let copied = copy_tree(source, scratch, options)?;

    let export_dir = scratch.root()?.join(EXPORT_DIR);
    scratch.materialize(&export_dir)?;
    if !export_dir.is_dir() {
        return Err(Error::export_integrity(
            &export_dir,
            "materialized directory does not exist",
        ));
    }
    let materialized = archive::count_files(&export_dir)?;
    if materialized != copied {
        return Err(Error::export_integrity(
            &export_dir,
            format!("expected {} files, found {}", copied, materialized),
        ));
    }

    archive::write_archive(&export_dir, archive_path)
}

/// Store every file of `source` into `scratch` at the same path.
///
/// Walks a snapshot of the source tree with an explicit worklist, in path
/// order. Files the registry cannot decode and re-encode are copied byte for
/// byte. Returns the number of files copied.
fn copy_tree(
    source: &ProjectHandle,
    scratch: &ProjectHandle,
    options: &ExportOptions,
) -> Result<usize> {
    let tree = source.tree_snapshot()?;
    let mut worklist = vec![(ROOT, ProjectPath::root())];
    let mut copied = 0;

    while let Some((id, path)) = worklist.pop() {
        if options.cancelled() {
            return Err(Error::interrupted(format!(
                "export of `{}` cancelled at `{}`",
                source.id(),
                path
            )));
        }

        match tree.kind_of(id) {
            Some(NodeKind::File) => {
                let project_path = path.to_string();
                let real = match source.get(&project_path, true)? {
                    Retrieved::Path(real) => real,
                    Retrieved::Value(_) => {
                        return Err(Error::path_not_found(project_path, "no real path for file"));
                    }
                };

                match scratch.store(&Value::Path(real.clone()), &project_path) {
                    Ok(()) => {}
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::NoReaderFound | ErrorKind::NoWriterFound
                        ) =>
                    {
                        debug!(path = %path, "No codec round trip; copying bytes");
                        scratch.import_file(&real, &project_path)?;
                    }
                    Err(e) => return Err(e),
                }
                copied += 1;
            }
            Some(NodeKind::Folder) => {
                for (name, child) in tree.children(id).into_iter().rev() {
                    worklist.push((child, path.child(name)));
                }
            }
            None => {}
        }
    }

    Ok(copied)
}

/// Unpack into the project's root and adopt each file.
fn adopt_archive(handle: &ProjectHandle, archive_path: &Path) -> Result<usize> {
    let root = handle.root()?;
    let files = archive::unpack_archive(archive_path, &root)?;
    for file in &files {
        handle.adopt(&file.path, &file.relative)?;
    }
    Ok(files.len())
}
