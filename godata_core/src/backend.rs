//! Storage backend contract.
//!
//! A [`StorageBackend`] is a directory of projects. Each open project is a
//! [`ProjectStorage`]: one storage scope holding the project's tree and the
//! bytes its files point at.

use crate::error::Result;
use crate::gc::GcStats;
use crate::path::{ProjectId, ProjectPath};
use crate::tree::{FileRecord, Listing, NodeKind, Tree};
use std::fmt;
use std::path::{Path, PathBuf};

/// Callback that writes a file's bytes to a staged real path.
pub type Fill<'a> = dyn FnMut(&Path) -> Result<()> + 'a;

/// Directory of projects keyed by [`ProjectId`].
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Create a project, optionally at an explicit storage root.
    ///
    /// Fails with `AlreadyExists` if the project is already known.
    fn create(&self, id: &ProjectId, root: Option<&Path>) -> Result<Box<dyn ProjectStorage>>;

    /// Open an existing project. Fails with `NotFound` if it is unknown.
    fn open(&self, id: &ProjectId) -> Result<Box<dyn ProjectStorage>>;

    /// Destroy a project and everything it owns.
    fn remove(&self, id: &ProjectId) -> Result<()>;

    fn exists(&self, id: &ProjectId) -> Result<bool>;

    /// All collection names, sorted.
    fn collections(&self) -> Result<Vec<String>>;

    /// Project names in `collection`, sorted. `NotFound` for an unknown collection.
    fn projects(&self, collection: &str) -> Result<Vec<String>>;
}

/// One project's storage scope.
///
/// Every mutation either fully applies (tree and persisted metadata) or
/// leaves the tree untouched.
pub trait ProjectStorage: Send + fmt::Debug {
    /// Real directory that holds the project.
    fn root(&self) -> &Path;

    /// Real path of the file at `path`.
    ///
    /// `NotFound` if no file is there or its bytes are missing.
    fn resolve(&self, path: &ProjectPath) -> Result<PathBuf>;

    fn kind(&self, path: &ProjectPath) -> Option<NodeKind>;

    fn record(&self, path: &ProjectPath) -> Option<FileRecord>;

    /// Store bytes at `path`.
    ///
    /// `fill` receives a staged real path ending in `.{suffix}` and must
    /// write the file's complete contents there. Path conflicts are
    /// reported before `fill` runs.
    fn write(&mut self, path: &ProjectPath, suffix: &str, fill: &mut Fill<'_>) -> Result<()>;

    /// Record a reference to an existing external file.
    fn link(&mut self, path: &ProjectPath, real: &Path) -> Result<()>;

    /// Take ownership of a file already placed at `root()/relative` as the
    /// file at `path`.
    fn adopt(&mut self, path: &ProjectPath, relative: &Path) -> Result<()>;

    fn rename(&mut self, from: &ProjectPath, to: &ProjectPath, overwrite: bool) -> Result<()>;

    fn remove(&mut self, path: &ProjectPath, recursive: bool) -> Result<()>;

    fn list_children(&self, path: &ProjectPath) -> Result<Listing>;

    /// The project's tree as currently persisted.
    fn tree(&self) -> &Tree;

    /// Copy every file to `dest/<project path>`, tagging file names whose
    /// extension differs from the stored suffix. `dest` must not exist.
    fn materialize(&self, dest: &Path) -> Result<PathBuf>;

    /// Delete stored bytes no file references.
    fn collect_garbage(&mut self, dry_run: bool) -> Result<GcStats>;
}
