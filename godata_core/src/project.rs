//! Open project handles and their tree operations.

use crate::backend::ProjectStorage;
use crate::codec::CodecRegistry;
use crate::error::{Error, ErrorKind, Result};
use crate::gc::GcStats;
use crate::path::{ProjectId, ProjectPath};
use crate::tree::{FileRecord, Listing, NodeKind, Tree};
use crate::value::{Shape, Value};
use parking_lot::Mutex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// What [`ProjectTree::get`] hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    /// The file decoded through the codec registry.
    Value(Value),
    /// The file's real location.
    Path(PathBuf),
}

impl Retrieved {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Retrieved::Value(value) => Some(value),
            Retrieved::Path(_) => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            Retrieved::Path(path) => Some(path),
            Retrieved::Value(_) => None,
        }
    }
}

/// Tree operations on one project.
///
/// Project paths are `/`-separated and normalized by [`ProjectPath::parse`].
pub trait ProjectTree {
    /// Serialize `value` with its registered writer and store it at `path`.
    ///
    /// A [`Value::Path`] is first read through the reader registered for its
    /// suffix, then written back through the writer for the decoded shape.
    /// On any failure the tree is left unchanged.
    fn store(&self, value: &Value, path: &str) -> Result<()>;

    /// Fetch the file at `path`, decoded or (with `as_path`) as a real path.
    ///
    /// Files with no reader for their suffix come back as paths.
    fn get(&self, path: &str, as_path: bool) -> Result<Retrieved>;

    /// Reference an existing file without copying or decoding it.
    fn link(&self, real_path: &Path, path: &str) -> Result<()>;

    /// Remove a file or folder. Non-empty folders need `recursive`.
    fn remove(&self, path: &str, recursive: bool) -> Result<()>;

    /// Direct children of the folder at `path` (the root if `None`).
    fn list(&self, path: Option<&str>) -> Result<Listing>;
}

struct Inner {
    id: ProjectId,
    registry: Arc<CodecRegistry>,
    /// `None` once the project has been removed.
    storage: Mutex<Option<Box<dyn ProjectStorage>>>,
}

/// Shared handle to an open project.
///
/// Clones refer to the same project. Operations are serialized per project.
/// Once the project is removed every operation fails with `Stale`.
#[derive(Clone)]
pub struct ProjectHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectHandle")
            .field("id", &self.inner.id)
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl ProjectHandle {
    pub(crate) fn new(
        id: ProjectId,
        registry: Arc<CodecRegistry>,
        storage: Box<dyn ProjectStorage>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                registry,
                storage: Mutex::new(Some(storage)),
            }),
        }
    }

    pub fn id(&self) -> &ProjectId {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.id.name()
    }

    pub fn collection(&self) -> &str {
        self.inner.id.collection()
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.inner.registry
    }

    /// True if both handles refer to the same open project.
    pub fn ptr_eq(&self, other: &ProjectHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_stale(&self) -> bool {
        self.inner.storage.lock().is_none()
    }

    /// Detach the storage. Waits for in-flight operations.
    pub(crate) fn invalidate(&self) {
        self.inner.storage.lock().take();
    }

    fn with_storage<T>(&self, op: impl FnOnce(&mut dyn ProjectStorage) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.storage.lock();
        match guard.as_mut() {
            Some(storage) => op(storage.as_mut()),
            None => Err(Error::stale(self.collection(), self.name())),
        }
    }

    /// Real directory holding the project.
    pub fn root(&self) -> Result<PathBuf> {
        self.with_storage(|storage| Ok(storage.root().to_path_buf()))
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        let path = ProjectPath::parse(path)?;
        self.with_storage(|storage| Ok(storage.kind(&path).is_some()))
    }

    pub fn kind(&self, path: &str) -> Result<Option<NodeKind>> {
        let path = ProjectPath::parse(path)?;
        self.with_storage(|storage| Ok(storage.kind(&path)))
    }

    /// Copy an external file's bytes verbatim into the project.
    pub fn import_file(&self, real_path: &Path, path: &str) -> Result<()> {
        let path = ProjectPath::parse(path)?;
        if !real_path.is_file() {
            return Err(Error::path_not_found(
                real_path.display().to_string(),
                "source is not an existing file",
            ));
        }
        let suffix = real_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();

        self.with_storage(|storage| {
            storage.write(&path, &suffix, &mut |staged| {
                fs::copy(real_path, staged)?;
                Ok(())
            })
        })?;
        debug!(project = %self.id(), path = %path, source = %real_path.display(), "Imported file");
        Ok(())
    }

    /// Link every file under `real_dir` beneath `path`.
    ///
    /// Only direct children are linked unless `recursive`. Every target is
    /// checked for conflicts before anything is linked.
    pub fn link_folder(
        &self,
        real_dir: &Path,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<ProjectPath>> {
        let base = ProjectPath::parse(path)?;
        if !real_dir.is_dir() {
            return Err(Error::path_not_found(
                real_dir.display().to_string(),
                "not an existing directory",
            ));
        }

        let mut walker = ignore::WalkBuilder::new(real_dir);
        walker
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        if !recursive {
            walker.max_depth(Some(1));
        }

        let mut targets = Vec::new();
        for entry in walker.build() {
            let entry = entry?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(real_dir)
                .map_err(|e| Error::invalid_path(entry.path().display().to_string(), e.to_string()))?;

            let mut target = base.clone();
            for component in relative.components() {
                let segment = component.as_os_str().to_str().ok_or_else(|| {
                    Error::invalid_path(relative.display().to_string(), "name is not valid UTF-8")
                })?;
                target = target.join(segment)?;
            }
            targets.push((entry.path().to_path_buf(), target));
        }

        self.with_storage(|storage| {
            let mut preview = storage.tree().clone();
            for (real, target) in &targets {
                preview.insert_file(target, FileRecord::external(real, ""))?;
            }
            for (real, target) in &targets {
                storage.link(target, real)?;
            }
            Ok(())
        })?;

        info!(project = %self.id(), dir = %real_dir.display(), files = targets.len(), "Linked folder");
        Ok(targets.into_iter().map(|(_, target)| target).collect())
    }

    /// Re-point the file at `from` to `to`.
    pub fn move_file(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let from = ProjectPath::parse(from)?;
        let to = ProjectPath::parse(to)?;
        self.with_storage(|storage| storage.rename(&from, &to, overwrite))
    }

    /// Suffix a stored `value` would get.
    pub fn suffix_for(&self, value: &Value) -> Result<String> {
        match self.inner.registry.suffix_for(value) {
            Err(e) if e.kind() == ErrorKind::NoWriterFound && value.shape() == Shape::BYTES => {
                Ok(RAW_SUFFIX.to_string())
            }
            other => other,
        }
    }

    /// Delete stored bytes no file references any more.
    pub fn collect_garbage(&self, dry_run: bool) -> Result<GcStats> {
        self.with_storage(|storage| storage.collect_garbage(dry_run))
    }

    /// A detached copy of the current tree.
    pub fn tree_snapshot(&self) -> Result<Tree> {
        self.with_storage(|storage| Ok(storage.tree().clone()))
    }

    pub fn file_count(&self) -> Result<usize> {
        self.with_storage(|storage| Ok(storage.tree().file_count()))
    }

    /// Copy every file into a new directory `dest`, laid out by project path.
    pub fn materialize(&self, dest: &Path) -> Result<PathBuf> {
        self.with_storage(|storage| storage.materialize(dest))
    }

    /// Take ownership of a file already placed at `root()/relative`.
    pub(crate) fn adopt(&self, path: &ProjectPath, relative: &Path) -> Result<()> {
        self.with_storage(|storage| storage.adopt(path, relative))
    }
}

/// Suffix raw bytes are stored with when no writer claims them.
const RAW_SUFFIX: &str = "bin";

impl ProjectTree for ProjectHandle {
    fn store(&self, value: &Value, path: &str) -> Result<()> {
        let path = ProjectPath::parse(path)?;
        let registry = &self.inner.registry;

        let decoded;
        let value = match value {
            Value::Path(real) => {
                decoded = registry.read(real)?;
                &decoded
            }
            other => other,
        };

        let writer = match registry.writer_for(value) {
            Ok(writer) => Some(writer),
            Err(e) if e.kind() == ErrorKind::NoWriterFound && matches!(value, Value::Bytes(_)) => {
                None
            }
            Err(e) => return Err(e),
        };
        let suffix = writer
            .as_ref()
            .map_or(RAW_SUFFIX, |writer| writer.suffix())
            .to_string();

        self.with_storage(|storage| {
            storage.write(&path, &suffix, &mut |staged| match (&writer, value) {
                (Some(writer), value) => writer.write(value, staged),
                (None, Value::Bytes(bytes)) => Ok(fs::write(staged, bytes)?),
                (None, other) => Err(Error::no_writer(other.shape().as_str())),
            })
        })?;

        debug!(project = %self.id(), path = %path, shape = %value.shape(), suffix = %suffix, "Stored value");
        Ok(())
    }

    fn get(&self, path: &str, as_path: bool) -> Result<Retrieved> {
        let path = ProjectPath::parse(path)?;
        let real = self.with_storage(|storage| storage.resolve(&path))?;
        if as_path {
            return Ok(Retrieved::Path(real));
        }

        match self.inner.registry.read(&real) {
            Ok(value) => Ok(Retrieved::Value(value)),
            Err(e) if e.kind() == ErrorKind::NoReaderFound => {
                info!(
                    project = %self.id(),
                    path = %path,
                    "No reader for `{}`; returning its path",
                    real.display()
                );
                Ok(Retrieved::Path(real))
            }
            Err(e) => Err(e),
        }
    }

    fn link(&self, real_path: &Path, path: &str) -> Result<()> {
        let path = ProjectPath::parse(path)?;
        self.with_storage(|storage| storage.link(&path, real_path))
    }

    fn remove(&self, path: &str, recursive: bool) -> Result<()> {
        let path = ProjectPath::parse(path)?;
        self.with_storage(|storage| storage.remove(&path, recursive))
    }

    fn list(&self, path: Option<&str>) -> Result<Listing> {
        let path = ProjectPath::parse(path.unwrap_or_default())?;
        self.with_storage(|storage| storage.list_children(&path))
    }
}
