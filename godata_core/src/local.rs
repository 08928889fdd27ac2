//! Local-disk storage backend.
//!
//! Layout of a backend home:
//!
//! - `config` with version and algorithm
//! - `catalog/<collection>/<name>.json` recording each project's storage root
//! - `storage/<collection>/<name>/` default storage roots
//!
//! Layout of a project storage root:
//!
//! - `.godata/tree.json` manifest mapping project paths to file records
//! - `.godata/objects/<shard>/<rest>.<suffix>` content-addressed file bytes
//! - `.godata/staging/` temp files for in-flight writes
//! - any other file is a project file adopted in place, named with its suffix
//!   tag where needed (see [`ProjectPath::to_tagged_relative_path`])

use crate::backend::{Fill, ProjectStorage, StorageBackend};
use crate::error::{Error, Result};
use crate::gc::{self, GcStats};
use crate::hash::{Algorithm, Hash};
use crate::path::{ProjectId, ProjectPath, RESERVED_SEGMENT};
use crate::tree::{FileRecord, Listing, Location, NodeKind, Tree};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const CONFIG_FILE: &str = "config";
const CATALOG_DIR: &str = "catalog";
const STORAGE_DIR: &str = "storage";
const MANIFEST_FILE: &str = "tree.json";
const MANIFEST_VERSION: u32 = 1;

pub(crate) fn meta_dir(root: &Path) -> PathBuf {
    root.join(RESERVED_SEGMENT)
}

pub(crate) fn objects_dir(root: &Path) -> PathBuf {
    meta_dir(root).join("objects")
}

pub(crate) fn staging_dir(root: &Path) -> PathBuf {
    meta_dir(root).join("staging")
}

fn manifest_path(root: &Path) -> PathBuf {
    meta_dir(root).join(MANIFEST_FILE)
}

/// Suffix of a real path: its extension, or empty.
fn suffix_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Write `contents` to `dest` through a temp file in the same directory.
fn write_atomic(dest: &Path, contents: &[u8]) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| Error::corrupted(dest, "destination has no parent directory"))?;
    fs::create_dir_all(dir)?;
    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(contents)?;
    temp_file.flush()?;
    temp_file.persist(dest)?;
    Ok(())
}

/// Catalog entry for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub root: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Backend keeping every project on the local filesystem.
#[derive(Debug)]
pub struct LocalBackend {
    home: PathBuf,
    algorithm: Algorithm,
}

impl LocalBackend {
    /// Initialize a backend home, or open it if it already exists.
    pub fn init<P: AsRef<Path>>(home: P, algorithm: Algorithm) -> Result<Self> {
        let home = std::path::absolute(home.as_ref())?;
        let config_path = home.join(CONFIG_FILE);
        if config_path.exists() {
            return Self::open(&home);
        }

        fs::create_dir_all(home.join(CATALOG_DIR))?;
        fs::create_dir_all(home.join(STORAGE_DIR))?;
        let config_content = format!("version=1\nalgo={}\n", algorithm.as_str());
        write_atomic(&config_path, config_content.as_bytes())?;
        info!(home = %home.display(), "Initialized backend");

        Ok(Self { home, algorithm })
    }

    /// Open an existing backend home.
    pub fn open<P: AsRef<Path>>(home: P) -> Result<Self> {
        let home = std::path::absolute(home.as_ref())?;
        if !home.is_dir() {
            return Err(Error::corrupted(&home, "backend home does not exist"));
        }

        let config_path = home.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(Error::corrupted(&home, "config file not found"));
        }
        let algorithm = Self::parse_config(&fs::read_to_string(&config_path)?)
            .map_err(|e| Error::corrupted(&config_path, e.to_string()))?;

        if !home.join(CATALOG_DIR).is_dir() {
            return Err(Error::corrupted(&home, "catalog directory missing"));
        }
        fs::create_dir_all(home.join(STORAGE_DIR))?;

        Ok(Self { home, algorithm })
    }

    /// Open `home`, initializing it with the default algorithm if needed.
    pub fn open_or_init<P: AsRef<Path>>(home: P) -> Result<Self> {
        Self::init(home, Algorithm::Blake3)
    }

    /// Parse the config file to extract the algorithm.
    fn parse_config(content: &str) -> Result<Algorithm> {
        let mut version = None;
        let mut algo = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "version" => version = Some(value.trim()),
                    "algo" => algo = Some(value.trim()),
                    _ => {}
                }
            }
        }

        if version != Some("1") {
            return Err(Error::corrupted(
                CONFIG_FILE,
                format!("unsupported config version: {:?}", version),
            ));
        }

        let algo = algo.ok_or_else(|| Error::corrupted(CONFIG_FILE, "missing algo"))?;
        Algorithm::parse(algo)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn catalog_dir(&self) -> PathBuf {
        self.home.join(CATALOG_DIR)
    }

    fn record_path(&self, id: &ProjectId) -> PathBuf {
        self.catalog_dir()
            .join(id.collection())
            .join(format!("{}.json", id.name()))
    }

    /// Storage root used when the caller does not pick one.
    pub fn default_root(&self, id: &ProjectId) -> PathBuf {
        self.home
            .join(STORAGE_DIR)
            .join(id.collection())
            .join(id.name())
    }

    /// Catalog entry for `id`.
    pub fn record(&self, id: &ProjectId) -> Result<ProjectRecord> {
        let path = self.record_path(id);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::project_not_found(id.collection(), id.name()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&content)
            .map_err(|e| Error::corrupted(&path, format!("invalid catalog record: {}", e)))
    }

    /// Claim the catalog slot for `id`, failing if it is taken.
    fn claim(&self, id: &ProjectId, record: &ProjectRecord) -> Result<()> {
        let path = self.record_path(id);
        let mut retries = 0;
        let mut file = loop {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => break file,
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    return Err(Error::project_exists(id.collection(), id.name()));
                }
                // A concurrent release may drop the collection directory in between
                Err(e) if e.kind() == IoErrorKind::NotFound && retries < 3 => retries += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let written = serde_json::to_vec_pretty(record)
            .map_err(Error::from)
            .and_then(|bytes| Ok(file.write_all(&bytes)?));
        if let Err(e) = written {
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        Ok(())
    }

    /// Drop the catalog entry and, if it was the last one, its collection.
    fn release(&self, id: &ProjectId) -> Result<()> {
        fs::remove_file(self.record_path(id))?;
        let collection_dir = self.catalog_dir().join(id.collection());
        if let Ok(mut entries) = fs::read_dir(&collection_dir)
            && entries.next().is_none()
        {
            let _ = fs::remove_dir(&collection_dir);
        }
        Ok(())
    }
}

impl StorageBackend for LocalBackend {
    fn create(&self, id: &ProjectId, root: Option<&Path>) -> Result<Box<dyn ProjectStorage>> {
        let root = match root {
            Some(root) => std::path::absolute(root)?,
            None => self.default_root(id),
        };
        let record = ProjectRecord {
            root: root.clone(),
            created_at: Utc::now(),
        };

        self.claim(id, &record)?;
        match LocalProject::create(&root) {
            Ok(project) => {
                info!(project = %id, root = %root.display(), "Created project storage");
                Ok(Box::new(project))
            }
            Err(e) => {
                let _ = self.release(id);
                Err(e)
            }
        }
    }

    fn open(&self, id: &ProjectId) -> Result<Box<dyn ProjectStorage>> {
        let record = self.record(id)?;
        let project = LocalProject::open(&record.root)?;
        debug!(project = %id, root = %record.root.display(), "Opened project storage");
        Ok(Box::new(project))
    }

    fn remove(&self, id: &ProjectId) -> Result<()> {
        let record = self.record(id)?;
        if record.root.exists() {
            fs::remove_dir_all(&record.root)?;
        }
        self.release(id)?;

        // Tidy the default storage layout
        let default_root = self.default_root(id);
        if let Some(collection_dir) = default_root.parent()
            && let Ok(mut entries) = fs::read_dir(collection_dir)
            && entries.next().is_none()
        {
            let _ = fs::remove_dir(collection_dir);
        }

        info!(project = %id, "Removed project storage");
        Ok(())
    }

    fn exists(&self, id: &ProjectId) -> Result<bool> {
        Ok(self.record_path(id).is_file())
    }

    fn collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.catalog_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn projects(&self, collection: &str) -> Result<Vec<String>> {
        let dir = self.catalog_dir().join(collection);
        if !dir.is_dir() {
            return Err(Error::collection_not_found(collection));
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// On-disk form of a project's tree.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    files: BTreeMap<String, FileRecord>,
}

/// One project stored under a local directory.
#[derive(Debug)]
pub struct LocalProject {
    root: PathBuf,
    tree: Tree,
}

impl LocalProject {
    /// Create an empty project at `root`.
    ///
    /// `root` may already exist only as an empty directory, since removing
    /// the project deletes it.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        if root.exists() && (!root.is_dir() || fs::read_dir(&root)?.next().is_some()) {
            return Err(Error::path_exists(root));
        }

        fs::create_dir_all(objects_dir(&root))?;
        fs::create_dir_all(staging_dir(&root))?;

        let project = Self {
            root,
            tree: Tree::new(),
        };
        project.save(&project.tree)?;
        Ok(project)
    }

    /// Open the project stored at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        let manifest_path = manifest_path(&root);
        let content = match fs::read(&manifest_path) {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::corrupted(&root, "project manifest not found"));
            }
            Err(e) => return Err(e.into()),
        };

        let manifest: Manifest = serde_json::from_slice(&content)
            .map_err(|e| Error::corrupted(&manifest_path, format!("invalid manifest: {}", e)))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(Error::corrupted(
                &manifest_path,
                format!("unsupported manifest version: {}", manifest.version),
            ));
        }

        let mut records = Vec::with_capacity(manifest.files.len());
        for (path, record) in manifest.files {
            records.push((ProjectPath::parse(&path)?, record));
        }
        let tree = Tree::from_records(records)
            .map_err(|e| Error::corrupted(&manifest_path, e.to_string()))?;

        fs::create_dir_all(staging_dir(&root))?;
        Ok(Self { root, tree })
    }

    /// Persist `tree` as the manifest, replacing the old one atomically.
    fn save(&self, tree: &Tree) -> Result<()> {
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            files: tree
                .files()
                .into_iter()
                .map(|(path, record)| (path.to_string(), record))
                .collect(),
        };
        write_atomic(
            &manifest_path(&self.root),
            &serde_json::to_vec_pretty(&manifest)?,
        )
    }

    /// Apply `change` to a copy of the tree, persist it, then adopt it.
    fn commit<T>(&mut self, change: impl FnOnce(&mut Tree) -> Result<T>) -> Result<T> {
        let mut next = self.tree.clone();
        let out = change(&mut next)?;
        self.save(&next)?;
        self.tree = next;
        Ok(out)
    }

    fn absolute(&self, record: &FileRecord) -> PathBuf {
        match &record.location {
            Location::Internal(rel) => self.root.join(rel),
            Location::External(path) => path.clone(),
        }
    }

    /// Relative location of the object holding bytes with `hash`.
    fn object_location(hash: &Hash, suffix: &str) -> PathBuf {
        let file_name = if suffix.is_empty() {
            hash.rest()
        } else {
            format!("{}.{}", hash.rest(), suffix)
        };
        PathBuf::from(RESERVED_SEGMENT)
            .join("objects")
            .join(hash.shard())
            .join(file_name)
    }

    /// Delete bytes a dropped record owned outright.
    ///
    /// Objects may be shared between files and are left for garbage
    /// collection. Adopted files belong to exactly one path.
    fn discard(&self, record: &FileRecord) -> Result<()> {
        if let Location::Internal(rel) = &record.location
            && !rel.starts_with(RESERVED_SEGMENT)
        {
            let path = self.root.join(rel);
            match fs::remove_file(&path) {
                Ok(()) => prune_empty_dirs(&self.root, &path),
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Remove empty directories from `path`'s parent up to (not including) `root`.
fn prune_empty_dirs(root: &Path, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) || fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

impl ProjectStorage for LocalProject {
    fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &ProjectPath) -> Result<PathBuf> {
        let record = self
            .tree
            .file_at(path)
            .ok_or_else(|| Error::path_not_found(path.to_string(), "no file at this path"))?;
        let real = self.absolute(record);
        if !real.is_file() {
            return Err(Error::path_not_found(
                path.to_string(),
                format!("backing bytes missing at {}", real.display()),
            ));
        }
        Ok(real)
    }

    fn kind(&self, path: &ProjectPath) -> Option<NodeKind> {
        self.tree.kind(path)
    }

    fn record(&self, path: &ProjectPath) -> Option<FileRecord> {
        self.tree.file_at(path).cloned()
    }

    fn write(&mut self, path: &ProjectPath, suffix: &str, fill: &mut Fill<'_>) -> Result<()> {
        self.tree.check_insert(path)?;

        let staging = staging_dir(&self.root);
        fs::create_dir_all(&staging)?;
        let staged_suffix = if suffix.is_empty() {
            String::new()
        } else {
            format!(".{}", suffix)
        };
        let staged = tempfile::Builder::new()
            .prefix("stage-")
            .suffix(&staged_suffix)
            .tempfile_in(&staging)?
            .into_temp_path();

        fill(&*staged)?;

        let hash = Hash::hash_file(&staged)?;
        let location = Self::object_location(&hash, suffix);
        let object = self.root.join(&location);
        if object.exists() {
            // Deduplicated; the staged copy is dropped
            debug!(path = %path, object = %hash, "Object already present");
        } else {
            if let Some(parent) = object.parent() {
                fs::create_dir_all(parent)?;
            }
            staged.persist(&object)?;
        }

        let record = FileRecord::internal(location, suffix);
        let previous = self.commit(|tree| tree.insert_file(path, record))?;
        if let Some(previous) = previous {
            self.discard(&previous)?;
        }
        debug!(path = %path, object = %hash, suffix, "Stored file");
        Ok(())
    }

    fn link(&mut self, path: &ProjectPath, real: &Path) -> Result<()> {
        if !real.is_file() {
            return Err(Error::path_not_found(
                real.display().to_string(),
                "link target is not an existing file",
            ));
        }
        let real = fs::canonicalize(real)?;
        let record = FileRecord::external(&real, suffix_of(&real));

        let previous = self.commit(|tree| tree.insert_file(path, record))?;
        if let Some(previous) = previous {
            self.discard(&previous)?;
        }
        debug!(path = %path, target = %real.display(), "Linked file");
        Ok(())
    }

    fn adopt(&mut self, path: &ProjectPath, relative: &Path) -> Result<()> {
        if relative.starts_with(RESERVED_SEGMENT) {
            return Err(Error::invalid_path(
                relative.display().to_string(),
                "cannot adopt storage metadata",
            ));
        }
        let real = self.root.join(relative);
        if !real.is_file() {
            return Err(Error::path_not_found(
                path.to_string(),
                format!("no file to adopt at {}", real.display()),
            ));
        }
        let record = FileRecord::internal(relative, suffix_of(&real));

        let previous = self.commit(|tree| tree.insert_file(path, record))?;
        if let Some(previous) = previous
            && Some(&previous) != self.tree.file_at(path)
        {
            self.discard(&previous)?;
        }
        debug!(path = %path, real = %real.display(), "Adopted file");
        Ok(())
    }

    fn rename(&mut self, from: &ProjectPath, to: &ProjectPath, overwrite: bool) -> Result<()> {
        let replaced = self.commit(|tree| tree.rename(from, to, overwrite))?;
        if let Some(replaced) = replaced
            && Some(&replaced) != self.tree.file_at(to)
        {
            self.discard(&replaced)?;
        }
        debug!(from = %from, to = %to, "Moved file");
        Ok(())
    }

    fn remove(&mut self, path: &ProjectPath, recursive: bool) -> Result<()> {
        let removed = self.commit(|tree| tree.remove(path, recursive))?;
        for (_, record) in &removed {
            self.discard(record)?;
        }
        debug!(path = %path, files = removed.len(), "Removed node");
        Ok(())
    }

    fn list_children(&self, path: &ProjectPath) -> Result<Listing> {
        self.tree.listing(path)
    }

    fn tree(&self) -> &Tree {
        &self.tree
    }

    fn materialize(&self, dest: &Path) -> Result<PathBuf> {
        if dest.exists() {
            return Err(Error::path_exists(dest));
        }
        fs::create_dir_all(dest)?;

        for (path, _) in self.tree.files() {
            let source = self.resolve(&path)?;
            let target = dest.join(path.to_tagged_relative_path(&suffix_of(&source)));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&source, &target)?;
        }

        Ok(dest.to_path_buf())
    }

    fn collect_garbage(&mut self, dry_run: bool) -> Result<GcStats> {
        let stats = gc::collect(&self.root, &self.tree, dry_run)?;
        info!(
            root = %self.root.display(),
            objects = stats.objects_deleted,
            bytes = stats.bytes_freed,
            dry_run,
            "Collected garbage"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn id(collection: &str, name: &str) -> ProjectId {
        ProjectId::new(collection, name).unwrap()
    }

    fn p(raw: &str) -> ProjectPath {
        ProjectPath::parse(raw).unwrap()
    }

    fn write_bytes(project: &mut dyn ProjectStorage, path: &str, suffix: &str, bytes: &[u8]) {
        project
            .write(&p(path), suffix, &mut |staged| Ok(fs::write(staged, bytes)?))
            .unwrap();
    }

    #[test]
    fn test_backend_init() {
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path().join("home");

        let backend = LocalBackend::init(&home, Algorithm::Blake3).unwrap();
        assert_eq!(backend.algorithm(), Algorithm::Blake3);
        assert!(home.join("catalog").is_dir());

        let config = fs::read_to_string(home.join("config")).unwrap();
        assert!(config.contains("version=1"));
        assert!(config.contains("algo=blake3-256"));

        // Init on an existing home opens it
        LocalBackend::init(&home, Algorithm::Blake3).unwrap();
    }

    #[test]
    fn test_backend_open_invalid() {
        let temp_dir = TempDir::new().unwrap();
        assert!(LocalBackend::open(temp_dir.path().join("missing")).is_err());

        let home = temp_dir.path().join("home");
        fs::create_dir_all(&home).unwrap();
        let err = LocalBackend::open(&home).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_parse_config() {
        let algo = LocalBackend::parse_config("# comment\nversion=1\nalgo=blake3-256\n").unwrap();
        assert_eq!(algo, Algorithm::Blake3);
        assert!(LocalBackend::parse_config("version=99\nalgo=blake3-256\n").is_err());
        assert!(LocalBackend::parse_config("version=1\n").is_err());
        assert!(LocalBackend::parse_config("version=1\nalgo=md5\n").is_err());
    }

    #[test]
    fn test_create_open_remove() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path(), Algorithm::Blake3).unwrap();
        let survey = id("default", "survey");

        let mut storage = backend.create(&survey, None).unwrap();
        assert_eq!(storage.root(), backend.default_root(&survey));
        write_bytes(storage.as_mut(), "a.bin", "bin", b"abc");
        drop(storage);

        let err = backend.create(&survey, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let storage = backend.open(&survey).unwrap();
        assert_eq!(fs::read(storage.resolve(&p("a.bin")).unwrap()).unwrap(), b"abc");
        let root = storage.root().to_path_buf();
        drop(storage);

        backend.remove(&survey).unwrap();
        assert!(!root.exists());
        assert!(!backend.exists(&survey).unwrap());
        assert_eq!(backend.open(&survey).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(backend.remove(&survey).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(backend.collections().unwrap().is_empty());
    }

    #[test]
    fn test_create_at_explicit_root() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path().join("home"), Algorithm::Blake3).unwrap();
        let root = temp_dir.path().join("elsewhere");

        let storage = backend.create(&id("lab", "run1"), Some(root.as_path())).unwrap();
        assert_eq!(storage.root(), root);
        assert!(root.join(".godata").join("tree.json").is_file());
        assert_eq!(backend.record(&id("lab", "run1")).unwrap().root, root);
    }

    #[test]
    fn test_create_over_existing_project_root_fails() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path().join("home"), Algorithm::Blake3).unwrap();
        let root = temp_dir.path().join("shared");

        backend.create(&id("default", "one"), Some(root.as_path())).unwrap();
        let err = backend.create(&id("default", "two"), Some(root.as_path())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        // The failed create left no catalog entry behind
        assert!(!backend.exists(&id("default", "two")).unwrap());
    }

    #[test]
    fn test_create_rejects_occupied_root() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path().join("home"), Algorithm::Blake3).unwrap();
        let mydata = temp_dir.path().join("mydata");
        fs::create_dir_all(&mydata).unwrap();
        fs::write(mydata.join("precious.txt"), b"keep me").unwrap();

        let err = backend
            .create(&id("default", "mine"), Some(mydata.as_path()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(!backend.exists(&id("default", "mine")).unwrap());
        assert_eq!(fs::read(mydata.join("precious.txt")).unwrap(), b"keep me");

        // An empty directory is fine
        let empty = temp_dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        backend.create(&id("default", "fresh"), Some(empty.as_path())).unwrap();
    }

    #[test]
    fn test_collections_and_projects_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::init(temp_dir.path(), Algorithm::Blake3).unwrap();

        backend.create(&id("default", "zeta"), None).unwrap();
        backend.create(&id("default", "alpha"), None).unwrap();
        backend.create(&id("lab", "run"), None).unwrap();

        assert_eq!(backend.collections().unwrap(), vec!["default", "lab"]);
        assert_eq!(backend.projects("default").unwrap(), vec!["alpha", "zeta"]);
        assert_eq!(
            backend.projects("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_write_is_content_addressed() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path()).unwrap();

        write_bytes(&mut project, "a.bin", "bin", b"same");
        write_bytes(&mut project, "b/c.bin", "bin", b"same");

        let a = project.resolve(&p("a.bin")).unwrap();
        let c = project.resolve(&p("b/c.bin")).unwrap();
        assert_eq!(a, c);
        assert_eq!(a.extension().unwrap(), "bin");
        assert!(a.starts_with(objects_dir(temp_dir.path())));

        // Staging holds nothing once writes finish
        assert_eq!(fs::read_dir(staging_dir(temp_dir.path())).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_fill_leaves_tree_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path()).unwrap();

        let err = project
            .write(&p("a.txt"), "txt", &mut |_| {
                Err(Error::codec("text", "writer exploded"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
        assert_eq!(project.kind(&p("a.txt")), None);
        assert_eq!(fs::read_dir(staging_dir(temp_dir.path())).unwrap().count(), 0);

        let reopened = LocalProject::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.tree().file_count(), 0);
    }

    #[test]
    fn test_conflict_reported_before_fill() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path()).unwrap();
        write_bytes(&mut project, "a/b.bin", "bin", b"x");

        let mut called = false;
        let err = project
            .write(&p("a"), "bin", &mut |_| {
                called = true;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathConflict);
        assert!(!called);
    }

    #[test]
    fn test_manifest_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let external = temp_dir.path().join("outside.csv");
        fs::write(&external, b"a,b\n1,2\n").unwrap();

        let root = temp_dir.path().join("project");
        let mut project = LocalProject::create(&root).unwrap();
        write_bytes(&mut project, "data/x.json", "json", b"{}");
        project.link(&p("raw/outside.csv"), &external).unwrap();
        drop(project);

        let project = LocalProject::open(&root).unwrap();
        assert_eq!(project.kind(&p("data")), Some(NodeKind::Folder));
        assert_eq!(
            project.resolve(&p("raw/outside.csv")).unwrap(),
            fs::canonicalize(&external).unwrap()
        );
        let record = project.record(&p("data/x.json")).unwrap();
        assert_eq!(record.suffix, "json");
        assert!(record.is_internal());
    }

    #[test]
    fn test_open_rejects_bad_manifest() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(
            LocalProject::open(temp_dir.path()).unwrap_err().kind(),
            ErrorKind::Corrupted
        );

        LocalProject::create(temp_dir.path()).unwrap();
        fs::write(manifest_path(temp_dir.path()), b"{not json").unwrap();
        assert_eq!(
            LocalProject::open(temp_dir.path()).unwrap_err().kind(),
            ErrorKind::Corrupted
        );
    }

    #[test]
    fn test_link_missing_target() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path().join("p")).unwrap();
        let err = project
            .link(&p("a.txt"), &temp_dir.path().join("nope.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = project.link(&p("a"), temp_dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_resolve_missing_bytes_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path()).unwrap();
        write_bytes(&mut project, "a.bin", "bin", b"gone soon");
        fs::remove_file(project.resolve(&p("a.bin")).unwrap()).unwrap();

        let err = project.resolve(&p("a.bin")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_adopt_and_remove_deletes_owned_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path()).unwrap();
        let placed = temp_dir.path().join("sub").join("b.bin");
        fs::create_dir_all(placed.parent().unwrap()).unwrap();
        fs::write(&placed, b"unpacked").unwrap();

        project.adopt(&p("sub/b.bin"), Path::new("sub/b.bin")).unwrap();
        assert_eq!(project.resolve(&p("sub/b.bin")).unwrap(), placed);
        assert_eq!(project.record(&p("sub/b.bin")).unwrap().suffix, "bin");

        project.remove(&p("sub"), true).unwrap();
        assert!(!placed.exists());
        assert!(!temp_dir.path().join("sub").exists());

        let err = project.adopt(&p("ghost.bin"), Path::new("ghost.bin")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_adopt_tagged_file_keeps_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path()).unwrap();
        let placed = temp_dir.path().join("meta").join("config.godata.json");
        fs::create_dir_all(placed.parent().unwrap()).unwrap();
        fs::write(&placed, b"{}").unwrap();

        let relative = PathBuf::from("meta").join("config.godata.json");
        project.adopt(&p("meta/config"), &relative).unwrap();
        assert_eq!(project.resolve(&p("meta/config")).unwrap(), placed);
        assert_eq!(project.record(&p("meta/config")).unwrap().suffix, "json");

        let err = project
            .adopt(&p("tree"), &PathBuf::from(".godata").join("tree.json"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn test_rename_keeps_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let mut project = LocalProject::create(temp_dir.path()).unwrap();
        write_bytes(&mut project, "a.bin", "bin", b"moving");

        project.rename(&p("a.bin"), &p("deep/b.bin"), false).unwrap();
        assert_eq!(project.kind(&p("a.bin")), None);
        assert_eq!(
            fs::read(project.resolve(&p("deep/b.bin")).unwrap()).unwrap(),
            b"moving"
        );
    }

    #[test]
    fn test_materialize() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("project");
        let mut project = LocalProject::create(&root).unwrap();
        write_bytes(&mut project, "a.txt", "txt", b"alpha");
        write_bytes(&mut project, "sub/c.bin", "bin", b"gamma");
        write_bytes(&mut project, "meta/config", "json", b"{}");

        let dest = temp_dir.path().join("out");
        assert_eq!(project.materialize(&dest).unwrap(), dest);
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("sub").join("c.bin")).unwrap(), b"gamma");

        // The suffix rides along in the file name when the path lacks it
        assert_eq!(
            fs::read(dest.join("meta").join("config.godata.json")).unwrap(),
            b"{}"
        );
        assert!(!dest.join("meta").join("config").exists());

        // Destination must not exist
        let err = project.materialize(&dest).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
}
