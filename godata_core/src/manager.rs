//! Project lifecycle: create, load, remove and list.

use crate::backend::StorageBackend;
use crate::codec::CodecRegistry;
use crate::error::{Error, Result};
use crate::local::LocalBackend;
use crate::path::{DEFAULT_COLLECTION, ProjectId, is_hidden_name, validate_name};
use crate::project::ProjectHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Entry point for working with projects.
///
/// Holds the storage backend, the codec registry shared by every handle it
/// opens, and a cache of open projects. Loading a project twice yields the
/// same handle.
#[derive(Debug)]
pub struct ProjectManager {
    backend: Arc<dyn StorageBackend>,
    registry: Arc<CodecRegistry>,
    cache: Mutex<HashMap<ProjectId, ProjectHandle>>,
}

impl ProjectManager {
    /// A manager over `backend` with the built-in codecs.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_registry(backend, Arc::new(CodecRegistry::with_builtins()))
    }

    pub fn with_registry(backend: Arc<dyn StorageBackend>, registry: Arc<CodecRegistry>) -> Self {
        Self {
            backend,
            registry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A manager over a local backend at `home`, initialized if needed.
    pub fn open_local<P: AsRef<Path>>(home: P) -> Result<Self> {
        Ok(Self::new(Arc::new(LocalBackend::open_or_init(home)?)))
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn id(name: &str, collection: Option<&str>) -> Result<ProjectId> {
        ProjectId::new(collection.unwrap_or(DEFAULT_COLLECTION), name)
    }

    /// Create a project at the backend's default location.
    pub fn create(&self, name: &str, collection: Option<&str>) -> Result<ProjectHandle> {
        self.create_inner(Self::id(name, collection)?, None)
    }

    /// Create a project stored under `storage_root`.
    pub fn create_at(
        &self,
        name: &str,
        collection: Option<&str>,
        storage_root: &Path,
    ) -> Result<ProjectHandle> {
        self.create_inner(Self::id(name, collection)?, Some(storage_root))
    }

    fn create_inner(&self, id: ProjectId, root: Option<&Path>) -> Result<ProjectHandle> {
        let mut cache = self.cache.lock();
        if cache.contains_key(&id) || self.backend.exists(&id)? {
            return Err(Error::project_exists(id.collection(), id.name()));
        }

        let storage = self.backend.create(&id, root)?;
        let handle = ProjectHandle::new(id.clone(), Arc::clone(&self.registry), storage);
        info!(project = %id, "Created project");
        cache.insert(id, handle.clone());
        Ok(handle)
    }

    /// Open an existing project, reusing the cached handle if there is one.
    pub fn load(&self, name: &str, collection: Option<&str>) -> Result<ProjectHandle> {
        let id = Self::id(name, collection)?;
        let mut cache = self.cache.lock();
        if let Some(handle) = cache.get(&id) {
            return Ok(handle.clone());
        }

        let storage = self.backend.open(&id)?;
        let handle = ProjectHandle::new(id.clone(), Arc::clone(&self.registry), storage);
        info!(project = %id, "Loaded project");
        cache.insert(id, handle.clone());
        Ok(handle)
    }

    /// Destroy a project and all of its data.
    ///
    /// Requires `force`. Open handles to the project become stale.
    pub fn remove(&self, name: &str, collection: Option<&str>, force: bool) -> Result<()> {
        let id = Self::id(name, collection)?;
        let mut cache = self.cache.lock();
        if !cache.contains_key(&id) && !self.backend.exists(&id)? {
            return Err(Error::project_not_found(id.collection(), id.name()));
        }
        if !force {
            return Err(Error::force_required(id.collection(), id.name()));
        }

        if let Some(handle) = cache.remove(&id) {
            handle.invalidate();
        }
        self.backend.remove(&id)?;
        info!(project = %id, "Removed project");
        Ok(())
    }

    pub fn exists(&self, name: &str, collection: Option<&str>) -> Result<bool> {
        let id = Self::id(name, collection)?;
        if self.cache.lock().contains_key(&id) {
            return Ok(true);
        }
        self.backend.exists(&id)
    }

    /// Project names in `collection`, sorted.
    ///
    /// Hidden names, and every project of a hidden collection, are left out
    /// unless `show_hidden`.
    pub fn list(&self, collection: Option<&str>, show_hidden: bool) -> Result<Vec<String>> {
        let collection = collection.unwrap_or(DEFAULT_COLLECTION);
        validate_name(collection)?;
        let names = self.backend.projects(collection)?;
        if show_hidden {
            return Ok(names);
        }
        if is_hidden_name(collection) {
            return Ok(Vec::new());
        }
        Ok(names.into_iter().filter(|n| !is_hidden_name(n)).collect())
    }

    /// Collection names, sorted. Hidden ones only with `show_hidden`.
    pub fn list_collections(&self, show_hidden: bool) -> Result<Vec<String>> {
        let names = self.backend.collections()?;
        Ok(names
            .into_iter()
            .filter(|n| show_hidden || !is_hidden_name(n))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::project::{ProjectTree, Retrieved};
    use crate::value::Value;
    use std::thread;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ProjectManager {
        ProjectManager::open_local(dir.path().join("home")).unwrap()
    }

    #[test]
    fn test_create_then_load_is_same_handle() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        let created = manager.create("survey", None).unwrap();
        let loaded = manager.load("survey", None).unwrap();
        let again = manager.load("survey", Some("default")).unwrap();
        assert!(created.ptr_eq(&loaded));
        assert!(loaded.ptr_eq(&again));
        assert_eq!(created.collection(), DEFAULT_COLLECTION);
    }

    #[test]
    fn test_create_existing_fails() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        manager.create("survey", None).unwrap();

        let err = manager.create("survey", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        // Same name in another collection is a different project
        manager.create("survey", Some("archive")).unwrap();
    }

    #[test]
    fn test_load_missing_fails() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let err = manager.load("ghost", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_load_from_fresh_manager_sees_data() {
        let temp_dir = TempDir::new().unwrap();
        {
            let manager = manager(&temp_dir);
            let project = manager.create("survey", None).unwrap();
            project.store(&Value::from("kept"), "notes/a").unwrap();
        }

        let manager = manager(&temp_dir);
        let project = manager.load("survey", None).unwrap();
        assert_eq!(
            project.get("notes/a", false).unwrap(),
            Retrieved::Value(Value::from("kept"))
        );
    }

    #[test]
    fn test_remove_requires_force() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let project = manager.create("survey", None).unwrap();
        project.store(&Value::from("x"), "a").unwrap();

        let err = manager.remove("survey", None, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForceRequired);
        assert!(manager.exists("survey", None).unwrap());
        assert!(project.exists("a").unwrap());

        let err = manager.remove("ghost", None, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_remove_makes_handles_stale() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let project = manager.create("survey", None).unwrap();
        let root = project.root().unwrap();

        manager.remove("survey", None, true).unwrap();
        assert!(!root.exists());
        assert!(!manager.exists("survey", None).unwrap());
        assert_eq!(
            project.store(&Value::from("x"), "a").unwrap_err().kind(),
            ErrorKind::Stale
        );
        assert_eq!(
            manager.load("survey", None).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        // The name is free again
        let recreated = manager.create("survey", None).unwrap();
        assert!(!recreated.ptr_eq(&project));
    }

    #[test]
    fn test_list_hides_dot_names() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        manager.create("beta", None).unwrap();
        manager.create("alpha", None).unwrap();
        manager.create(".scratch", None).unwrap();
        manager.create("default.survey", Some(".temp")).unwrap();

        assert_eq!(manager.list(None, false).unwrap(), vec!["alpha", "beta"]);
        assert_eq!(
            manager.list(None, true).unwrap(),
            vec![".scratch", "alpha", "beta"]
        );

        assert!(manager.list(Some(".temp"), false).unwrap().is_empty());
        assert_eq!(
            manager.list(Some(".temp"), true).unwrap(),
            vec!["default.survey"]
        );

        assert_eq!(manager.list_collections(false).unwrap(), vec!["default"]);
        assert_eq!(
            manager.list_collections(true).unwrap(),
            vec![".temp", "default"]
        );

        assert_eq!(
            manager.list(Some("missing"), false).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        assert_eq!(
            manager.create("../escape", None).unwrap_err().kind(),
            ErrorKind::InvalidName
        );
        assert_eq!(
            manager.create("ok", Some("")).unwrap_err().kind(),
            ErrorKind::InvalidName
        );
    }

    #[test]
    fn test_concurrent_loads_converge() {
        let temp_dir = TempDir::new().unwrap();
        {
            let manager = manager(&temp_dir);
            manager.create("shared", None).unwrap();
        }
        let manager = Arc::new(manager(&temp_dir));

        let handles: Vec<ProjectHandle> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || manager.load("shared", None).unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect();

        for handle in &handles[1..] {
            assert!(handle.ptr_eq(&handles[0]));
        }
    }
}
