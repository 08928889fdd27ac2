//! # Godata Core
//!
//! A project manager for data files, addressed by project-relative paths.
//!
//! A project is a named tree of folders and files kept in its own storage
//! root. Values are stored through a codec registry that picks a writer by
//! the value's shape and a reader by the file's suffix. Existing files can be
//! linked in place. Whole projects export to a portable `.tar.zst` archive
//! and import back.
//!
//! ## Features
//!
//! - Project lifecycle with an explicit [`ProjectManager`] and shared handles
//! - Shape-keyed writers and suffix-keyed readers, replaceable at runtime
//! - Content-addressed internal storage with garbage collection
//! - Deterministic export archives and import
//!
//! ## Example
//!
//! ```no_run
//! use godata_core::{ExportOptions, ProjectManager, ProjectTree, Retrieved, Value};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ProjectManager::open_local("./godata-home")?;
//! let project = manager.create("survey", None)?;
//!
//! // Store a value and an existing file
//! project.store(&Value::from("observing notes"), "notes/night1")?;
//! project.link(Path::new("./scan.fits"), "raw/scan.fits")?;
//!
//! // Read the value back
//! if let Retrieved::Value(value) = project.get("notes/night1", false)? {
//!     println!("{:?}", value);
//! }
//!
//! // Export to ./survey.tar.zst
//! let archive = manager.export("survey", None, &ExportOptions::default().output_dir("."))?;
//! println!("Exported to {}", archive.display());
//! # Ok(())
//! # }
//! ```

mod archive;
mod backend;
mod codec;
mod error;
mod gc;
mod hash;
mod local;
mod manager;
mod path;
mod project;
mod transfer;
mod tree;
mod value;

pub use archive::{ARCHIVE_EXTENSION, archive_entries};
pub use backend::{Fill, ProjectStorage, StorageBackend};
pub use codec::{CodecRegistry, ReadFn, Reader, WriteFn, Writer};
pub use error::{Error, ErrorKind, Result};
pub use gc::GcStats;
pub use hash::{Algorithm, Hash};
pub use local::{LocalBackend, LocalProject, ProjectRecord};
pub use manager::ProjectManager;
pub use path::{DEFAULT_COLLECTION, ProjectId, ProjectPath, SUFFIX_TAG};
pub use project::{ProjectHandle, ProjectTree, Retrieved};
pub use transfer::{ExportOptions, SCRATCH_COLLECTION};
pub use tree::{FileRecord, Listing, Location, NodeId, NodeKind, ROOT, Tree};
pub use value::{CustomValue, Shape, Value};
