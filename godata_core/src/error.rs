//! Error types for godata_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using godata_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], for callers that only care about
/// what went wrong rather than the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    NotEmpty,
    Stale,
    NoWriterFound,
    NoReaderFound,
    ExportIntegrity,
    PathConflict,
    InvalidPath,
    InvalidName,
    ForceRequired,
    Interrupted,
    Codec,
    Corrupted,
    Io,
}

impl ErrorKind {
    /// Stable lowercase name, used in CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotEmpty => "not_empty",
            ErrorKind::Stale => "stale",
            ErrorKind::NoWriterFound => "no_writer_found",
            ErrorKind::NoReaderFound => "no_reader_found",
            ErrorKind::ExportIntegrity => "export_integrity",
            ErrorKind::PathConflict => "path_conflict",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::InvalidName => "invalid_name",
            ErrorKind::ForceRequired => "force_required",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Codec => "codec",
            ErrorKind::Corrupted => "corrupted",
            ErrorKind::Io => "io",
        }
    }

    /// Process exit code for this kind. Always non-zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::AlreadyExists => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::NotEmpty => 4,
            ErrorKind::Stale => 5,
            ErrorKind::NoWriterFound | ErrorKind::NoReaderFound | ErrorKind::Codec => 6,
            ErrorKind::ExportIntegrity | ErrorKind::Corrupted => 7,
            ErrorKind::PathConflict | ErrorKind::InvalidPath | ErrorKind::InvalidName => 8,
            ErrorKind::ForceRequired => 9,
            ErrorKind::Interrupted => 10,
        }
    }
}

/// Errors that can occur during project operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Manifest or catalog record could not be (de)serialized.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// A project with this identity already exists.
    #[error("Project `{collection}/{name}` already exists")]
    ProjectExists { collection: String, name: String },

    /// No project with this identity is known to the backend.
    #[error("No project named `{name}` in collection `{collection}`")]
    ProjectNotFound { collection: String, name: String },

    /// No collection with this name is known to the backend.
    #[error("No collection named `{collection}`")]
    CollectionNotFound { collection: String },

    /// Nothing (or not the expected kind of node) at a project path.
    #[error("Path `{path}` not found: {reason}")]
    PathNotFound { path: String, reason: String },

    /// Folder has children and removal was not recursive.
    #[error("Folder `{path}` is not empty (use a recursive remove)")]
    NotEmpty { path: String },

    /// The handle's project has been removed.
    #[error("Project `{collection}/{name}` has been removed; this handle is stale")]
    Stale { collection: String, name: String },

    /// No writer registered for a value's shape.
    #[error("No writer found for values of shape `{shape}`; use `link` to add the file instead")]
    NoWriterFound { shape: String },

    /// No reader registered for a file's suffix.
    #[error(
        "No reader found for suffix `{suffix}` (file {path}); use `link` to add the file instead"
    )]
    NoReaderFound { suffix: String, path: PathBuf },

    /// Export produced something other than what was staged.
    #[error("Export integrity check failed at {path}: {reason}")]
    ExportIntegrity { path: PathBuf, reason: String },

    /// A path segment would have to be both a file and a folder.
    #[error("Path conflict at `{path}`: {reason}")]
    PathConflict { path: String, reason: String },

    /// Project path is malformed.
    #[error("Invalid project path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Project or collection name is malformed.
    #[error("Invalid name `{name}`: {reason}")]
    InvalidName { name: String, reason: String },

    /// Destructive operation requested without explicit confirmation.
    #[error("Removing `{collection}/{name}` destroys all of its data; pass force=true to confirm")]
    ForceRequired { collection: String, name: String },

    /// Long-running walk stopped by its cancellation flag.
    #[error("Operation interrupted: {reason}")]
    Interrupted { reason: String },

    /// A reader or writer failed to convert a value.
    #[error("Codec error for shape `{shape}`: {reason}")]
    Codec { shape: String, reason: String },

    /// Backend metadata on disk is unreadable or inconsistent.
    #[error("Corrupted storage at {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Destination path already exists.
    #[error("Path already exists: {path}")]
    PathExists { path: PathBuf },
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. } => ErrorKind::Io,
            Error::Json { .. } | Error::Corrupted { .. } => ErrorKind::Corrupted,
            Error::ProjectExists { .. } | Error::PathExists { .. } => ErrorKind::AlreadyExists,
            Error::ProjectNotFound { .. }
            | Error::CollectionNotFound { .. }
            | Error::PathNotFound { .. } => ErrorKind::NotFound,
            Error::NotEmpty { .. } => ErrorKind::NotEmpty,
            Error::Stale { .. } => ErrorKind::Stale,
            Error::NoWriterFound { .. } => ErrorKind::NoWriterFound,
            Error::NoReaderFound { .. } => ErrorKind::NoReaderFound,
            Error::ExportIntegrity { .. } => ErrorKind::ExportIntegrity,
            Error::PathConflict { .. } => ErrorKind::PathConflict,
            Error::InvalidPath { .. } => ErrorKind::InvalidPath,
            Error::InvalidName { .. } => ErrorKind::InvalidName,
            Error::ForceRequired { .. } => ErrorKind::ForceRequired,
            Error::Interrupted { .. } => ErrorKind::Interrupted,
            Error::Codec { .. } => ErrorKind::Codec,
        }
    }

    /// Create a ProjectExists error.
    pub fn project_exists(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ProjectExists {
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Create a ProjectNotFound error.
    pub fn project_not_found(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ProjectNotFound {
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Create a CollectionNotFound error.
    pub fn collection_not_found(collection: impl Into<String>) -> Self {
        Error::CollectionNotFound {
            collection: collection.into(),
        }
    }

    /// Create a PathNotFound error.
    pub fn path_not_found(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::PathNotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotEmpty error.
    pub fn not_empty(path: impl Into<String>) -> Self {
        Error::NotEmpty { path: path.into() }
    }

    /// Create a Stale error.
    pub fn stale(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Error::Stale {
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Create a NoWriterFound error.
    pub fn no_writer(shape: impl Into<String>) -> Self {
        Error::NoWriterFound {
            shape: shape.into(),
        }
    }

    /// Create a NoReaderFound error.
    pub fn no_reader(suffix: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::NoReaderFound {
            suffix: suffix.into(),
            path: path.into(),
        }
    }

    /// Create an ExportIntegrity error.
    pub fn export_integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::ExportIntegrity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a PathConflict error.
    pub fn path_conflict(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::PathConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidName error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a ForceRequired error.
    pub fn force_required(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ForceRequired {
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Create an Interrupted error.
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Error::Interrupted {
            reason: reason.into(),
        }
    }

    /// Create a Codec error.
    pub fn codec(shape: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Codec {
            shape: shape.into(),
            reason: reason.into(),
        }
    }

    /// Create a Corrupted error.
    pub fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a PathExists error.
    pub fn path_exists(path: impl Into<PathBuf>) -> Self {
        Error::PathExists { path: path.into() }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<tempfile::PathPersistError> for Error {
    fn from(err: tempfile::PathPersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
