//! Project-relative paths and project identities.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// First segment reserved for backend metadata inside a storage root.
pub const RESERVED_SEGMENT: &str = ".godata";

/// Infix that joins a real file name to the suffix its bytes carry.
///
/// No project path segment may contain it.
pub const SUFFIX_TAG: &str = ".godata.";

/// Maximum byte length of a single path segment.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Collection used when the caller does not name one.
pub const DEFAULT_COLLECTION: &str = "default";

/// A normalized, validated path inside a project.
///
/// Segments are separated by `/`. Leading and trailing slashes are ignored,
/// so `/a/b/` and `a/b` are the same path. The empty path is the root.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ProjectPath {
    segments: Vec<String>,
}

impl ProjectPath {
    /// The project root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and validate a project path.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            validate_segment(raw, segment)?;
            segments.push(segment.to_string());
        }

        if segments[0] == RESERVED_SEGMENT {
            return Err(Error::invalid_path(
                raw,
                format!("`{}` is reserved for storage metadata", RESERVED_SEGMENT),
            ));
        }

        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<ProjectPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append one validated segment.
    pub fn join(&self, segment: &str) -> Result<ProjectPath> {
        let joined = if self.is_root() {
            segment.to_string()
        } else {
            format!("{}/{}", self, segment)
        };
        if segment.contains('/') {
            return Err(Error::invalid_path(joined, "segment contains `/`"));
        }
        validate_segment(&joined, segment)?;
        if self.is_root() && segment == RESERVED_SEGMENT {
            return Err(Error::invalid_path(
                joined,
                format!("`{}` is reserved for storage metadata", RESERVED_SEGMENT),
            ));
        }

        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Append a segment already known to be valid, such as a tree node name.
    pub(crate) fn child(&self, segment: &str) -> ProjectPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// True if `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &ProjectPath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// The path as a relative filesystem path.
    pub fn to_relative_path(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// Relative filesystem path whose file name ends in `.{suffix}`.
    ///
    /// The file name is kept as is when it already has that extension (or
    /// `suffix` is empty); otherwise it becomes `<name>.godata.<suffix>`.
    pub fn to_tagged_relative_path(&self, suffix: &str) -> PathBuf {
        let mut relative = self.to_relative_path();
        if let Some(name) = self.file_name()
            && !suffix.is_empty()
            && Path::new(name).extension().is_none_or(|ext| ext != suffix)
        {
            relative.set_file_name(format!("{}{}{}", name, SUFFIX_TAG, suffix));
        }
        relative
    }

    /// Parse a `/`-separated real relative path produced by
    /// [`to_tagged_relative_path`](Self::to_tagged_relative_path).
    ///
    /// Returns the project path and, for a tagged file name, its suffix.
    pub fn parse_tagged(raw: &str) -> Result<(ProjectPath, Option<String>)> {
        let trimmed = raw.trim_matches('/');
        let (dir, file_name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
        match file_name.rsplit_once(SUFFIX_TAG) {
            Some((name, suffix)) => {
                if suffix.is_empty() {
                    return Err(Error::invalid_path(raw, "empty suffix after tag"));
                }
                validate_segment(raw, suffix)?;
                let path = Self::parse(dir)?.join(name)?;
                Ok((path, Some(suffix.to_string())))
            }
            None => Ok((Self::parse(raw)?, None)),
        }
    }
}

fn validate_segment(raw: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::invalid_path(raw, "empty path segment"));
    }
    if segment == "." || segment == ".." {
        return Err(Error::invalid_path(raw, "relative segments are not allowed"));
    }
    if segment.contains(SUFFIX_TAG) {
        return Err(Error::invalid_path(
            raw,
            format!("segments cannot contain `{}`", SUFFIX_TAG),
        ));
    }
    if segment.contains('\\') || segment.contains('\0') {
        return Err(Error::invalid_path(
            raw,
            "segments cannot contain `\\` or null bytes",
        ));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(Error::invalid_path(
            raw,
            format!(
                "segment too long: {} bytes (max {})",
                segment.len(),
                MAX_SEGMENT_LEN
            ),
        ));
    }
    Ok(())
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl fmt::Debug for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectPath({:?})", self.to_string())
    }
}

/// Identity of a project: `(collection, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId {
    collection: String,
    name: String,
}

impl ProjectId {
    /// Validate both parts and build the identity.
    pub fn new(collection: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        let name = name.into();
        validate_name(&collection)?;
        validate_name(&name)?;
        Ok(Self { collection, name })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hidden projects are those whose name or collection starts with `.`.
    pub fn is_hidden(&self) -> bool {
        is_hidden_name(&self.collection) || is_hidden_name(&self.name)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.name)
    }
}

/// Names starting with `.` are hidden from listings by default.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Validate a project or collection name.
///
/// Names become file names in the backend catalog, so they must not be able
/// to escape it.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name(name, "name cannot be empty"));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(Error::invalid_name(
            name,
            "must not contain `..` or path separators",
        ));
    }
    if name.contains('\0') {
        return Err(Error::invalid_name(name, "must not contain null bytes"));
    }
    if name.len() > MAX_SEGMENT_LEN {
        return Err(Error::invalid_name(
            name,
            format!("too long: {} bytes (max {})", name.len(), MAX_SEGMENT_LEN),
        ));
    }
    Ok(())
}
