//! Portable project archives: a zstd-compressed tar stream.
//!
//! Entries are regular files only, named by their `/`-separated path
//! relative to the archived directory and written in sorted order. Headers
//! carry fixed metadata (mode 0644, mtime 0, uid/gid 0), so archiving the
//! same files twice yields the same entries.

use crate::error::{Error, Result};
use crate::path::ProjectPath;
use std::fs;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// File name suffix of archives.
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

const ZSTD_LEVEL: i32 = 3;
const ENTRY_MODE: u32 = 0o644;

/// Regular files under `dir` in sorted order, with their relative names.
fn sorted_files(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let walker = ignore::WalkBuilder::new(dir)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::invalid_path(entry.path().display().to_string(), e.to_string()))?;

        let mut segments = Vec::new();
        for component in relative.components() {
            let segment = component.as_os_str().to_str().ok_or_else(|| {
                Error::invalid_path(relative.display().to_string(), "name is not valid UTF-8")
            })?;
            segments.push(segment);
        }
        files.push((entry.path().to_path_buf(), segments.join("/")));
    }
    Ok(files)
}

/// Number of regular files under `dir`.
pub fn count_files(dir: &Path) -> Result<usize> {
    Ok(sorted_files(dir)?.len())
}

/// Archive every regular file under `source_dir` into `archive_path`.
///
/// The archive is written to a temp file next to `archive_path` and moved
/// into place once complete. Returns the number of entries.
pub fn write_archive(source_dir: &Path, archive_path: &Path) -> Result<usize> {
    let files = sorted_files(source_dir)?;
    let dir = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp_file = NamedTempFile::new_in(dir)?;
    {
        let encoder = zstd::Encoder::new(temp_file.as_file_mut(), ZSTD_LEVEL)?;
        let mut builder = tar::Builder::new(encoder);

        for (real, name) in &files {
            let file = fs::File::open(real)?;
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(file.metadata()?.len());
            header.set_mode(ENTRY_MODE);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            builder.append_data(&mut header, name, BufReader::new(file))?;
            debug!(entry = %name, "Archived file");
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?.flush()?;
    }
    temp_file.persist(archive_path)?;

    Ok(files.len())
}

/// Entry names of an archive, in archive order, without unpacking.
pub fn archive_entries(archive_path: &Path) -> Result<Vec<String>> {
    let decoder = zstd::Decoder::new(fs::File::open(archive_path)?)?;
    let mut archive = tar::Archive::new(decoder);

    let mut names = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.header().entry_type().is_file() {
            let (path, suffix) = entry_name(archive_path, &entry)?;
            names.push(tagged_name(&path, suffix.as_deref()));
        }
    }
    Ok(names)
}

/// Validated project path and suffix tag of an entry.
fn entry_name<R: std::io::Read>(
    archive_path: &Path,
    entry: &tar::Entry<'_, R>,
) -> Result<(ProjectPath, Option<String>)> {
    let path = entry.path()?;
    let raw = path.to_str().ok_or_else(|| {
        Error::corrupted(archive_path, format!("entry name is not valid UTF-8: {}", path.display()))
    })?;
    let (name, suffix) = ProjectPath::parse_tagged(raw)
        .map_err(|e| Error::corrupted(archive_path, format!("unsafe entry name: {}", e)))?;
    if name.is_root() {
        return Err(Error::corrupted(archive_path, "entry with an empty name"));
    }
    Ok((name, suffix))
}

fn tagged_name(path: &ProjectPath, suffix: Option<&str>) -> String {
    path.to_tagged_relative_path(suffix.unwrap_or_default())
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A file written by [`unpack_archive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedFile {
    /// Project path the file belongs at.
    pub path: ProjectPath,
    /// Real location relative to the unpack destination.
    pub relative: PathBuf,
}

/// Unpack regular-file entries of `archive_path` under `dest`.
///
/// Every entry name must be a valid, possibly tagged, project path; anything
/// else is rejected before it is written. Existing files are never
/// overwritten. Returns the unpacked files in archive order.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<Vec<UnpackedFile>> {
    let decoder = zstd::Decoder::new(fs::File::open(archive_path)?)?;
    let mut archive = tar::Archive::new(decoder);

    let mut unpacked = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }
        if !entry_type.is_file() {
            return Err(Error::corrupted(
                archive_path,
                format!("unsupported entry type {:?}", entry_type),
            ));
        }

        let (path, suffix) = entry_name(archive_path, &entry)?;
        let relative = path.to_tagged_relative_path(suffix.as_deref().unwrap_or_default());
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::path_exists(target));
            }
            Err(e) => return Err(e.into()),
        };
        std::io::copy(&mut entry, &mut out)?;
        debug!(entry = %path, "Unpacked file");
        unpacked.push(UnpackedFile { path, relative });
    }
    Ok(unpacked)
}
