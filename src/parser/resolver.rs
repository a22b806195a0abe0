//! Opening external entities and DTD subsets.
//!
//! The parser never touches the filesystem directly. It asks a
//! [`ResourceResolver`] for the bytes behind an external identifier, trying
//! the public identifier first (a local copy named after it) and falling
//! back to the system identifier.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::dtd::ExternalId;

/// The bytes of an external resource and the name errors should report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Raw, undecoded content.
    pub bytes: Vec<u8>,
    /// File name or URI of the resource; becomes the source name of
    /// positions inside it.
    pub location: String,
}

/// Capability to open external resources by identifier.
///
/// Implementations must be shareable across threads because
/// [`ParseOptions`](crate::parser::ParseOptions) is.
pub trait ResourceResolver: Send + Sync {
    /// Opens the resource named by `system_id`, resolved against `base`
    /// (the source name of the document or entity that referenced it).
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the resource cannot be read.
    fn open_system(&self, system_id: &str, base: Option<&str>) -> io::Result<Resource>;

    /// Returns a local copy of the resource for `public_id`, if one is
    /// available. The default has none.
    fn open_public(&self, public_id: &str) -> Option<Resource> {
        let _ = public_id;
        None
    }

    /// Opens `id`: a local public-identifier copy when available, else the
    /// system identifier.
    ///
    /// # Errors
    ///
    /// Fails if there is no local copy and the system identifier is missing
    /// or cannot be read.
    fn open(&self, id: &ExternalId, base: Option<&str>) -> io::Result<Resource> {
        if let Some(resource) = id.public_id.as_deref().and_then(|p| self.open_public(p)) {
            tracing::debug!(public_id = ?id.public_id, location = %resource.location, "using local copy");
            return Ok(resource);
        }
        match id.system_id.as_deref() {
            Some(system) => self.open_system(system, base),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no local resource for {id} and no system identifier"),
            )),
        }
    }
}

/// Derives the local file name for a public identifier: every character
/// that is not allowed in file names becomes `_`. No extension is added.
///
/// ```
/// use tidyxml::parser::local_resource_name;
///
/// assert_eq!(
///     local_resource_name("-//W3C//DTD XHTML 1.0 Strict//EN"),
///     "-__W3C__DTD XHTML 1.0 Strict__EN"
/// );
/// ```
#[must_use]
pub fn local_resource_name(public_id: &str) -> String {
    public_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Resolves identifiers against the local filesystem.
///
/// Relative system identifiers resolve against the referencing source: its
/// directory when it names a file, itself when it names a directory, else
/// `base_dir`. Public identifiers are looked up in `local_dir` under
/// [`local_resource_name`]. Network URIs are not fetched.
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    base_dir: Option<PathBuf>,
    local_dir: Option<PathBuf>,
}

impl FileResolver {
    /// Creates a resolver with no base or local directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory relative system identifiers resolve against when
    /// the referencing source has no directory of its own.
    #[must_use]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Sets the directory holding local copies named after public
    /// identifiers.
    #[must_use]
    pub fn local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }

    fn resolve_path(&self, system_id: &str, base: Option<&str>) -> io::Result<PathBuf> {
        if system_id.starts_with("http://") || system_id.starts_with("https://") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("network access is disabled: {system_id}"),
            ));
        }
        let path = Path::new(system_id.strip_prefix("file://").unwrap_or(system_id));
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let base_dir = base
            .map(Path::new)
            .and_then(|b| if b.is_dir() { Some(b) } else { b.parent().filter(|_| b.is_file()) })
            .or(self.base_dir.as_deref());
        Ok(match base_dir {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        })
    }
}

impl ResourceResolver for FileResolver {
    fn open_system(&self, system_id: &str, base: Option<&str>) -> io::Result<Resource> {
        let path = self.resolve_path(system_id, base)?;
        let bytes = fs::read(&path)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
        Ok(Resource {
            bytes,
            location: path.display().to_string(),
        })
    }

    fn open_public(&self, public_id: &str) -> Option<Resource> {
        let path = self.local_dir.as_ref()?.join(local_resource_name(public_id));
        let bytes = fs::read(&path).ok()?;
        Some(Resource {
            bytes,
            location: path.display().to_string(),
        })
    }
}
