use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const MANIFEST_EXTENSION: &str = "cabal";

lazy_static! {
    static ref VERSION_PATTERN: Regex =
        Regex::new(r"(?i)^\s*version\s*:\s*(\S+)").expect("version pattern compiles");
    static ref NAME_PATTERN: Regex =
        Regex::new(r"(?i)^\s*name\s*:\s*(\S+)").expect("name pattern compiles");
}

/// What the manifest declares. Either field is `None` when no line declared
/// it, which is a different situation from not being able to read the file
/// at all (`ManifestError`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read {}: {source}", path.display())]
    Unreadable { path: PathBuf, source: io::Error },
}

impl ManifestMetadata {
    /// First matching line wins for each field.
    pub fn parse(content: &str) -> Self {
        let mut metadata = Self::default();

        for line in content.lines() {
            if metadata.version.is_none() {
                if let Some(captures) = VERSION_PATTERN.captures(line) {
                    metadata.version = Some(captures[1].to_owned());
                    continue;
                }
            }
            if metadata.name.is_none() {
                if let Some(captures) = NAME_PATTERN.captures(line) {
                    metadata.name = Some(captures[1].to_owned());
                }
            }
            if metadata.name.is_some() && metadata.version.is_some() {
                break;
            }
        }

        metadata
    }
}

/// Only I/O failures are errors. Bytes that are not UTF-8 are replaced, so a
/// Latin-1 author line does not hide the version.
pub async fn read_manifest(path: &Path) -> Result<ManifestMetadata, ManifestError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ManifestError::Unreadable {
            path: path.to_owned(),
            source,
        })?;

    Ok(ManifestMetadata::parse(&String::from_utf8_lossy(&bytes)))
}

/// Returns the first file or symlink at the top level of `checkout` with the
/// manifest extension, in directory listing order.
pub async fn locate_manifest(checkout: &Path) -> io::Result<Option<PathBuf>> {
    debug!("Searching for a .{} file in {}", MANIFEST_EXTENSION, checkout.display());

    let mut entries = tokio::fs::read_dir(checkout).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if !(file_type.is_file() || file_type.is_symlink()) {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some(MANIFEST_EXTENSION) {
            return Ok(Some(path));
        }
    }

    Ok(None)
}
