//! Local filesystem storage for uploaded files.
//!
//! Uploads land in a hidden partial file next to their destination and are
//! renamed into place only once the transfer has been validated, so a listing
//! never shows a half-written file. Two uploads of the same name race and the
//! last rename wins.

use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use tokio::fs::{self, File};

use crate::{Error, Result};

/// Reject names that are empty, hidden, or could escape the storage root.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidFilename(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(Error::Storage)
    }

    /// Names of stored files, sorted. Hidden entries and directories are skipped.
    pub async fn list(&self) -> Result<Vec<String>> {
        let unavailable = |e: io::Error| Error::DirectoryUnavailable(format!("{}: {e}", self.root.display()));

        let mut entries = fs::read_dir(&self.root).await.map_err(unavailable)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => names.push(name),
                Ok(_) => {}
                Err(e) => warn!("Skipping {name} in listing: {e}"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Open a stored file for reading, returning it with its length.
    pub async fn open_read(&self, name: &str) -> Result<(File, u64)> {
        validate_name(name)?;
        let path = self.root.join(name);
        let file = File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::FileNotFound(name.to_string()),
            _ => Error::Storage(e),
        })?;
        let meta = file.metadata().await.map_err(Error::Storage)?;
        if !meta.is_file() {
            return Err(Error::FileNotFound(name.to_string()));
        }
        Ok((file, meta.len()))
    }

    /// Start writing `name`. `tag` keeps concurrent uploads of one name apart.
    pub async fn create_partial(&self, name: &str, tag: u32) -> Result<PartialFile> {
        validate_name(name)?;
        let temp = self.root.join(format!(".{name}.{tag}.part"));
        let file = File::create(&temp).await.map_err(Error::Storage)?;
        Ok(PartialFile {
            file,
            temp: Some(temp),
            dest: self.root.join(name),
        })
    }
}

/// An upload in progress. Dropped without [`PartialFile::commit`], the
/// partial data is deleted.
#[derive(Debug)]
pub struct PartialFile {
    file: File,
    temp: Option<PathBuf>,
    dest: PathBuf,
}

impl PartialFile {
    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    pub async fn commit(mut self) -> Result<()> {
        self.file.sync_all().await.map_err(Error::Storage)?;
        if let Some(temp) = self.temp.take() {
            if let Err(e) = fs::rename(&temp, &self.dest).await {
                let _ = fs::remove_file(&temp).await;
                return Err(Error::Storage(e));
            }
        }
        Ok(())
    }

    pub async fn discard(mut self) {
        if let Some(temp) = self.temp.take() {
            if let Err(e) = fs::remove_file(&temp).await {
                warn!("Failed to remove partial upload {}: {e}", temp.display());
            }
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            let _ = std::fs::remove_file(temp);
        }
    }
}

/// Create the per-handle directory under `root`.
pub async fn create_user_dir(root: &Path, handle: &str) -> Result<PathBuf> {
    validate_name(handle)?;
    let dir = root.join(handle);
    fs::create_dir_all(&dir).await.map_err(Error::Storage)?;
    Ok(dir)
}
