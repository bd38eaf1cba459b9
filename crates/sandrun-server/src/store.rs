//! Staged scripts: plain `.js` files in one directory.

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::Serialize;

const EXTENSION: &str = ".js";
const MAX_NAME_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid script name '{0}'")]
    InvalidName(String),
    #[error("script '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptInfo {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ScriptStore {
    dir: PathBuf,
}

impl ScriptStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of an existing staged script.
    pub async fn path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let file_name = file_name(name)?;
        let path = self.dir.join(&file_name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(StoreError::NotFound(file_name)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(file_name)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, name: &str, code: &str) -> Result<ScriptInfo, StoreError> {
        let file_name = file_name(name)?;
        tokio::fs::write(self.dir.join(&file_name), code).await?;
        Ok(ScriptInfo {
            name: file_name,
            size: code.len() as u64,
        })
    }

    /// Staged scripts sorted by name.
    pub async fn list(&self) -> Result<Vec<ScriptInfo>, StoreError> {
        let mut scripts = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !file_name(&name).is_ok_and(|normalized| normalized == name) {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                scripts.push(ScriptInfo {
                    name,
                    size: meta.len(),
                });
            }
        }
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scripts)
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let file_name = file_name(name)?;
        match tokio::fs::remove_file(self.dir.join(&file_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(file_name)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Normalized on-disk name: `[A-Za-z0-9_.-]`, no leading dot, always ending
/// in `.js`.
fn file_name(name: &str) -> Result<String, StoreError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if !valid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    if name.ends_with(EXTENSION) {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}{EXTENSION}"))
    }
}
