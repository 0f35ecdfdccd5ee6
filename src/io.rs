//! Root-relative file system access for a dataset directory

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// File system access rooted at a dataset directory.
///
/// All paths are relative to the root and use `/` separators, matching the
/// relative file names stored in the dataset index.
#[derive(Debug, Clone)]
pub struct DatasetFs {
    base_path: PathBuf,
}

impl DatasetFs {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.base_path
    }

    /// Get the full path for a relative path
    pub fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            return self.base_path.clone();
        }
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.base_path.clone(), |acc, part| acc.join(part))
    }

    pub fn root_exists(&self) -> bool {
        self.base_path.exists()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.full_path(path).exists()
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.full_path(path).is_file()
    }

    pub fn read_to_string(&self, path: &str) -> Result<String> {
        Ok(fs::read_to_string(self.full_path(path))?)
    }

    /// Create a directory (and its parents) relative to the root
    pub fn create_dir_all(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.full_path(path))?;
        Ok(())
    }

    /// Names of plain files directly inside `dir`
    pub fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        self.list(dir, |ty| ty.is_file())
    }

    /// Names of subdirectories directly inside `dir`, sorted
    pub fn list_dirs(&self, dir: &str) -> Result<Vec<String>> {
        let mut dirs = self.list(dir, |ty| ty.is_dir())?;
        dirs.sort();
        Ok(dirs)
    }

    fn list(&self, dir: &str, keep: impl Fn(&fs::FileType) -> bool) -> Result<Vec<String>> {
        let full_path = self.full_path(dir);
        let mut entries = Vec::new();

        if full_path.is_dir() {
            for entry in fs::read_dir(&full_path)? {
                let entry = entry?;
                if !keep(&entry.file_type()?) {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    entries.push(name.to_string());
                }
            }
        }

        Ok(entries)
    }

    /// Size of the file at `path` in bytes
    pub fn size(&self, path: &str) -> Result<usize> {
        Ok(fs::metadata(self.full_path(path))?.len() as usize)
    }
}

/// Join a position directory and a file name into a relative path
pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
