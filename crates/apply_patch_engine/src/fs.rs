use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// File access used while applying a patch.
///
/// Paths are passed exactly as they appear in the patch text; implementations
/// decide how to resolve them.
pub trait PatchFs {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()>;
    fn remove(&mut self, path: &Path) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

/// Real filesystem, resolving relative paths against an optional workdir.
#[derive(Debug, Clone, Default)]
pub struct DiskFs {
    workdir: Option<PathBuf>,
}

impl DiskFs {
    pub fn new(workdir: Option<&Path>) -> Self {
        Self {
            workdir: workdir.map(Path::to_path_buf),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workdir {
            Some(workdir) if path.is_relative() => workdir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl PatchFs for DiskFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(path))
    }

    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(resolved, contents)
    }

    fn remove(&mut self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(self.resolve(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }
}

/// In-memory file map, used by tests and dry runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFs {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryFs {
    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(path.as_ref()).map(String::as_str)
    }
}

impl PatchFs for MemoryFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )
        })
    }

    fn write(&mut self, path: &Path, contents: &str) -> io::Result<()> {
        self.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> io::Result<()> {
        self.files.remove(path).map(|_| ()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}
