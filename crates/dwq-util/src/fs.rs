//! A thin wrapper around [`std::fs`] that attaches the path to every error,
//! the way every call site in this codebase wants it without repeating
//! `.with_context(|| ...)` everywhere.

use anyhow::{Context as _, Result};
use std::path::Path;

#[derive(Clone, Copy, Default)]
pub struct Fs;

impl Fs {
    pub fn new() -> Self {
        Self
    }

    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).with_context(|| format!("creating directory {path:?}"))
    }

    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing directory {path:?}")),
        }
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = path.as_ref();
        std::fs::read(path).with_context(|| format!("reading file {path:?}"))
    }

    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, contents).with_context(|| format!("writing file {path:?}"))
    }

    #[cfg(unix)]
    pub fn set_mode(&self, path: impl AsRef<Path>, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt as _;
        let path = path.as_ref();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("setting mode of {path:?}"))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        let path = dir.path().join("a/b/c.txt");
        fs.create_dir_all(path.parent().unwrap()).unwrap();
        fs.write(&path, b"hello").unwrap();
        assert_eq!(fs.read(&path).unwrap(), b"hello");
    }

    #[test]
    fn remove_dir_all_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        fs.remove_dir_all(dir.path().join("does-not-exist")).unwrap();
    }
}
