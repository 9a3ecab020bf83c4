//! `--file`/`--env` argument processing: reading and base64-packaging files
//! for `options.files`, and resolving `--env` entries against the current
//! process environment.

use anyhow::Result;
use dwq_base::FileSpec;
use dwq_util::fs::Fs;
use std::collections::BTreeMap;

/// Read and base64-encode every `--file` argument. A `path:destpath` entry
/// packages `path`'s contents under `destpath` in the job's working
/// directory; a bare `path` uses the same path as its own destination.
pub fn gen_file_data(files: &[String]) -> Result<Vec<FileSpec>> {
    files.iter().map(|entry| gen_one(entry)).collect()
}

fn gen_one(entry: &str) -> Result<FileSpec> {
    let (src, dest) = match entry.split_once(':') {
        Some((src, dest)) => (src, dest),
        None => (entry, entry),
    };
    let data = Fs::new().read(src)?;
    let mode = file_mode(src).unwrap_or(0o644);
    Ok(FileSpec::from_bytes(dest, mode, &data))
}

#[cfg(unix)]
fn file_mode(path: &str) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn file_mode(_path: &str) -> Option<u32> {
    None
}

/// Resolve `--env` entries: `VAR=value` is taken literally, a bare `VAR`
/// inherits from this process's environment (and is dropped if unset).
pub fn resolve_env(entries: &[String]) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((var, val)) => {
                result.insert(var.to_owned(), val.to_owned());
            }
            None => {
                if let Ok(val) = std::env::var(entry) {
                    result.insert(entry.clone(), val);
                }
            }
        }
    }
    result
}
