//! Contains a collection of useful utility functions.

use std::any::Any;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::Result;

pub fn read_text_file(path: &Path) -> Result<String> {
    debug!("reading {:?}", path);
    let mut fd = File::open(path)?;
    let mut content = String::new();
    fd.read_to_string(&mut content)?;
    Ok(content)
}

/// Overwrites the file at `path`, going through a sibling temporary file
/// so that a failed write never leaves a truncated document behind.
pub fn write_text_file(path: &Path, content: &str) -> Result<()> {
    let tmp_path = sibling_tmp_path(path);
    {
        let mut fd = File::create(&tmp_path)?;
        fd.write_all(content.as_bytes())?;
        fd.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    debug!("wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Get paths to files with the given extension in the provided directory,
/// sorted by name.
pub fn find_files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(d) => d,
        Err(_) => {
            error!("couldn't read directory at path: {}", dir.to_string_lossy());
            return paths;
        }
    };
    for entry in entries {
        let path = match entry {
            Ok(p) => p.path(),
            _ => continue,
        };
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            paths.push(path);
        }
    }
    paths.sort();
    paths
}

/// Text carried by a panic payload, as given to `panic!`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
