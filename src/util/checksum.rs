use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{DotsmithError, Result};

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(DotsmithError::IoError)?;

    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];
    loop {
        let count = file.read(&mut buffer).map_err(DotsmithError::IoError)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash of the observable content at `path`. Symlinks hash the target path
/// string, not the dereferenced content, so a link that legitimately dangles
/// on another host still compares stable. A missing path is reported as
/// `NotFound`, distinct from other I/O failures.
pub fn file_hash(path: &Path) -> Result<String> {
    let meta = path
        .symlink_metadata()
        .map_err(|_| DotsmithError::NotFound(path.to_path_buf()))?;

    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(path)?;
        Ok(sha256_bytes(target.to_string_lossy().as_bytes()))
    } else {
        sha256_file(path)
    }
}

/// Hash of the full module directory: every regular file, in sorted
/// relative-path order, contributing `rel_path 0x00 file_bytes 0x00`.
/// Any change to the manifest, a script, or a bundled file changes the sum.
pub fn module_checksum(module_dir: &Path) -> Result<String> {
    let mut files: Vec<(String, std::path::PathBuf)> = Vec::new();

    for entry in walkdir::WalkDir::new(module_dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            DotsmithError::StateError(format!("walking {}: {}", module_dir.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(module_dir)
            .expect("walkdir yields paths under its root")
            .to_string_lossy()
            .into_owned();
        files.push((rel, entry.path().to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (rel, path) in files {
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(&path)?);
        hasher.update([0u8]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash of a module's configuration subtree: canonical serialisation with
/// keys sorted lexicographically and no whitespace. An absent subtree hashes
/// to the hash of the empty string.
pub fn config_hash(subtree: &serde_yaml::Value) -> String {
    if subtree.is_null() {
        return sha256_bytes(b"");
    }
    let mut out = String::new();
    canonicalize(subtree, &mut out);
    sha256_bytes(out.as_bytes())
}

fn canonicalize(value: &serde_yaml::Value, out: &mut String) {
    use serde_yaml::Value;
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialisation"))
        }
        Value::Sequence(seq) => {
            out.push('[');
            for (i, item) in seq.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        Value::Mapping(map) => {
            let mut entries: Vec<(String, &Value)> =
                map.iter().map(|(k, v)| (format_key(k), v)).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            out.push('{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialisation"));
                out.push(':');
                canonicalize(value, out);
            }
            out.push('}');
        }
        Value::Tagged(tagged) => canonicalize(&tagged.value, out),
    }
}

fn format_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}
