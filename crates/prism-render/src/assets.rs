// SPDX-License-Identifier: CEPL-1.0
//! File loading for shader blobs and sources.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Full byte contents of `path`. Fails if the file cannot be opened or if
/// fewer bytes are read than its metadata reports.
pub fn read_binary(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let expected = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len() as usize;

    let mut bytes = Vec::with_capacity(expected);
    file.read_to_end(&mut bytes)
        .with_context(|| format!("read {}", path.display()))?;
    if bytes.len() < expected {
        bail!(
            "short read on {}: {} of {} bytes",
            path.display(),
            bytes.len(),
            expected
        );
    }
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "loaded");
    Ok(bytes)
}

/// UTF-8 text contents of `path`.
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = read_binary(path)?;
    String::from_utf8(bytes).with_context(|| format!("{} is not UTF-8", path.display()))
}
