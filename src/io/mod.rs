//! I/O modules for scene identifiers, SAFE manifests, downloads and STAC

pub mod scene;
pub mod manifest;
pub mod download;
pub mod stac;

pub use scene::{SceneInfo, Sentinel1Scene};
pub use manifest::SafeManifest;
pub use download::{Credentials, Downloader, Mirror};

use crate::types::{SarError, SarResult};
use std::io::Write;
use std::path::Path;

/// Replace `path` with `contents` so concurrent readers never see a partial file
pub fn write_atomic(path: &Path, contents: &[u8]) -> SarResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(contents)?;
    file.flush()?;
    file.persist(path).map_err(|e| SarError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("extent.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        // no leftovers from the temporary files
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
