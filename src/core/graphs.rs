//! SNAP processing graphs shipped with the crate

use crate::io::write_atomic;
use crate::types::SarResult;
use std::path::{Path, PathBuf};

/// Graph XML files compiled into the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Graph {
    /// Read, orbit file, thermal noise removal
    GrdImport,
    /// Same as `GrdImport` with a geographic subset after reading
    GrdImportSubset,
    /// Layover/shadow mask in map geometry
    LsMask,
    /// Co-registered stack of one polarisation
    BackscatterStack,
    /// Co-registered stack of bands matching a pattern
    BandPatternStack,
}

impl Graph {
    pub fn file_name(&self) -> &'static str {
        match self {
            Graph::GrdImport => "grd_import.xml",
            Graph::GrdImportSubset => "grd_import_subset.xml",
            Graph::LsMask => "ls_mask.xml",
            Graph::BackscatterStack => "bs_stacking.xml",
            Graph::BandPatternStack => "bs_stacking_pattern.xml",
        }
    }

    pub fn xml(&self) -> &'static str {
        match self {
            Graph::GrdImport => include_str!("../../graphs/grd_import.xml"),
            Graph::GrdImportSubset => include_str!("../../graphs/grd_import_subset.xml"),
            Graph::LsMask => include_str!("../../graphs/ls_mask.xml"),
            Graph::BackscatterStack => include_str!("../../graphs/bs_stacking.xml"),
            Graph::BandPatternStack => include_str!("../../graphs/bs_stacking_pattern.xml"),
        }
    }

    /// Path the graph is written to below `dir`, without touching the disk
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join("graphs").join(self.file_name())
    }

    /// Write the graph below `dir` unless an identical copy is there already.
    ///
    /// Parallel jobs share the directory, so the file is swapped in whole.
    pub fn materialize(&self, dir: &Path) -> SarResult<PathBuf> {
        let path = self.path_in(dir);
        let current = std::fs::read_to_string(&path).ok();
        if current.as_deref() != Some(self.xml()) {
            write_atomic(&path, self.xml().as_bytes())?;
            log::debug!("Wrote graph {}", path.display());
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphs_reference_their_parameters() {
        assert!(Graph::GrdImport.xml().contains("$polarisation"));
        assert!(Graph::GrdImportSubset.xml().contains("$region"));
        assert!(Graph::LsMask.xml().contains("$projection"));
        assert!(Graph::BackscatterStack.xml().contains("$pol"));
        assert!(Graph::BandPatternStack.xml().contains("$bandPattern"));
    }

    #[test]
    fn materialize_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = Graph::LsMask.materialize(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), Graph::LsMask.xml());
        assert_eq!(Graph::LsMask.materialize(dir.path()).unwrap(), path);
    }

    #[test]
    fn concurrent_materialize_never_exposes_partial_graphs() {
        let dir = tempfile::tempdir().unwrap();
        let path = Graph::BackscatterStack.path_in(dir.path());
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        Graph::BackscatterStack.materialize(dir.path()).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..200 {
                    if let Ok(xml) = std::fs::read_to_string(&path) {
                        assert_eq!(xml, Graph::BackscatterStack.xml());
                    }
                }
            });
        });
    }
}
