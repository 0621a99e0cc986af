//! BEAM-DIMAP products (`<prefix>.dim` + `<prefix>.data/`) and output checks

use crate::types::{SarError, SarResult};
use gdal::Dataset;
use std::path::{Path, PathBuf};

const MIB: u64 = 1_048_576;
/// Minimum size of a `.dim` header and of each `.img` band
pub const MIN_DIMAP_BYTES: u64 = MIB;
/// Minimum size of an exported GeoTIFF
pub const MIN_TIFF_BYTES: u64 = MIB * 3 / 10;

/// Append an extension without replacing an existing one (`a.bs` -> `a.bs.dim`)
pub fn with_added_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// A DIMAP product addressed by its path prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimapProduct {
    prefix: PathBuf,
}

impl DimapProduct {
    pub fn new<P: AsRef<Path>>(prefix: P) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
        }
    }

    /// Product from the path of its `.dim` file
    pub fn from_dim<P: AsRef<Path>>(dim: P) -> Self {
        let dim = dim.as_ref();
        let prefix = match dim.extension().and_then(|e| e.to_str()) {
            Some("dim") => dim.with_extension(""),
            _ => dim.to_path_buf(),
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn name(&self) -> String {
        self.prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn dim(&self) -> PathBuf {
        with_added_extension(&self.prefix, "dim")
    }

    pub fn data_dir(&self) -> PathBuf {
        with_added_extension(&self.prefix, "data")
    }

    pub fn exists(&self) -> bool {
        self.dim().is_file() && self.data_dir().is_dir()
    }

    /// Band images inside the `.data` directory, sorted by name
    pub fn images(&self) -> SarResult<Vec<PathBuf>> {
        let mut images = Vec::new();
        for entry in std::fs::read_dir(self.data_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("img") {
                images.push(path);
            }
        }
        images.sort();
        Ok(images)
    }

    /// Image of a band whose file name starts with `band_prefix`
    pub fn find_image(&self, band_prefix: &str) -> SarResult<Option<PathBuf>> {
        Ok(self.images()?.into_iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(band_prefix))
                .unwrap_or(false)
        }))
    }

    /// Remove both parts; missing parts are fine
    pub fn delete(&self) -> SarResult<()> {
        match std::fs::remove_file(self.dim()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match std::fs::remove_dir_all(self.data_dir()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Move the product to a new prefix, replacing what is there.
    ///
    /// Band references in the header are rewritten to the new `.data` name.
    pub fn move_to<P: AsRef<Path>>(&self, new_prefix: P) -> SarResult<DimapProduct> {
        let target = DimapProduct::new(new_prefix);
        if target == *self {
            return Ok(target);
        }
        target.delete()?;
        if let Some(parent) = target.prefix.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let old_data_name = format!("{}.data", self.name());
        let new_data_name = format!("{}.data", target.name());

        move_path(&self.data_dir(), &target.data_dir())?;
        let header = std::fs::read_to_string(self.dim())?;
        std::fs::write(target.dim(), header.replace(&old_data_name, &new_data_name))?;
        std::fs::remove_file(self.dim())?;

        log::debug!("Moved {} to {}", self.prefix.display(), target.prefix.display());
        Ok(target)
    }
}

/// Rename, falling back to copy + delete across file systems
fn move_path(from: &Path, to: &Path) -> SarResult<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    copy_dir(from, to)?;
    std::fs::remove_dir_all(from)?;
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> SarResult<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

/// Basic statistics of a raster layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl LayerStats {
    /// A usable layer has a non-zero mean, spread and range
    pub fn is_valid(&self) -> bool {
        self.mean != 0.0 && self.std_dev != 0.0 && (self.max - self.min) != 0.0
    }
}

/// Approximate statistics of the first band of a raster
pub fn layer_stats(path: &Path) -> SarResult<LayerStats> {
    let dataset = Dataset::open(path)?;
    let band = dataset.rasterband(1)?;
    let stats = band
        .get_statistics(true, true)?
        .ok_or_else(|| SarError::NotValidFile(format!("No statistics for {}", path.display())))?;
    Ok(LayerStats {
        min: stats.min,
        max: stats.max,
        mean: stats.mean,
        std_dev: stats.std_dev,
    })
}

fn check_size(path: &Path, min_bytes: u64) -> SarResult<()> {
    let size = std::fs::metadata(path)?.len();
    if size < min_bytes {
        return Err(SarError::NotValidFile(format!(
            "{} is only {} bytes",
            path.display(),
            size
        )));
    }
    Ok(())
}

fn check_stats(path: &Path) -> SarResult<()> {
    let stats = layer_stats(path)?;
    if !stats.is_valid() {
        return Err(SarError::NotValidFile(format!(
            "{} has degenerate statistics {:?}",
            path.display(),
            stats
        )));
    }
    Ok(())
}

/// Verify a DIMAP product written by gpt
pub fn check_out_dimap(product: &DimapProduct, test_stats: bool) -> SarResult<()> {
    if !product.dim().is_file() || !product.data_dir().is_dir() {
        return Err(SarError::NotValidFile(format!(
            "{} is incomplete",
            product.prefix().display()
        )));
    }
    check_size(&product.dim(), MIN_DIMAP_BYTES)?;

    for image in product.images()? {
        check_size(&image, MIN_DIMAP_BYTES)?;
        if test_stats {
            check_stats(&image)?;
        }
    }
    Ok(())
}

/// Verify an exported GeoTIFF
pub fn check_out_tiff(path: &Path, test_stats: bool) -> SarResult<()> {
    if !path.is_file() {
        return Err(SarError::NotValidFile(format!("{} does not exist", path.display())));
    }
    check_size(path, MIN_TIFF_BYTES)?;
    if test_stats {
        check_stats(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_product(prefix: &Path, dim_bytes: usize, img_bytes: usize) -> DimapProduct {
        let product = DimapProduct::new(prefix);
        std::fs::create_dir_all(product.data_dir()).unwrap();
        let header = format!(
            "<Dimap_Document><DATA_FILE_PATH href=\"{}.data/Gamma0_VV.hdr\"/>{}</Dimap_Document>",
            product.name(),
            " ".repeat(dim_bytes)
        );
        std::fs::write(product.dim(), header).unwrap();
        std::fs::write(product.data_dir().join("Gamma0_VV.img"), vec![1u8; img_bytes]).unwrap();
        product
    }

    #[test]
    fn prefix_paths() {
        let product = DimapProduct::from_dim("/tmp/x/20200101_117.bs.dim");
        assert_eq!(product.prefix(), Path::new("/tmp/x/20200101_117.bs"));
        assert_eq!(product.data_dir(), PathBuf::from("/tmp/x/20200101_117.bs.data"));
        assert_eq!(product.name(), "20200101_117.bs");
    }

    #[test]
    fn move_rewrites_band_references() {
        let dir = tempfile::tempdir().unwrap();
        let src = fake_product(&dir.path().join("temp").join("scene.TC"), 10, 10);
        let moved = src.move_to(dir.path().join("out").join("scene.bs")).unwrap();

        assert!(!src.exists());
        assert!(moved.exists());
        let header = std::fs::read_to_string(moved.dim()).unwrap();
        assert!(header.contains("scene.bs.data/Gamma0_VV.hdr"));
        assert_eq!(moved.images().unwrap().len(), 1);
        assert!(moved.find_image("Gamma0").unwrap().is_some());
    }

    #[test]
    fn small_products_fail_the_check() {
        let dir = tempfile::tempdir().unwrap();
        let product = fake_product(&dir.path().join("small"), 10, 10);
        assert!(matches!(
            check_out_dimap(&product, false),
            Err(SarError::NotValidFile(_))
        ));

        let product = fake_product(&dir.path().join("large"), MIN_DIMAP_BYTES as usize, MIN_DIMAP_BYTES as usize);
        check_out_dimap(&product, false).unwrap();

        product.delete().unwrap();
        assert!(!product.exists());
        product.delete().unwrap();
    }

    #[test]
    fn degenerate_stats() {
        let flat = LayerStats { min: 1.0, max: 1.0, mean: 1.0, std_dev: 0.0 };
        assert!(!flat.is_valid());
        let ok = LayerStats { min: 0.0, max: 2.0, mean: 1.0, std_dev: 0.5 };
        assert!(ok.is_valid());
    }
}
