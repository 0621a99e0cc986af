//! Raster helpers: value conversions on ndarray arrays and GeoTIFF export
//!
//! GeoTIFFs are written through the `gdal` crate. Clipping and virtual
//! mosaics go through the GDAL command line tools.

use crate::config::OutputDtype;
use crate::core::dimap::DimapProduct;
use crate::core::gpt::run_command;
use crate::types::{Polarization, SarError, SarResult};
use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::{Array2, Zip};
use std::path::{Path, PathBuf};

/// Smallest power value before the logarithm (-130 dB)
const MIN_POWER: f32 = 1e-13;
/// Replacement for negative power values
const NEGATIVE_POWER: f32 = 1e-7;

/// Convert linear power to decibel in place. NaN stays NaN.
pub fn convert_to_db(array: &mut Array2<f32>) {
    array.mapv_inplace(|v| {
        if v.is_nan() {
            return v;
        }
        let v = if v < 0.0 { NEGATIVE_POWER } else { v };
        10.0 * v.max(MIN_POWER).log10()
    });
}

fn display_max(dtype: OutputDtype) -> SarResult<f32> {
    match dtype {
        OutputDtype::Uint8 => Ok(255.0),
        OutputDtype::Uint16 => Ok(65535.0),
        OutputDtype::Float32 => Err(SarError::Processing(
            "Integer scaling needs uint8 or uint16 output".to_string(),
        )),
    }
}

/// Linear stretch of `[min, max]` onto `[1, 255]` or `[1, 65535]`.
///
/// Values outside the range are clipped, NaN becomes 0. The result holds
/// integral values ready to be written with `dtype`.
pub fn scale_to_int(array: &Array2<f32>, min: f32, max: f32, dtype: OutputDtype) -> SarResult<Array2<f32>> {
    let display_max = display_max(dtype)?;
    let display_min = 1.0;
    let a = min - (max - min) / (display_max - display_min);
    let x = (max - min) / (display_max - 1.0);

    Ok(array.mapv(|v| {
        if v.is_nan() {
            return 0.0;
        }
        let stretched = (v.clamp(min, max) - a) / x;
        stretched.round()
    }))
}

/// Inverse of a -30..5 dB integer stretch; 0 becomes NaN
pub fn rescale_to_float(array: &Array2<f32>, dtype: OutputDtype) -> SarResult<Array2<f32>> {
    let a = match dtype {
        OutputDtype::Uint8 => 35.0 / 254.0,
        OutputDtype::Uint16 => 35.0 / 65535.0,
        OutputDtype::Float32 => {
            return Err(SarError::Processing(
                "Rescaling needs uint8 or uint16 input".to_string(),
            ))
        }
    };
    let b = -30.0 - a;
    Ok(array.mapv(|v| if v == 0.0 { f32::NAN } else { v * a + b }))
}

/// Replace NaN by 0
pub fn nan_to_zero(array: &mut Array2<f32>) {
    array.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });
}

/// Axis-aligned extent in the raster's coordinate system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let b = Bounds {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        };
        if b.min_x < b.max_x && b.min_y < b.max_y {
            Some(b)
        } else {
            None
        }
    }
}

/// Georeferencing of a raster
#[derive(Debug, Clone, PartialEq)]
pub struct GeoReference {
    pub geo_transform: [f64; 6],
    pub projection: String,
    /// (columns, rows)
    pub size: (usize, usize),
}

impl GeoReference {
    pub fn from_dataset(dataset: &Dataset) -> SarResult<Self> {
        Ok(Self {
            geo_transform: dataset.geo_transform()?,
            projection: dataset.projection(),
            size: dataset.raster_size(),
        })
    }

    pub fn open(path: &Path) -> SarResult<Self> {
        let dataset = Dataset::open(path)?;
        Self::from_dataset(&dataset)
    }

    pub fn bounds(&self) -> Bounds {
        let gt = &self.geo_transform;
        let (cols, rows) = self.size;
        let x0 = gt[0];
        let x1 = gt[0] + gt[1] * cols as f64 + gt[2] * rows as f64;
        let y0 = gt[3];
        let y1 = gt[3] + gt[4] * cols as f64 + gt[5] * rows as f64;
        Bounds {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }
}

/// Read `rows` rows of a band starting at `row_offset`
pub fn read_rows(dataset: &Dataset, band_index: isize, row_offset: usize, rows: usize) -> SarResult<Array2<f32>> {
    let band = dataset.rasterband(band_index)?;
    let (cols, _) = band.size();
    let buffer = band.read_as::<f32>((0, row_offset as isize), (cols, rows), (cols, rows), None)?;
    Array2::from_shape_vec((rows, cols), buffer.data)
        .map_err(|e| SarError::Processing(format!("Failed to reshape band data: {}", e)))
}

/// Read a whole band as f32
pub fn read_band(path: &Path, band_index: isize) -> SarResult<(Array2<f32>, GeoReference)> {
    let dataset = Dataset::open(path)?;
    let georef = GeoReference::from_dataset(&dataset)?;
    let rows = georef.size.1;
    let array = read_rows(&dataset, band_index, 0, rows)?;
    Ok((array, georef))
}

fn creation_options(size: (usize, usize)) -> Vec<RasterCreationOption<'static>> {
    let mut options = vec![
        RasterCreationOption { key: "COMPRESS", value: "DEFLATE" },
        RasterCreationOption { key: "BIGTIFF", value: "IF_SAFER" },
    ];
    // tiny subsets do not fit a 128 pixel block
    if size.0 >= 128 && size.1 >= 128 {
        options.push(RasterCreationOption { key: "TILED", value: "YES" });
        options.push(RasterCreationOption { key: "BLOCKXSIZE", value: "128" });
        options.push(RasterCreationOption { key: "BLOCKYSIZE", value: "128" });
    }
    options
}

fn create_typed<T: GdalType>(path: &Path, georef: &GeoReference, bands: usize) -> SarResult<Dataset> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (cols, rows) = georef.size;
    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        path,
        cols as isize,
        rows as isize,
        bands as isize,
        &creation_options(georef.size),
    )?;
    dataset.set_geo_transform(&georef.geo_transform)?;
    if !georef.projection.is_empty() {
        dataset.set_projection(&georef.projection)?;
    }
    for index in 1..=bands {
        let mut band = dataset.rasterband(index as isize)?;
        band.set_no_data_value(Some(0.0))?;
    }
    Ok(dataset)
}

/// Create a GeoTIFF with `bands` bands of `dtype` and no-data 0
pub fn create_geotiff(path: &Path, georef: &GeoReference, bands: usize, dtype: OutputDtype) -> SarResult<Dataset> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match dtype {
        OutputDtype::Float32 => create_typed::<f32>(path, georef, bands),
        OutputDtype::Uint8 => create_typed::<u8>(path, georef, bands),
        OutputDtype::Uint16 => create_typed::<u16>(path, georef, bands),
    }
}

fn write_typed<T: GdalType + Copy>(
    dataset: &Dataset,
    band_index: isize,
    row_offset: usize,
    data: &Array2<f32>,
    convert: impl Fn(f32) -> T,
) -> SarResult<()> {
    let (rows, cols) = data.dim();
    let values: Vec<T> = data.iter().map(|&v| convert(v)).collect();
    let mut band = dataset.rasterband(band_index)?;
    band.write((0, row_offset as isize), (cols, rows), &Buffer::new((cols, rows), values))?;
    Ok(())
}

/// Write rows of a band, casting to the dataset's `dtype`
pub fn write_rows(
    dataset: &Dataset,
    band_index: isize,
    row_offset: usize,
    data: &Array2<f32>,
    dtype: OutputDtype,
) -> SarResult<()> {
    match dtype {
        OutputDtype::Float32 => write_typed(dataset, band_index, row_offset, data, |v| v),
        OutputDtype::Uint8 => write_typed(dataset, band_index, row_offset, data, |v| {
            if v.is_nan() { 0 } else { v.round().clamp(0.0, 255.0) as u8 }
        }),
        OutputDtype::Uint16 => write_typed(dataset, band_index, row_offset, data, |v| {
            if v.is_nan() { 0 } else { v.round().clamp(0.0, 65535.0) as u16 }
        }),
    }
}

/// Set band name as description and `BAND_NAME` tag
pub fn describe_band(dataset: &Dataset, band_index: isize, name: &str) -> SarResult<()> {
    let mut band = dataset.rasterband(band_index)?;
    band.set_description(name)?;
    band.set_metadata_item("BAND_NAME", name, "")?;
    Ok(())
}

/// How a single layer is prepared for export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerExport {
    pub to_db: bool,
    pub dtype: OutputDtype,
    /// Stretch range for integer output
    pub min: f32,
    pub max: f32,
}

impl LayerExport {
    /// Apply the conversions to float data where 0 marks no-data
    pub fn prepare(&self, mut data: Array2<f32>) -> SarResult<Array2<f32>> {
        data.mapv_inplace(|v| if v == 0.0 { f32::NAN } else { v });
        if self.to_db {
            convert_to_db(&mut data);
        }
        if self.dtype != OutputDtype::Float32 {
            data = scale_to_int(&data, self.min, self.max, self.dtype)?;
        }
        nan_to_zero(&mut data);
        Ok(data)
    }
}

/// Set pixels flagged in `mask` to 0 (no-data)
pub fn apply_mask(data: &mut Array2<f32>, mask: &Array2<f32>) -> SarResult<()> {
    if data.dim() != mask.dim() {
        return Err(SarError::Processing(format!(
            "Mask of {:?} pixels does not match layer of {:?}",
            mask.dim(),
            data.dim()
        )));
    }
    Zip::from(data).and(mask).for_each(|v, &m| {
        if m != 0.0 {
            *v = 0.0;
        }
    });
    Ok(())
}

/// Convert the first band of `input` into a single band GeoTIFF, blanking
/// the pixels flagged in `mask`
pub fn export_layer(
    input: &Path,
    output: &Path,
    export: &LayerExport,
    band_name: &str,
    mask: Option<&Array2<f32>>,
) -> SarResult<()> {
    let (mut data, georef) = read_band(input, 1)?;
    if let Some(mask) = mask {
        apply_mask(&mut data, mask)?;
    }
    let data = export.prepare(data)?;
    let dataset = create_geotiff(output, &georef, 1, export.dtype)?;
    write_rows(&dataset, 1, 0, &data, export.dtype)?;
    describe_band(&dataset, 1, band_name)?;
    Ok(())
}

/// File stem of a band image, used as band name
pub fn band_name(image: &Path) -> String {
    image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Export every band of a DIMAP product into one GeoTIFF.
///
/// Backscatter is stretched over -30..5 dB for integer output.
pub fn dimap_to_tif(product: &DimapProduct, output: &Path, to_db: bool, dtype: OutputDtype) -> SarResult<PathBuf> {
    let images = product.images()?;
    let first = images.first().ok_or_else(|| {
        SarError::NotValidFile(format!("{} has no band images", product.prefix().display()))
    })?;
    let georef = GeoReference::open(first)?;
    let dataset = create_geotiff(output, &georef, images.len(), dtype)?;
    let export = LayerExport { to_db, dtype, min: -30.0, max: 5.0 };

    for (i, image) in images.iter().enumerate() {
        let (data, band_georef) = read_band(image, 1)?;
        if band_georef.size != georef.size {
            return Err(SarError::Processing(format!(
                "Band {} does not match the product dimensions",
                image.display()
            )));
        }
        let data = export.prepare(data)?;
        let index = (i + 1) as isize;
        write_rows(&dataset, index, 0, &data, dtype)?;
        describe_band(&dataset, index, &band_name(image))?;
    }

    log::info!("Exported {} to {}", product.name(), output.display());
    Ok(output.to_path_buf())
}

/// Image of the product whose name carries `pol`
fn polarisation_image(product: &DimapProduct, pols: &[Polarization]) -> SarResult<Option<PathBuf>> {
    let images = product.images()?;
    for pol in pols {
        let tag = pol.to_string();
        if let Some(image) = images.iter().find(|p| band_name(p).contains(&tag)) {
            return Ok(Some(image.clone()));
        }
    }
    Ok(None)
}

/// Three band composite: co-pol, cross-pol and their dB difference
pub fn ard_to_rgb(product: &DimapProduct, output: &Path, to_db: bool) -> SarResult<PathBuf> {
    let co_pol = polarisation_image(product, &[Polarization::VV, Polarization::HH])?;
    let cross_pol = polarisation_image(product, &[Polarization::VH, Polarization::HV])?;
    let (co_pol, cross_pol) = match (co_pol, cross_pol) {
        (Some(co), Some(cross)) => (co, cross),
        _ => {
            return Err(SarError::Processing(format!(
                "RGB composite needs a co- and a cross-polarised band in {}",
                product.prefix().display()
            )))
        }
    };

    let (mut co, georef) = read_band(&co_pol, 1)?;
    let (mut cross, cross_georef) = read_band(&cross_pol, 1)?;
    if georef.size != cross_georef.size {
        return Err(SarError::Processing("Polarisation bands differ in size".to_string()));
    }

    if to_db {
        let co_valid = co.mapv(|v| v != 0.0);
        let cross_valid = cross.mapv(|v| v != 0.0);
        convert_to_db(&mut co);
        convert_to_db(&mut cross);
        Zip::from(&mut co).and(&co_valid).for_each(|v, &ok| if !ok { *v = 0.0 });
        Zip::from(&mut cross).and(&cross_valid).for_each(|v, &ok| if !ok { *v = 0.0 });
    }
    let ratio = &co - &cross;

    let dataset = create_geotiff(output, &georef, 3, OutputDtype::Float32)?;
    for (index, data) in [(1, &co), (2, &cross), (3, &ratio)] {
        write_rows(&dataset, index, 0, data, OutputDtype::Float32)?;
    }
    log::info!("Wrote RGB composite {}", output.display());
    Ok(output.to_path_buf())
}

/// Stack single band files into a band-separate VRT with no-data 0
pub fn build_vrt(output: &Path, inputs: &[PathBuf], logfile: &Path) -> SarResult<PathBuf> {
    if inputs.is_empty() {
        return Err(SarError::Processing(format!(
            "No inputs for {}",
            output.display()
        )));
    }
    let mut args = vec![
        "-overwrite".to_string(),
        "-separate".to_string(),
        "-srcnodata".to_string(),
        "0".to_string(),
        output.to_string_lossy().into_owned(),
    ];
    args.extend(inputs.iter().map(|p| p.to_string_lossy().into_owned()));

    let code = run_command("gdalbuildvrt", &args, logfile)?;
    if code != 0 {
        return Err(SarError::Processing(format!(
            "gdalbuildvrt exited with {} (see {})",
            code,
            logfile.display()
        )));
    }
    Ok(output.to_path_buf())
}

/// Arguments for clipping a raster to a window in its own coordinates.
///
/// `pixel_size` pins the output grid so that rasters clipped to the same
/// window line up pixel by pixel.
pub fn clip_to_bounds_args(input: &Path, output: &Path, bounds: &Bounds, pixel_size: (f64, f64)) -> Vec<String> {
    vec![
        "-overwrite".to_string(),
        "-te".to_string(),
        bounds.min_x.to_string(),
        bounds.min_y.to_string(),
        bounds.max_x.to_string(),
        bounds.max_y.to_string(),
        "-tr".to_string(),
        pixel_size.0.to_string(),
        pixel_size.1.to_string(),
        "-dstnodata".to_string(),
        "0".to_string(),
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Union of mask rasters on one grid: 1 where any input is flagged, else 0.
///
/// The result is written next to `output` and moved into place.
pub fn merge_masks(inputs: &[PathBuf], output: &Path) -> SarResult<PathBuf> {
    let flagged = |v: f32| v.is_finite() && v != 0.0;
    let mut merged: Option<(Array2<f32>, GeoReference)> = None;
    for input in inputs {
        let (data, georef) = read_band(input, 1)?;
        merged = Some(match merged {
            None => (data.mapv(|v| if flagged(v) { 1.0 } else { 0.0 }), georef),
            Some((mut acc, acc_georef)) => {
                if acc_georef.size != georef.size {
                    return Err(SarError::Processing(format!(
                        "Mask {} does not match the grid of the other masks",
                        input.display()
                    )));
                }
                Zip::from(&mut acc).and(&data).for_each(|a, &v| {
                    if flagged(v) {
                        *a = 1.0;
                    }
                });
                (acc, acc_georef)
            }
        });
    }
    let (mask, georef) =
        merged.ok_or_else(|| SarError::Processing("No masks to merge".to_string()))?;

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let temp = tempfile::Builder::new()
        .suffix(".tif")
        .tempfile_in(parent)?
        .into_temp_path();
    {
        let dataset = create_geotiff(&temp, &georef, 1, OutputDtype::Uint8)?;
        write_rows(&dataset, 1, 0, &mask, OutputDtype::Uint8)?;
    }
    temp.persist(output).map_err(|e| SarError::Io(e.error))?;
    Ok(output.to_path_buf())
}

/// Arguments for cutting a raster to a polygon file
pub fn cut_to_shape_args(input: &Path, output: &Path, shape: &Path) -> Vec<String> {
    vec![
        "-overwrite".to_string(),
        "-cutline".to_string(),
        shape.to_string_lossy().into_owned(),
        "-crop_to_cutline".to_string(),
        "-dstnodata".to_string(),
        "0".to_string(),
        "-co".to_string(),
        "COMPRESS=DEFLATE".to_string(),
        input.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Run gdalwarp with prepared arguments
pub fn gdalwarp(args: &[String], logfile: &Path) -> SarResult<()> {
    let code = run_command("gdalwarp", args, logfile)?;
    if code != 0 {
        return Err(SarError::Processing(format!(
            "gdalwarp exited with {} (see {})",
            code,
            logfile.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn db_conversion_clamps_non_positive_values() {
        let mut a = array![[1.0f32, 0.1, 0.0, -1.0]];
        convert_to_db(&mut a);
        assert_relative_eq!(a[[0, 0]], 0.0);
        assert_relative_eq!(a[[0, 1]], -10.0, epsilon = 1e-5);
        assert_relative_eq!(a[[0, 2]], -130.0, epsilon = 1e-3);
        assert_relative_eq!(a[[0, 3]], -70.0, epsilon = 1e-3);

        let mut nodata = array![[f32::NAN]];
        convert_to_db(&mut nodata);
        assert!(nodata[[0, 0]].is_nan());
    }

    #[test]
    fn integer_stretch_hits_display_range() {
        let a = array![[-30.0f32, 5.0, -100.0, 50.0, f32::NAN]];
        let s = scale_to_int(&a, -30.0, 5.0, OutputDtype::Uint8).unwrap();
        assert_eq!(s, array![[1.0f32, 255.0, 1.0, 255.0, 0.0]]);

        let s = scale_to_int(&a, -30.0, 5.0, OutputDtype::Uint16).unwrap();
        assert_eq!(s[[0, 1]], 65535.0);
        assert!(scale_to_int(&a, -30.0, 5.0, OutputDtype::Float32).is_err());
    }

    #[test]
    fn rescale_inverts_uint8_stretch() {
        let a = array![[1.0f32, 255.0, 0.0]];
        let r = rescale_to_float(&a, OutputDtype::Uint8).unwrap();
        assert_relative_eq!(r[[0, 0]], -30.0, epsilon = 1e-4);
        assert_relative_eq!(r[[0, 1]], 5.0, epsilon = 1e-4);
        assert!(r[[0, 2]].is_nan());
    }

    #[test]
    fn layer_export_marks_no_data() {
        let export = LayerExport { to_db: true, dtype: OutputDtype::Uint8, min: -30.0, max: 5.0 };
        let out = export.prepare(array![[0.0f32, 1.0]]).unwrap();
        assert_eq!(out[[0, 0]], 0.0);
        // 0 dB on a -30..5 stretch
        assert_eq!(out[[0, 1]], ((0.0f32 + 30.0 + 35.0 / 254.0) / (35.0 / 254.0)).round());

        let export = LayerExport { to_db: true, dtype: OutputDtype::Float32, min: -30.0, max: 5.0 };
        let out = export.prepare(array![[0.0f32, 0.1]]).unwrap();
        assert_eq!(out[[0, 0]], 0.0);
        assert_relative_eq!(out[[0, 1]], -10.0, epsilon = 1e-5);
    }

    fn write_test_tif(path: &Path, data: &Array2<f32>) {
        let georef = GeoReference {
            geo_transform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
            projection: String::new(),
            size: (data.ncols(), data.nrows()),
        };
        let ds = create_geotiff(path, &georef, 1, OutputDtype::Float32).unwrap();
        write_rows(&ds, 1, 0, data, OutputDtype::Float32).unwrap();
    }

    #[test]
    fn layover_shadow_pixels_are_exported_as_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.ls.tif");
        let second = dir.path().join("b.ls.tif");
        write_test_tif(&first, &array![[0.0f32, 1.0, 0.0], [0.0, 0.0, 0.0]]);
        write_test_tif(&second, &array![[0.0f32, 0.0, 0.0], [0.0, 0.0, 2.0]]);

        let merged = merge_masks(&[first, second], &dir.path().join("117.ls_mask.tif")).unwrap();
        let (mask, _) = read_band(&merged, 1).unwrap();
        assert_eq!(mask, array![[0.0f32, 1.0, 0.0], [0.0, 0.0, 1.0]]);

        let layer = dir.path().join("layer.tif");
        write_test_tif(&layer, &array![[0.1f32, 0.1, 0.1], [0.1, 0.1, 0.1]]);
        let out = dir.path().join("01.200115.bs.VV.tif");
        let export = LayerExport { to_db: true, dtype: OutputDtype::Float32, min: -30.0, max: 5.0 };
        export_layer(&layer, &out, &export, "Gamma0_VV", Some(&mask)).unwrap();

        let (data, _) = read_band(&out, 1).unwrap();
        assert_eq!(data[[0, 1]], 0.0);
        assert_eq!(data[[1, 2]], 0.0);
        assert_relative_eq!(data[[0, 0]], -10.0, epsilon = 1e-5);
        assert_relative_eq!(data[[1, 1]], -10.0, epsilon = 1e-5);
    }

    #[test]
    fn mask_must_match_the_layer() {
        let mut data = Array2::<f32>::ones((2, 2));
        assert!(apply_mask(&mut data, &Array2::zeros((2, 3))).is_err());
        apply_mask(&mut data, &array![[1.0f32, 0.0], [0.0, 0.0]]).unwrap();
        assert_eq!(data, array![[0.0f32, 1.0], [1.0, 1.0]]);
    }

    #[test]
    fn bounds_intersection() {
        let a = Bounds { min_x: 0.0, min_y: 0.0, max_x: 10.0, max_y: 10.0 };
        let b = Bounds { min_x: 5.0, min_y: -5.0, max_x: 15.0, max_y: 5.0 };
        assert_eq!(
            a.intersection(&b),
            Some(Bounds { min_x: 5.0, min_y: 0.0, max_x: 10.0, max_y: 5.0 })
        );
        let c = Bounds { min_x: 20.0, min_y: 20.0, max_x: 30.0, max_y: 30.0 };
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn georeference_bounds_with_north_up_transform() {
        let georef = GeoReference {
            geo_transform: [10.0, 0.5, 0.0, 50.0, 0.0, -0.5],
            projection: String::new(),
            size: (20, 10),
        };
        assert_eq!(
            georef.bounds(),
            Bounds { min_x: 10.0, min_y: 45.0, max_x: 20.0, max_y: 50.0 }
        );
    }

    #[test]
    fn geotiff_round_trip_through_gdal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.tif");
        let georef = GeoReference {
            geo_transform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
            projection: String::new(),
            size: (4, 3),
        };
        let data = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f32);
        {
            let ds = create_geotiff(&path, &georef, 1, OutputDtype::Uint16).unwrap();
            write_rows(&ds, 1, 0, &data, OutputDtype::Uint16).unwrap();
            describe_band(&ds, 1, "Gamma0_VV").unwrap();
        }
        let (read, read_georef) = read_band(&path, 1).unwrap();
        assert_eq!(read, data);
        assert_eq!(read_georef.size, (4, 3));
    }
}
