//! Mosaicking of layers from several tracks with Orfeo ToolBox
//!
//! Layers are blended with `otbcli_Mosaic` and optionally cut to the area of
//! interest. A `.<name>.processed` marker next to the output makes a second
//! run skip the layer.

use crate::config::{OutputDtype, ProcessingConfig};
use crate::core::dimap::check_out_tiff;
use crate::core::gpt::{run_command, with_retries, STEP_ATTEMPTS};
use crate::core::raster::{build_vrt, cut_to_shape_args, gdalwarp};
use crate::core::timescan::create_tscan_vrt;
use crate::types::{Polarization, SarError, SarResult};
use gdal::vector::Geometry;
use std::path::{Path, PathBuf};
use std::time::Duration;

const OTB_MOSAIC: &str = "otbcli_Mosaic";

/// How layers are mosaicked
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicOptions {
    /// Band-wise radiometric harmonisation of overlapping inputs
    pub harmonize: bool,
    /// Area of interest (WKT, EPSG:4326) the mosaic is cut to
    pub cut_to: Option<String>,
    pub dtype: OutputDtype,
    pub temp_dir: PathBuf,
}

impl MosaicOptions {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        let mosaic = &config.processing.mosaic;
        let cut_to = if mosaic.cut_to_aoi { config.aoi.clone() } else { None };
        Self {
            harmonize: mosaic.harmonization,
            cut_to,
            dtype: config.processing.time_series_ard.dtype_output,
            temp_dir: config.temp_dir.clone(),
        }
    }
}

/// Pixel type name understood by OTB applications
pub fn otb_pixel_type(dtype: OutputDtype) -> &'static str {
    match dtype {
        OutputDtype::Float32 => "float",
        OutputDtype::Uint8 => "uint8",
        OutputDtype::Uint16 => "uint16",
    }
}

/// Arguments of `otbcli_Mosaic` with feathering and bicubic interpolation
pub fn otb_mosaic_args(
    inputs: &[PathBuf],
    output: &Path,
    temp_dir: &Path,
    harmonize: bool,
    dtype: OutputDtype,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-ram",
        "8192",
        "-progress",
        "1",
        "-comp.feather",
        "large",
        "-harmo.method",
        if harmonize { "band" } else { "none" },
        "-harmo.cost",
        "rmse",
        "-tmpdir",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(temp_dir.to_string_lossy().into_owned());
    args.push("-interpolator".to_string());
    args.push("bco".to_string());
    args.push("-il".to_string());
    args.extend(inputs.iter().map(|p| p.to_string_lossy().into_owned()));
    args.push("-out".to_string());
    args.push(output.to_string_lossy().into_owned());
    args.push(otb_pixel_type(dtype).to_string());
    args
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn processed_marker(output: &Path) -> PathBuf {
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{}.processed", stem(output)))
}

/// Write the area of interest as a GeoJSON geometry usable as cutline
pub fn write_aoi_cutline(wkt: &str, path: &Path) -> SarResult<()> {
    let geometry = Geometry::from_wkt(wkt)?;
    std::fs::write(path, geometry.json()?)?;
    Ok(())
}

fn run_mosaic(inputs: &[PathBuf], output: &Path, options: &MosaicOptions, logfile: &Path) -> SarResult<()> {
    std::fs::create_dir_all(&options.temp_dir)?;
    let temp = tempfile::Builder::new()
        .prefix("mosaic_")
        .tempdir_in(&options.temp_dir)?;

    let mosaic_out = match options.cut_to {
        Some(_) => temp.path().join(output.file_name().unwrap_or_default()),
        None => output.to_path_buf(),
    };

    let args = otb_mosaic_args(inputs, &mosaic_out, temp.path(), options.harmonize, options.dtype);
    let code = run_command(OTB_MOSAIC, &args, logfile)?;
    if code != 0 {
        let _ = std::fs::remove_file(&mosaic_out);
        return Err(SarError::GptRuntime {
            step: OTB_MOSAIC.to_string(),
            code,
            logfile: logfile.to_path_buf(),
        });
    }

    if let Some(aoi) = &options.cut_to {
        let cutline = temp.path().join("aoi.geojson");
        write_aoi_cutline(aoi, &cutline)?;
        gdalwarp(&cut_to_shape_args(&mosaic_out, output, &cutline), logfile)?;
    }

    if let Err(e) = check_out_tiff(output, true) {
        let _ = std::fs::remove_file(output);
        return Err(e);
    }
    Ok(())
}

/// Mosaic `inputs` into `output`.
///
/// A layer that was already mosaicked is returned untouched.
pub fn mosaic(inputs: &[PathBuf], output: &Path, options: &MosaicOptions) -> SarResult<PathBuf> {
    let marker = processed_marker(output);
    if marker.exists() {
        log::info!("{} already exists", output.display());
        return Ok(output.to_path_buf());
    }
    if inputs.is_empty() {
        return Err(SarError::Processing(format!("No inputs to mosaic into {}", output.display())));
    }
    if let Some(dir) = output.parent() {
        std::fs::create_dir_all(dir)?;
    }

    log::info!("Mosaicking file {}", output.display());
    let logfile = output.with_extension("errLog");
    with_retries("Mosaic", STEP_ATTEMPTS, Duration::from_secs(1), || {
        run_mosaic(inputs, output, options, &logfile)
    })?;

    std::fs::write(&marker, "passed all tests\n")?;
    Ok(output.to_path_buf())
}

/// Parts of a time-series layer name `<NN>.<yymmdd>.bs.<POL>.tif`
fn ts_layer_parts(path: &Path) -> Option<(usize, String)> {
    let name = path.file_name()?.to_str()?;
    let mut parts = name.split('.');
    let index = parts.next()?.parse().ok()?;
    let date = parts.next()?.to_string();
    Some((index, date))
}

/// Time-series layers of all tracks below `processing_dir` for one polarisation
fn track_layers(processing_dir: &Path, pol: Polarization) -> SarResult<Vec<PathBuf>> {
    let suffix = format!(".bs.{}.tif", pol);
    let mut layers = Vec::new();
    for track in std::fs::read_dir(processing_dir)? {
        let ts_dir = track?.path().join("Timeseries");
        if !ts_dir.is_dir() || ts_dir.starts_with(processing_dir.join("Mosaic")) {
            continue;
        }
        for entry in std::fs::read_dir(&ts_dir)? {
            let path = entry?.path();
            let is_layer = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false);
            if is_layer && ts_layer_parts(&path).is_some() {
                layers.push(path);
            }
        }
    }
    layers.sort();
    Ok(layers)
}

/// Output name of the n-th mosaicked time-series layer
pub fn ts_mosaic_name(index: usize, dates: &[String], pol: Polarization) -> String {
    let mut sorted = dates.to_vec();
    sorted.sort();
    let start = sorted.first().cloned().unwrap_or_default();
    let end = sorted.last().cloned().unwrap_or_default();
    if start == end {
        format!("{:02}.{}.bs.{}.tif", index, start, pol)
    } else {
        format!("{:02}.{}-{}.bs.{}.tif", index, start, end, pol)
    }
}

/// `<product>.Timeseries.vrt` stacking the mosaicked layers, e.g. `bs.VV.Timeseries.vrt`
pub fn timeseries_mosaic_vrt(ts_dir: &Path, pol: Polarization) -> PathBuf {
    ts_dir.join(format!("bs.{}.Timeseries.vrt", pol))
}

/// Mosaic the n-th time-series layers of all tracks, per polarisation.
///
/// Writes `Mosaic/Timeseries/<NN>.<start>[-<end>].bs.<POL>.tif` and a
/// `bs.<POL>.Timeseries.vrt` per polarisation.
pub fn mosaic_timeseries(processing_dir: &Path, options: &MosaicOptions) -> SarResult<Vec<PathBuf>> {
    log::info!("Mosaicking time-series layers");
    let ts_dir = processing_dir.join("Mosaic").join("Timeseries");
    std::fs::create_dir_all(&ts_dir)?;

    let mut vrts = Vec::new();
    for pol in [Polarization::VV, Polarization::VH, Polarization::HH, Polarization::HV] {
        let layers = track_layers(processing_dir, pol)?;
        let count = layers.iter().filter_map(|l| ts_layer_parts(l)).map(|(i, _)| i).max().unwrap_or(0);
        if count == 0 {
            continue;
        }

        let mut outfiles = Vec::with_capacity(count);
        for index in 1..=count {
            let (files, dates): (Vec<PathBuf>, Vec<String>) = layers
                .iter()
                .filter_map(|l| ts_layer_parts(l).map(|(i, date)| (l, i, date)))
                .filter(|(_, i, _)| *i == index)
                .map(|(l, _, date)| (l.clone(), date))
                .unzip();
            if files.is_empty() {
                continue;
            }
            let outfile = ts_dir.join(ts_mosaic_name(index, &dates, pol));
            mosaic(&files, &outfile, options)?;
            outfiles.push(outfile);
        }

        let vrt = timeseries_mosaic_vrt(&ts_dir, pol);
        vrts.push(build_vrt(&vrt, &outfiles, &ts_dir.join(format!("bs.{}.Timeseries.errLog", pol)))?);
    }
    Ok(vrts)
}

/// Mosaic the timescan metrics of all tracks.
///
/// A metric is mosaicked when at least two tracks provide it; the results
/// land in `Mosaic/Timescan/bs.<POL>.<metric>.tif` and `Timescan.vrt`.
pub fn mosaic_timescan(processing_dir: &Path, metric_names: &[&str], options: &MosaicOptions) -> SarResult<PathBuf> {
    log::info!("Mosaicking timescan layers");
    let tscan_dir = processing_dir.join("Mosaic").join("Timescan");
    std::fs::create_dir_all(&tscan_dir)?;

    for pol in [Polarization::VV, Polarization::HH, Polarization::VH, Polarization::HV] {
        for metric in metric_names {
            let suffix = format!("bs.{}.{}.tif", pol, metric);
            let mut files = Vec::new();
            for track in std::fs::read_dir(processing_dir)? {
                let track = track?.path();
                if track.file_name().map(|n| n == "Mosaic").unwrap_or(false) {
                    continue;
                }
                let dir = track.join("Timescan");
                if !dir.is_dir() {
                    continue;
                }
                for entry in std::fs::read_dir(&dir)? {
                    let path = entry?.path();
                    if path.to_string_lossy().ends_with(&suffix) {
                        files.push(path);
                    }
                }
            }
            if files.len() < 2 {
                continue;
            }
            files.sort();
            mosaic(&files, &tscan_dir.join(&suffix), options)?;
        }
    }
    create_tscan_vrt(&tscan_dir, metric_names)
}
