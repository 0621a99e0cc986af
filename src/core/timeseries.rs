//! Multi-temporal stacks of backscatter ARD
//!
//! All acquisitions of one track are co-registered into a SNAP stack,
//! optionally speckle filtered in time, clipped to the common extent and
//! written as one GeoTIFF per date plus a band-separate VRT.

use crate::config::{ArdParameters, ProcessingConfig};
use crate::core::dimap::{check_out_tiff, DimapProduct};
use crate::core::gpt::Gpt;
use crate::core::raster::{
    band_name, build_vrt, clip_to_bounds_args, export_layer, gdalwarp, merge_masks, read_band, Bounds,
    GeoReference, LayerExport,
};
use crate::core::wrappers::{self, StackSelection};
use crate::io::write_atomic;
use crate::types::{Polarization, SarError, SarResult};
use chrono::NaiveDate;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Product tag of backscatter layers
pub const BACKSCATTER: &str = "bs";

/// dB conversion is only applied when the single ARDs are still linear
pub fn ts_to_db(ard: &ArdParameters, product: &str) -> bool {
    if ard.single_ard.to_db || product != BACKSCATTER {
        false
    } else {
        ard.time_series_ard.to_db
    }
}

/// Stretch range used for integer output of a product
pub fn stretch_range(product: &str) -> (f32, f32) {
    match product {
        BACKSCATTER => (-30.0, 5.0),
        _ => (0.000001, 1.0),
    }
}

/// Acquisition date of a stack band, e.g. `Gamma0_VV_slv1_15Jan2020`
pub fn stack_band_date(name: &str) -> SarResult<NaiveDate> {
    let stem = name.trim_end_matches(".img");
    let token = stem.rsplit('_').next().unwrap_or(stem);
    NaiveDate::parse_from_str(token, "%d%b%Y")
        .map_err(|e| SarError::InvalidFormat(format!("No date in stack band {}: {}", name, e)))
}

/// `<NN>.<yymmdd>.<product>.<POL>.tif`, numbered from 1
pub fn layer_file_name(index: usize, date: NaiveDate, product: &str, pol: Polarization) -> String {
    format!("{:02}.{}.{}.{}.tif", index + 1, date.format("%y%m%d"), product, pol)
}

pub fn processed_marker(ts_dir: &Path, product: &str, pol: Polarization) -> PathBuf {
    ts_dir.join(format!(".{}.{}.processed", product, pol))
}

pub fn timeseries_vrt(ts_dir: &Path, product: &str, pol: Polarization) -> PathBuf {
    ts_dir.join(format!("Timeseries.{}.{}.vrt", product, pol))
}

/// Smallest extent covered by every product
pub fn common_extent(dims: &[PathBuf]) -> SarResult<Bounds> {
    let mut extent: Option<Bounds> = None;
    for dim in dims {
        let product = DimapProduct::from_dim(dim);
        let image = product.images()?.into_iter().next().ok_or_else(|| {
            SarError::NotValidFile(format!("{} has no band images", dim.display()))
        })?;
        let bounds = GeoReference::open(&image)?.bounds();
        extent = match extent {
            None => Some(bounds),
            Some(current) => Some(current.intersection(&bounds).ok_or_else(|| {
                SarError::Processing(format!("{} does not overlap the other acquisitions", dim.display()))
            })?),
        };
    }
    extent.ok_or_else(|| SarError::Processing("No products for the common extent".to_string()))
}

/// Common output grid of a track: extent and pixel size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackGrid {
    pub bounds: Bounds,
    pub pixel_size: (f64, f64),
}

/// Pixel size of the first band image of a product
pub fn pixel_size(dim: &Path) -> SarResult<(f64, f64)> {
    let image = DimapProduct::from_dim(dim).images()?.into_iter().next().ok_or_else(|| {
        SarError::NotValidFile(format!("{} has no band images", dim.display()))
    })?;
    let gt = GeoReference::open(&image)?.geo_transform;
    Ok((gt[1].abs(), gt[5].abs()))
}

/// Write the extent as a GeoJSON polygon with its bbox and pixel size
pub fn write_extent(path: &Path, grid: &TrackGrid) -> SarResult<()> {
    let bounds = &grid.bounds;
    let ring = [
        [bounds.min_x, bounds.min_y],
        [bounds.max_x, bounds.min_y],
        [bounds.max_x, bounds.max_y],
        [bounds.min_x, bounds.max_y],
        [bounds.min_x, bounds.min_y],
    ];
    let doc = json!({
        "type": "FeatureCollection",
        "bbox": [bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y],
        "pixel_size": [grid.pixel_size.0, grid.pixel_size.1],
        "features": [{
            "type": "Feature",
            "properties": {"id": "1"},
            "geometry": {"type": "Polygon", "coordinates": [ring]},
        }],
    });
    write_atomic(path, serde_json::to_string_pretty(&doc)?.as_bytes())
}

fn f64_list(value: &serde_json::Value) -> Vec<f64> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default()
}

pub fn read_extent(path: &Path) -> SarResult<TrackGrid> {
    let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let bounds = match f64_list(&doc["bbox"]).as_slice() {
        [min_x, min_y, max_x, max_y] => Bounds {
            min_x: *min_x,
            min_y: *min_y,
            max_x: *max_x,
            max_y: *max_y,
        },
        _ => return Err(SarError::InvalidFormat(format!("No bbox in {}", path.display()))),
    };
    let pixel_size = match f64_list(&doc["pixel_size"]).as_slice() {
        [x, y] => (*x, *y),
        _ => return Err(SarError::InvalidFormat(format!("No pixel size in {}", path.display()))),
    };
    Ok(TrackGrid { bounds, pixel_size })
}

pub fn extent_file(track_dir: &Path, track: &str) -> PathBuf {
    track_dir.join(format!("{}.min_bounds.json", track))
}

/// Extent file of a track, computed once and reused afterwards
pub fn track_extent(track_dir: &Path, track: &str, dims: &[PathBuf]) -> SarResult<TrackGrid> {
    let path = extent_file(track_dir, track);
    if path.exists() {
        return read_extent(&path);
    }
    let first = dims
        .first()
        .ok_or_else(|| SarError::Processing(format!("Track {} has no products", track)))?;
    let grid = TrackGrid {
        bounds: common_extent(dims)?,
        pixel_size: pixel_size(first)?,
    };
    write_extent(&path, &grid)?;
    Ok(grid)
}

/// Layover/shadow mask written next to a backscatter ARD,
/// `<id>.bs.dim` -> `<id>.LS.dim`
pub fn ls_mask_of(bs_dim: &Path) -> Option<PathBuf> {
    let name = bs_dim.file_name()?.to_str()?;
    let stem = name.strip_suffix(".bs.dim")?;
    let ls = bs_dim.with_file_name(format!("{}.LS.dim", stem));
    ls.exists().then_some(ls)
}

pub fn ls_mask_file(track_dir: &Path, track: &str) -> PathBuf {
    track_dir.join(format!("{}.ls_mask.tif", track))
}

/// Merge the layover/shadow masks of all acquisitions on the track grid.
///
/// Returns `None` when no acquisition carries a mask.
pub fn track_ls_mask(
    config: &ProcessingConfig,
    track_dir: &Path,
    track: &str,
    dims: &[PathBuf],
    grid: &TrackGrid,
) -> SarResult<Option<PathBuf>> {
    let out = ls_mask_file(track_dir, track);
    if out.exists() {
        return Ok(Some(out));
    }
    let masks: Vec<PathBuf> = dims.iter().filter_map(|d| ls_mask_of(d)).collect();
    if masks.is_empty() {
        log::warn!("Track {}: no layover/shadow masks found, layers stay unmasked", track);
        return Ok(None);
    }
    if masks.len() < dims.len() {
        log::warn!("Track {}: {} of {} acquisitions carry a layover/shadow mask", track, masks.len(), dims.len());
    }

    std::fs::create_dir_all(&config.temp_dir)?;
    let temp = tempfile::Builder::new()
        .prefix(&format!("ls_{}_", track))
        .tempdir_in(&config.temp_dir)?;
    let warp_log = track_dir.join(format!("{}.ls_mask.errLog", track));
    let mut clipped = Vec::with_capacity(masks.len());
    for (i, mask) in masks.iter().enumerate() {
        let image = DimapProduct::from_dim(mask).images()?.into_iter().next().ok_or_else(|| {
            SarError::NotValidFile(format!("{} has no band images", mask.display()))
        })?;
        let target = temp.path().join(format!("{}.ls.tif", i));
        gdalwarp(&clip_to_bounds_args(&image, &target, &grid.bounds, grid.pixel_size), &warp_log)?;
        clipped.push(target);
    }
    merge_masks(&clipped, &out)?;
    log::info!("Track {}: merged {} layover/shadow masks into {}", track, masks.len(), out.display());
    Ok(Some(out))
}

/// Shared inputs of every polarisation of a track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSetup {
    pub grid: TrackGrid,
    pub ls_mask: Option<PathBuf>,
}

/// Extent and, if configured, the merged layover/shadow mask of a track.
///
/// Both land in files below `track_dir` and are reused on later calls, so
/// this runs once per track before its polarisations are processed.
pub fn prepare_track(config: &ProcessingConfig, track_dir: &Path, track: &str, dims: &[PathBuf]) -> SarResult<TrackSetup> {
    let mut dims = dims.to_vec();
    dims.sort();
    let grid = track_extent(track_dir, track, &dims)?;
    let ls_mask = if config.processing.time_series_ard.apply_ls_mask {
        track_ls_mask(config, track_dir, track, &dims, &grid)?
    } else {
        None
    };
    Ok(TrackSetup { grid, ls_mask })
}

/// Stack band images of `pol`, ordered by acquisition date
pub fn dated_layers(stack: &DimapProduct, pol: Polarization) -> SarResult<Vec<(NaiveDate, PathBuf)>> {
    let tag = pol.to_string();
    let mut layers = Vec::new();
    for image in stack.images()? {
        let name = band_name(&image);
        if !name.contains(&tag) {
            continue;
        }
        layers.push((stack_band_date(&name)?, image));
    }
    layers.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(layers)
}

/// Create the time-series of one track and polarisation.
///
/// Returns the VRT; a track marked as processed is not touched again.
pub fn ard_to_ts(
    gpt: &Gpt,
    config: &ProcessingConfig,
    track_dir: &Path,
    track: &str,
    dims: &[PathBuf],
    pol: Polarization,
) -> SarResult<PathBuf> {
    let product = BACKSCATTER;
    let ts_dir = track_dir.join("Timeseries");
    std::fs::create_dir_all(&ts_dir)?;

    let marker = processed_marker(&ts_dir, product, pol);
    let vrt = timeseries_vrt(&ts_dir, product, pol);
    if marker.exists() {
        log::info!("Time-series of track {} {} already processed", track, pol);
        return Ok(vrt);
    }
    if dims.len() < 2 {
        return Err(SarError::Processing(format!(
            "Track {} needs at least two acquisitions for a time-series",
            track
        )));
    }

    let ard = &config.processing;
    let mut dims = dims.to_vec();
    dims.sort();
    let setup = prepare_track(config, track_dir, track, &dims)?;
    let mask = match &setup.ls_mask {
        Some(path) => Some(read_band(path, 1)?.0),
        None => None,
    };

    std::fs::create_dir_all(&config.temp_dir)?;
    let temp = tempfile::Builder::new()
        .prefix(&format!("ts_{}_{}_", track, pol))
        .tempdir_in(&config.temp_dir)?;

    log::info!("Track {}: stacking {} acquisitions ({})", track, dims.len(), pol);
    let stack_log = ts_dir.join(format!("{}.{}.stack.errLog", track, pol));
    let mut stack = wrappers::create_stack(
        gpt,
        config,
        &dims,
        &DimapProduct::new(temp.path().join(format!("stack.{}.{}", track, pol))),
        &StackSelection::Polarisation(pol),
        &stack_log,
    )?;

    if ard.time_series_ard.remove_mt_speckle {
        log::info!("Track {}: multi-temporal speckle filter ({})", track, pol);
        let filtered = wrappers::mt_speckle_filter(
            gpt,
            config,
            &stack.dim(),
            &DimapProduct::new(temp.path().join(format!("mt_speckle.{}.{}", track, pol))),
            &ts_dir.join(format!("{}.{}.mt_speckle.errLog", track, pol)),
        )?;
        stack.delete()?;
        stack = filtered;
    }

    let (min, max) = stretch_range(product);
    let export = LayerExport {
        to_db: ts_to_db(ard, product),
        dtype: ard.time_series_ard.dtype_output,
        min,
        max,
    };

    let layers = dated_layers(&stack, pol)?;
    let mut outputs = Vec::with_capacity(layers.len());
    let warp_log = ts_dir.join(format!("{}.{}.clip.errLog", track, pol));
    let result = (|| -> SarResult<()> {
        for (i, (date, image)) in layers.iter().enumerate() {
            let clipped = temp.path().join(format!("{}.clip.tif", i));
            gdalwarp(
                &clip_to_bounds_args(image, &clipped, &setup.grid.bounds, setup.grid.pixel_size),
                &warp_log,
            )?;

            let out = ts_dir.join(layer_file_name(i, *date, product, pol));
            outputs.push(out.clone());
            export_layer(&clipped, &out, &export, &band_name(image), mask.as_ref())?;
            check_out_tiff(&out, true)?;
            std::fs::remove_file(&clipped)?;
        }
        Ok(())
    })();

    if let Err(e) = result {
        for out in &outputs {
            let _ = std::fs::remove_file(out);
        }
        return Err(e);
    }

    std::fs::write(&marker, "passed all tests\n")?;
    build_vrt(&vrt, &outputs, &ts_dir.join(format!("{}.{}.vrt.errLog", track, pol)))?;
    log::info!("Track {}: time-series {} written", track, vrt.display());
    Ok(vrt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArdType;
    use crate::types::ProductType;

    #[test]
    fn band_dates() {
        assert_eq!(
            stack_band_date("Gamma0_VV_slv1_15Jan2020").unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 15).unwrap()
        );
        assert_eq!(
            stack_band_date("Sigma0_VH_db_mst_03Dec2019.img").unwrap(),
            NaiveDate::from_ymd_opt(2019, 12, 3).unwrap()
        );
        assert!(stack_band_date("Gamma0_VV").is_err());
    }

    #[test]
    fn layer_names() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        assert_eq!(layer_file_name(0, date, "bs", Polarization::VV), "01.200115.bs.VV.tif");
        assert_eq!(layer_file_name(11, date, "bs", Polarization::VH), "12.200115.bs.VH.tif");
    }

    #[test]
    fn db_conversion_is_not_applied_twice() {
        let mut ard = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap();
        assert!(ts_to_db(&ard, BACKSCATTER));
        assert!(!ts_to_db(&ard, "coh"));
        ard.single_ard.to_db = true;
        assert!(!ts_to_db(&ard, BACKSCATTER));
    }

    fn test_grid() -> TrackGrid {
        TrackGrid {
            bounds: Bounds { min_x: 10.5, min_y: 45.0, max_x: 12.0, max_y: 46.25 },
            pixel_size: (20.0, 20.0),
        }
    }

    #[test]
    fn extent_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = extent_file(dir.path(), "117");
        write_extent(&path, &test_grid()).unwrap();
        assert_eq!(read_extent(&path).unwrap(), test_grid());
        // an existing extent file is reused without touching the products
        assert_eq!(track_extent(dir.path(), "117", &[]).unwrap(), test_grid());
    }

    #[test]
    fn polarisations_of_one_track_share_the_extent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = extent_file(dir.path(), "117");
        write_extent(&path, &test_grid()).unwrap();
        let config = ProcessingConfig::new(
            dir.path(),
            ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap(),
        );

        // one job rewrites the extent while the other polarisations read it
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..50 {
                    write_extent(&path, &test_grid()).unwrap();
                }
            });
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let setup = prepare_track(&config, dir.path(), "117", &[]).unwrap();
                        assert_eq!(setup.grid, test_grid());
                    }
                });
            }
        });
    }

    #[test]
    fn ls_masks_sit_next_to_the_backscatter() {
        let dir = tempfile::tempdir().unwrap();
        let bs = dir.path().join("20200115_117.bs.dim");
        assert_eq!(ls_mask_of(&bs), None);
        std::fs::write(dir.path().join("20200115_117.LS.dim"), "").unwrap();
        assert_eq!(ls_mask_of(&bs), Some(dir.path().join("20200115_117.LS.dim")));
        assert_eq!(ls_mask_of(&dir.path().join("20200115_117.LS.dim")), None);
    }

    #[test]
    fn merged_ls_mask_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut ard = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap();
        ard.time_series_ard.apply_ls_mask = true;
        let config = ProcessingConfig::new(dir.path(), ard);
        write_extent(&extent_file(dir.path(), "117"), &test_grid()).unwrap();

        // no acquisition carries a mask
        assert_eq!(prepare_track(&config, dir.path(), "117", &[]).unwrap().ls_mask, None);

        let mask = ls_mask_file(dir.path(), "117");
        std::fs::write(&mask, "").unwrap();
        assert_eq!(prepare_track(&config, dir.path(), "117", &[]).unwrap().ls_mask, Some(mask));
    }

    #[test]
    fn processed_tracks_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ts_dir = dir.path().join("Timeseries");
        std::fs::create_dir_all(&ts_dir).unwrap();
        std::fs::write(processed_marker(&ts_dir, "bs", Polarization::VV), "").unwrap();

        let config = ProcessingConfig::new(
            dir.path(),
            ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap(),
        );
        let vrt = ard_to_ts(&Gpt::new("gpt", 1), &config, dir.path(), "117", &[], Polarization::VV).unwrap();
        assert_eq!(vrt, ts_dir.join("Timeseries.bs.VV.vrt"));
    }
}
