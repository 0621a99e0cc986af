//! Batch processing of an inventory of GRD scenes
//!
//! Frames are grouped into acquisitions per track and date, processed to
//! ARD on a bounded worker pool and then combined into time-series,
//! timescans and mosaics.

use crate::config::{OutputDtype, ProcessingConfig};
use crate::core::gpt::Gpt;
use crate::core::grd_to_ard::{ArdJob, ArdOutputs};
use crate::core::mosaic::{self, MosaicOptions};
use crate::core::timescan::{self, expand_metrics, TimescanParams};
use crate::core::timeseries::{self, ard_to_ts};
use crate::io::scene::Sentinel1Scene;
use crate::types::{parse_polarizations, Polarization, ProductType, SarError, SarResult};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One scene of an inventory, with its product file when known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub scene: Sentinel1Scene,
    pub path: Option<PathBuf>,
}

impl InventoryEntry {
    /// Parse an inventory line, either a scene identifier or a product path
    pub fn parse(line: &str) -> SarResult<Self> {
        let path = Path::new(line);
        if path.exists() {
            Ok(Self {
                scene: Sentinel1Scene::from_path(path)?,
                path: Some(path.to_path_buf()),
            })
        } else {
            Ok(Self {
                scene: Sentinel1Scene::parse(line)?,
                path: None,
            })
        }
    }

    /// Product file, falling back to the download directory and data mount
    pub fn locate(&self, config: &ProcessingConfig) -> SarResult<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        self.scene
            .get_path(config.download_dir.as_deref(), config.data_mount.as_deref())?
            .ok_or_else(|| {
                SarError::Processing(format!("No product file found for {}", self.scene.scene_id))
            })
    }
}

/// All frames of one track taken on one date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub track: u32,
    pub date: NaiveDate,
    /// Frames in along-track order
    pub frames: Vec<InventoryEntry>,
}

impl Acquisition {
    pub fn file_id(&self) -> String {
        format!("{}_{}", self.date.format("%Y%m%d"), self.track)
    }

    pub fn output_dir(&self, processing_dir: &Path) -> PathBuf {
        processing_dir
            .join(self.track.to_string())
            .join(self.date.format("%Y%m%d").to_string())
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.frames.iter().map(|f| f.scene.scene_id.clone()).collect()
    }
}

/// Scenes selected for processing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub entries: Vec<InventoryEntry>,
}

impl Inventory {
    pub fn new(entries: Vec<InventoryEntry>) -> Self {
        Self { entries }
    }

    /// Read one identifier or product path per line; `#` starts a comment
    pub fn from_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(InventoryEntry::parse)
            .collect::<SarResult<Vec<_>>>()?;
        log::info!("Read {} scenes from {}", entries.len(), path.as_ref().display());
        Ok(Self { entries })
    }

    /// Relative orbits in the inventory, ascending
    pub fn tracks(&self) -> Vec<u32> {
        let mut tracks: Vec<u32> = self.entries.iter().map(|e| e.scene.relative_orbit()).collect();
        tracks.sort_unstable();
        tracks.dedup();
        tracks
    }

    /// Polarisations present in the inventory
    pub fn polarizations(&self) -> Vec<Polarization> {
        let mut pols = Vec::new();
        for entry in &self.entries {
            for pol in entry.scene.polarizations() {
                if !pols.contains(&pol) {
                    pols.push(pol);
                }
            }
        }
        pols
    }

    /// Group frames by track and acquisition date
    pub fn acquisitions(&self) -> Vec<Acquisition> {
        let mut groups: BTreeMap<(u32, NaiveDate), Vec<InventoryEntry>> = BTreeMap::new();
        for entry in &self.entries {
            groups
                .entry((entry.scene.relative_orbit(), entry.scene.acquisition_date()))
                .or_default()
                .push(entry.clone());
        }
        groups
            .into_iter()
            .map(|((track, date), mut frames)| {
                frames.sort_by_key(|f| f.scene.start);
                frames.dedup_by(|a, b| a.scene.scene_id == b.scene.scene_id);
                Acquisition { track, date, frames }
            })
            .collect()
    }
}

/// Outcome of one acquisition in a batch
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedAcquisition {
    pub identifiers: Vec<String>,
    pub outfile: Option<PathBuf>,
    pub out_ls: Option<PathBuf>,
    pub error: Option<String>,
}

impl ProcessedAcquisition {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

fn worker_pool(config: &ProcessingConfig) -> SarResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_workers.max(1))
        .build()
        .map_err(|e| SarError::Processing(format!("Failed to create worker pool: {}", e)))
}

fn process_acquisition(gpt: &Gpt, config: &ProcessingConfig, acquisition: &Acquisition) -> SarResult<ArdOutputs> {
    if acquisition.frames.iter().any(|f| f.scene.product_type != ProductType::GRD) {
        return Err(SarError::Processing(format!(
            "{} contains non-GRD products",
            acquisition.file_id()
        )));
    }
    let output_dir = acquisition.output_dir(&config.processing_dir);
    let file_id = acquisition.file_id();
    if output_dir.join(".processed").exists() {
        log::info!("Acquisition {} already processed", file_id);
        let ls = output_dir.join(format!("{}.LS.dim", file_id));
        return Ok(ArdOutputs {
            backscatter: output_dir.join(format!("{}.bs.dim", file_id)),
            ls_mask: if ls.exists() { Some(ls) } else { None },
            geotiff: None,
        });
    }

    let inputs = acquisition
        .frames
        .iter()
        .map(|f| f.locate(config))
        .collect::<SarResult<Vec<_>>>()?;
    ArdJob::new(gpt, config, &file_id, &output_dir, inputs).run()
}

/// Process every acquisition of the inventory to backscatter ARD.
///
/// At most `max_workers` acquisitions run at once. Failures are recorded in
/// the returned list and do not stop the batch.
pub fn grd_to_ard_batch(gpt: &Gpt, config: &ProcessingConfig, inventory: &Inventory) -> SarResult<Vec<ProcessedAcquisition>> {
    config.validate()?;
    let acquisitions = inventory.acquisitions();
    log::info!(
        "Processing {} acquisitions with {} workers",
        acquisitions.len(),
        config.max_workers
    );

    let pool = worker_pool(config)?;
    let results = pool.install(|| {
        acquisitions
            .par_iter()
            .map(|acquisition| {
                let identifiers = acquisition.identifiers();
                match process_acquisition(gpt, config, acquisition) {
                    Ok(outputs) => ProcessedAcquisition {
                        identifiers,
                        outfile: Some(outputs.backscatter),
                        out_ls: outputs.ls_mask,
                        error: None,
                    },
                    Err(e) => {
                        log::error!("Acquisition {} failed: {}", acquisition.file_id(), e);
                        ProcessedAcquisition {
                            identifiers,
                            outfile: None,
                            out_ls: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .collect::<Vec<_>>()
    });

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        log::warn!("{} of {} acquisitions failed", failed, results.len());
    }
    Ok(results)
}

/// Backscatter products of a track, one per acquisition date
pub fn track_products(track_dir: &Path) -> SarResult<Vec<PathBuf>> {
    let mut dims = Vec::new();
    if !track_dir.is_dir() {
        return Ok(dims);
    }
    for date_dir in std::fs::read_dir(track_dir)? {
        let date_dir = date_dir?.path();
        if !date_dir.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&date_dir)? {
            let path = entry?.path();
            if path.to_string_lossy().ends_with(".bs.dim") {
                dims.push(path);
            }
        }
    }
    dims.sort();
    Ok(dims)
}

/// Polarisations to carry into time-series: configured and present in the inventory
fn batch_polarizations(config: &ProcessingConfig, inventory: &Inventory) -> SarResult<Vec<Polarization>> {
    let configured = parse_polarizations(&config.processing.single_ard.polarisation)?;
    let present = inventory.polarizations();
    Ok(configured.into_iter().filter(|p| present.contains(p)).collect())
}

/// Create the time-series of every track and polarisation
pub fn ards_to_timeseries(gpt: &Gpt, config: &ProcessingConfig, inventory: &Inventory) -> SarResult<Vec<PathBuf>> {
    let pols = batch_polarizations(config, inventory)?;
    let mut jobs = Vec::new();
    for track in inventory.tracks() {
        let track_dir = config.processing_dir.join(track.to_string());
        let dims = track_products(&track_dir)?;
        if dims.len() < 2 {
            log::warn!("Track {} has {} processed acquisitions, no time-series", track, dims.len());
            continue;
        }
        // shared by all polarisations, so not left to the parallel jobs
        timeseries::prepare_track(config, &track_dir, &track.to_string(), &dims)?;
        for pol in &pols {
            jobs.push((track, track_dir.clone(), dims.clone(), *pol));
        }
    }

    let pool = worker_pool(config)?;
    pool.install(|| {
        jobs.par_iter()
            .map(|(track, track_dir, dims, pol)| {
                ard_to_ts(gpt, config, track_dir, &track.to_string(), dims, *pol)
            })
            .collect::<SarResult<Vec<_>>>()
    })
}

/// Acquisition dates of the time-series layers of one polarisation, in layer order
pub fn timeseries_dates(ts_dir: &Path, pol: Polarization) -> SarResult<Vec<NaiveDate>> {
    let suffix = format!(".{}.{}.tif", timeseries::BACKSCATTER, pol);
    let mut names: Vec<String> = std::fs::read_dir(ts_dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.ends_with(&suffix))
        .collect();
    names.sort();
    names
        .iter()
        .map(|n| {
            let token = n.split('.').nth(1).unwrap_or_default();
            NaiveDate::parse_from_str(token, "%y%m%d")
                .map_err(|e| SarError::InvalidFormat(format!("No date in layer {}: {}", n, e)))
        })
        .collect()
}

/// Timescan parameters shared by all tracks of a batch
pub fn timescan_params(config: &ProcessingConfig, dates: Option<Vec<NaiveDate>>) -> TimescanParams {
    let ard = &config.processing;
    let dtype = ard.time_series_ard.dtype_output;
    TimescanParams {
        metrics: ard.time_scan_ard.metrics.clone(),
        dtype,
        rescale: dtype != OutputDtype::Float32,
        to_power: ard.single_ard.to_db || ard.time_series_ard.to_db,
        remove_outliers: ard.time_scan_ard.remove_outliers,
        dates,
        ls_mask: None,
    }
}

/// Merged layover/shadow mask of a track, when timescans are to be masked
fn track_ls_mask(config: &ProcessingConfig, track_dir: &Path, track: &str) -> Option<PathBuf> {
    if !config.processing.time_scan_ard.apply_ls_mask {
        return None;
    }
    let mask = timeseries::ls_mask_file(track_dir, track);
    if mask.exists() {
        Some(mask)
    } else {
        log::warn!("Track {}: no layover/shadow mask at {}, timescan stays unmasked", track, mask.display());
        None
    }
}

/// Compute the timescan of every track's time-series
pub fn timeseries_to_timescan(config: &ProcessingConfig, inventory: &Inventory) -> SarResult<Vec<PathBuf>> {
    let mut vrts = Vec::new();
    for track in inventory.tracks() {
        log::info!("Entering track {}", track);
        let track_dir = config.processing_dir.join(track.to_string());
        let ts_dir = track_dir.join("Timeseries");
        let timescan_dir = track_dir.join("Timescan");
        std::fs::create_dir_all(&timescan_dir)?;

        let mut names: Vec<&'static str> = Vec::new();
        for pol in [Polarization::VV, Polarization::VH, Polarization::HH, Polarization::HV] {
            let stack = timeseries::timeseries_vrt(&ts_dir, timeseries::BACKSCATTER, pol);
            if !stack.exists() {
                continue;
            }
            let prefix = timescan_dir.join(format!("{}.{}", timeseries::BACKSCATTER, pol));
            let mut params = timescan_params(config, Some(timeseries_dates(&ts_dir, pol)?));
            params.ls_mask = track_ls_mask(config, &track_dir, &track.to_string());
            for name in params.output_metrics() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            if timescan::processed_marker(&prefix).exists() {
                log::info!("Timescan of track {} {} already processed", track, pol);
                continue;
            }
            timescan::mt_metrics(&stack, &prefix, &params)?;
        }

        if !names.is_empty() {
            vrts.push(timescan::create_tscan_vrt(&timescan_dir, &names)?);
        }
    }
    Ok(vrts)
}

/// Mosaic the time-series of all tracks
pub fn mosaic_timeseries(config: &ProcessingConfig) -> SarResult<Vec<PathBuf>> {
    mosaic::mosaic_timeseries(&config.processing_dir, &MosaicOptions::from_config(config))
}

/// Mosaic the timescans of all tracks
pub fn mosaic_timescan(config: &ProcessingConfig) -> SarResult<PathBuf> {
    let names = expand_metrics(&config.processing.time_scan_ard.metrics, true);
    mosaic::mosaic_timescan(&config.processing_dir, &names, &MosaicOptions::from_config(config))
}

/// Stages run after the single acquisitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStages {
    pub timeseries: bool,
    pub timescan: bool,
    pub mosaic: bool,
}

/// Run a whole batch: ARD, then the requested multi-temporal stages
pub fn process_inventory(
    gpt: &Gpt,
    config: &ProcessingConfig,
    inventory: &Inventory,
    stages: BatchStages,
) -> SarResult<Vec<ProcessedAcquisition>> {
    let processed = grd_to_ard_batch(gpt, config, inventory)?;

    if stages.timeseries || stages.timescan {
        ards_to_timeseries(gpt, config, inventory)?;
    }
    if stages.timescan {
        timeseries_to_timescan(config, inventory)?;
    }
    if stages.mosaic && inventory.tracks().len() > 1 {
        if stages.timeseries {
            mosaic_timeseries(config)?;
        }
        if stages.timescan {
            mosaic_timescan(config)?;
        }
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArdParameters, ArdType, Metric};

    const FRAME_1: &str = "S1A_IW_GRDH_1SDV_20200114T170503_20200114T170528_030802_038831_2F2C";
    const FRAME_2: &str = "S1A_IW_GRDH_1SDV_20200114T170528_20200114T170553_030802_038831_5D3C";
    const OTHER_DATE: &str = "S1A_IW_GRDH_1SDV_20200126T170503_20200126T170528_030977_038E47_1A1B";

    fn inventory(ids: &[&str]) -> Inventory {
        Inventory::new(ids.iter().map(|id| InventoryEntry::parse(id).unwrap()).collect())
    }

    fn config(dir: &Path) -> ProcessingConfig {
        ProcessingConfig::new(dir, ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap())
    }

    #[test]
    fn frames_are_grouped_per_acquisition() {
        let inv = inventory(&[FRAME_2, OTHER_DATE, FRAME_1]);
        let acquisitions = inv.acquisitions();
        assert_eq!(acquisitions.len(), 2);
        assert_eq!(acquisitions[0].identifiers(), vec![FRAME_1.to_string(), FRAME_2.to_string()]);
        assert_eq!(acquisitions[0].file_id(), format!("20200114_{}", acquisitions[0].track));
        assert_eq!(acquisitions[1].frames.len(), 1);
        assert_eq!(inv.tracks().len(), 1);
    }

    #[test]
    fn inventory_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("inventory.txt");
        std::fs::write(&file, format!("# scenes\n{}\n\n{}\n", FRAME_1, OTHER_DATE)).unwrap();
        let inv = Inventory::from_file(&file).unwrap();
        assert_eq!(inv.entries.len(), 2);
        assert_eq!(inv.polarizations(), vec![Polarization::VV, Polarization::VH]);
    }

    #[test]
    fn missing_products_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let inv = inventory(&[FRAME_1, OTHER_DATE]);
        let results = grd_to_ard_batch(&Gpt::new("gpt", 1), &config, &inv).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_ok() && r.outfile.is_none()));
    }

    #[test]
    fn processed_acquisitions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let inv = inventory(&[FRAME_1]);
        let acquisition = &inv.acquisitions()[0];
        let out = acquisition.output_dir(dir.path());
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(".processed"), "").unwrap();

        let results = grd_to_ard_batch(&Gpt::new("gpt", 1), &config, &inv).unwrap();
        assert!(results[0].is_ok());
        assert_eq!(
            results[0].outfile.as_deref(),
            Some(out.join(format!("{}.bs.dim", acquisition.file_id())).as_path())
        );
    }

    #[test]
    fn timescan_uses_the_track_ls_mask_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        let track_dir = dir.path().join("117");
        std::fs::create_dir_all(&track_dir).unwrap();
        let mask = timeseries::ls_mask_file(&track_dir, "117");
        std::fs::write(&mask, "").unwrap();

        config.processing.time_scan_ard.apply_ls_mask = false;
        assert_eq!(track_ls_mask(&config, &track_dir, "117"), None);
        config.processing.time_scan_ard.apply_ls_mask = true;
        assert_eq!(track_ls_mask(&config, &track_dir, "117"), Some(mask.clone()));
        std::fs::remove_file(&mask).unwrap();
        assert_eq!(track_ls_mask(&config, &track_dir, "117"), None);
    }

    #[test]
    fn layer_dates_follow_file_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["02.200126.bs.VV.tif", "01.200114.bs.VV.tif", "01.200114.bs.VH.tif"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let dates = timeseries_dates(dir.path(), Polarization::VV).unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2020, 1, 14).unwrap(),
                NaiveDate::from_ymd_opt(2020, 1, 26).unwrap()
            ]
        );
    }

    #[test]
    fn timescan_scaling_follows_time_series_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.processing.time_series_ard.dtype_output = OutputDtype::Uint8;
        config.processing.time_scan_ard.metrics = vec![Metric::Avg];
        let params = timescan_params(&config, None);
        assert!(params.rescale);
        assert!(params.to_power);
        assert_eq!(params.output_metrics(), vec!["avg"]);
    }

    #[test]
    fn products_are_found_in_date_folders() {
        let dir = tempfile::tempdir().unwrap();
        for date in ["20200114", "20200126"] {
            let d = dir.path().join(date);
            std::fs::create_dir_all(&d).unwrap();
            std::fs::write(d.join(format!("{}_117.bs.dim", date)), "").unwrap();
            std::fs::write(d.join(format!("{}_117.LS.dim", date)), "").unwrap();
        }
        assert_eq!(track_products(dir.path()).unwrap().len(), 2);
        assert!(track_products(&dir.path().join("missing")).unwrap().is_empty());
    }
}
