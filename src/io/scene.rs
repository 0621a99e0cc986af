//! Sentinel-1 product identifiers and where their files live

use crate::types::{AcquisitionMode, Mission, Polarization, ProductType, SarError, SarResult};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

const ASF_DATAPOOL: &str = "https://datapool.asf.alaska.edu";

const SCENE_PATTERN: &str = r"^(S1[A-D])_(IW|EW|WV|S[1-6])_(GRD|SLC|OCN|RAW)([HMF_])_([012])([SA])(SH|SV|DH|DV|HH|HV|VV|VH)_(\d{8}T\d{6})_(\d{8}T\d{6})_(\d{6})_([0-9A-F]{6})_([0-9A-F]{4})$";

/// A parsed Sentinel-1 product identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel1Scene {
    pub scene_id: String,
    pub mission: Mission,
    pub mode: AcquisitionMode,
    pub product_type: ProductType,
    /// `H`, `M`, `F` for GRD or `_` for SLC
    pub resolution_class: char,
    pub processing_level: char,
    pub product_class: char,
    pub pol_mode: String,
    pub start: NaiveDateTime,
    pub stop: NaiveDateTime,
    pub abs_orbit: u32,
    pub data_take: String,
    pub unique_id: String,
}

/// Summary of a scene as printed by `info`
#[derive(Debug, Clone, Serialize)]
pub struct SceneInfo {
    #[serde(rename = "Scene_Identifier")]
    pub scene_identifier: String,
    #[serde(rename = "Satellite")]
    pub satellite: String,
    #[serde(rename = "Acquisition_Mode")]
    pub acquisition_mode: String,
    #[serde(rename = "Processing_Level")]
    pub processing_level: String,
    #[serde(rename = "Product_Type")]
    pub product_type: String,
    #[serde(rename = "Acquisition_Date")]
    pub acquisition_date: String,
    #[serde(rename = "Start_Time")]
    pub start_time: String,
    #[serde(rename = "Stop_Time")]
    pub stop_time: String,
    #[serde(rename = "Absolute_Orbit")]
    pub absolute_orbit: u32,
    #[serde(rename = "Relative_Orbit")]
    pub relative_orbit: u32,
}

impl Sentinel1Scene {
    /// Parse a scene identifier, with or without `.zip`/`.SAFE` suffix
    pub fn parse(id: &str) -> SarResult<Self> {
        let id = id
            .trim()
            .trim_end_matches(".zip")
            .trim_end_matches(".SAFE");

        let pattern = Regex::new(SCENE_PATTERN)
            .map_err(|e| SarError::Processing(format!("Scene pattern: {}", e)))?;
        let caps = pattern
            .captures(id)
            .ok_or_else(|| SarError::InvalidFormat(format!("Not a Sentinel-1 scene identifier: {}", id)))?;

        let mission = Mission::from_code(&caps[1])?;
        let mode = AcquisitionMode::from_code(&caps[2])?;
        let product_type: ProductType = caps[3].parse()?;
        let char_at = |i: usize| caps[i].chars().next().unwrap_or('_');

        let start = NaiveDateTime::parse_from_str(&caps[8], "%Y%m%dT%H%M%S")
            .map_err(|e| SarError::InvalidFormat(format!("Bad start time in {}: {}", id, e)))?;
        let stop = NaiveDateTime::parse_from_str(&caps[9], "%Y%m%dT%H%M%S")
            .map_err(|e| SarError::InvalidFormat(format!("Bad stop time in {}: {}", id, e)))?;

        let abs_orbit = caps[10]
            .parse::<u32>()
            .map_err(|e| SarError::InvalidFormat(format!("Bad orbit number in {}: {}", id, e)))?;

        Ok(Self {
            scene_id: id.to_string(),
            mission,
            mode,
            product_type,
            resolution_class: char_at(4),
            processing_level: char_at(5),
            product_class: char_at(6),
            pol_mode: caps[7].to_string(),
            start,
            stop,
            abs_orbit,
            data_take: caps[11].to_string(),
            unique_id: caps[12].to_string(),
        })
    }

    /// Scene identifier from a product file name such as `<id>.zip`
    pub fn from_path<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let name = path
            .as_ref()
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SarError::InvalidFormat(format!("No file name in {}", path.as_ref().display())))?;
        Self::parse(name)
    }

    pub fn relative_orbit(&self) -> u32 {
        let offset = self.mission.orbit_offset() as i64;
        ((self.abs_orbit as i64 - offset).rem_euclid(175) + 1) as u32
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.start.date()
    }

    /// `YYYYMMDD` of the acquisition start
    pub fn start_date(&self) -> String {
        self.start.format("%Y%m%d").to_string()
    }

    /// Identifier of the processed acquisition, `<YYYYMMDD>_<track>`
    pub fn file_id(&self) -> String {
        format!("{}_{}", self.start_date(), self.relative_orbit())
    }

    /// Polarisations contained in the product
    pub fn polarizations(&self) -> Vec<Polarization> {
        match self.pol_mode.as_str() {
            "DV" => vec![Polarization::VV, Polarization::VH],
            "DH" => vec![Polarization::HH, Polarization::HV],
            "SV" | "VV" => vec![Polarization::VV],
            "SH" | "HH" => vec![Polarization::HH],
            "VH" => vec![Polarization::VH],
            "HV" => vec![Polarization::HV],
            _ => Vec::new(),
        }
    }

    pub fn info(&self) -> SceneInfo {
        let level = match self.processing_level {
            '0' => "Level 0".to_string(),
            c => format!("Level {}", c),
        };
        SceneInfo {
            scene_identifier: self.scene_id.clone(),
            satellite: self.mission.satellite_name().to_string(),
            acquisition_mode: self.mode.long_name().to_string(),
            processing_level: level,
            product_type: self.product_type.long_name().to_string(),
            acquisition_date: self.start.format("%Y-%m-%d").to_string(),
            start_time: self.start.format("%H:%M:%S").to_string(),
            stop_time: self.stop.format("%H:%M:%S").to_string(),
            absolute_orbit: self.abs_orbit,
            relative_orbit: self.relative_orbit(),
        }
    }

    fn date_dirs(&self) -> PathBuf {
        PathBuf::from(self.start.format("%Y").to_string())
            .join(self.start.format("%m").to_string())
            .join(self.start.format("%d").to_string())
    }

    /// `<dir>/SAR/<TYPE>/<YYYY>/<MM>/<DD>/<id>.zip`
    pub fn download_path<P: AsRef<Path>>(&self, download_dir: P, mkdir: bool) -> SarResult<PathBuf> {
        let dir = download_dir
            .as_ref()
            .join("SAR")
            .join(self.product_type.to_string())
            .join(self.date_dirs());
        if mkdir {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir.join(format!("{}.zip", self.scene_id)))
    }

    /// Marker file written once a download passed the archive check
    pub fn download_marker<P: AsRef<Path>>(&self, download_dir: P) -> SarResult<PathBuf> {
        Ok(self.download_path(download_dir, false)?.with_extension("downloaded"))
    }

    /// Product location on a CREODIAS style data mount
    pub fn creodias_path<P: AsRef<Path>>(&self, data_mount: P) -> PathBuf {
        data_mount
            .as_ref()
            .join("Sentinel-1")
            .join("SAR")
            .join(self.product_type.to_string())
            .join(self.date_dirs())
            .join(format!("{}.SAFE", self.scene_id))
    }

    /// Product location on an ONDA DIAS style data mount
    pub fn onda_path<P: AsRef<Path>>(&self, data_mount: P) -> PathBuf {
        let onda_class = &self.scene_id[4..14];
        data_mount
            .as_ref()
            .join("S1")
            .join("LEVEL-1")
            .join(onda_class)
            .join(self.date_dirs())
            .join(format!("{}.zip", self.scene_id))
            .join(format!("{}.SAFE", self.scene_id))
    }

    /// Locate the product: a finished download first, then the data mounts
    pub fn get_path(&self, download_dir: Option<&Path>, data_mount: Option<&Path>) -> SarResult<Option<PathBuf>> {
        if let Some(dir) = download_dir {
            if self.download_marker(dir)?.exists() {
                let path = self.download_path(dir, false)?;
                log::debug!("Found downloaded product {}", path.display());
                return Ok(Some(path));
            }
        }

        if let Some(mount) = data_mount {
            let creodias = self.creodias_path(mount);
            if creodias.join("manifest.safe").exists() {
                return Ok(Some(creodias));
            }
            let onda = self.onda_path(mount);
            if onda.exists() {
                return Ok(Some(onda));
            }
        }

        Ok(None)
    }

    /// Download URL in the ASF data pool
    pub fn asf_url(&self) -> SarResult<String> {
        let folder = match self.product_type {
            ProductType::SLC => "SLC".to_string(),
            ProductType::GRD => {
                let pol_initial = self.pol_mode.chars().next().unwrap_or('D');
                format!("GRD_{}{}", self.resolution_class, pol_initial)
            }
            other => {
                return Err(SarError::Download(format!(
                    "No ASF data pool folder for {} products",
                    other
                )))
            }
        };
        Ok(format!(
            "{}/{}/{}/{}.zip",
            ASF_DATAPOOL,
            folder,
            self.mission.asf_tag(),
            self.scene_id
        ))
    }
}

impl std::fmt::Display for Sentinel1Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.scene_id)
    }
}

impl std::str::FromStr for Sentinel1Scene {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
