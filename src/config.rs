//! ARD processing parameters and the project level processing configuration
//!
//! The JSON layout mirrors the nested parameter documents used by the
//! processing graphs: `single_ARD`, `time-series_ARD`, `time-scan_ARD`
//! and `mosaic`, wrapped into a `processing.json` that also carries the
//! directories and parallelism of a run.

use crate::types::{parse_polarizations, ProductType, SarError, SarResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Preset families of analysis ready data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArdType {
    #[serde(rename = "OST-GTC")]
    OstGtc,
    #[serde(rename = "OST-RTC")]
    OstRtc,
    #[serde(rename = "CEOS")]
    Ceos,
    #[serde(rename = "Earth-Engine")]
    EarthEngine,
}

impl ArdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArdType::OstGtc => "OST-GTC",
            ArdType::OstRtc => "OST-RTC",
            ArdType::Ceos => "CEOS",
            ArdType::EarthEngine => "Earth-Engine",
        }
    }
}

impl FromStr for ArdType {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // OST_GTC is accepted for older command lines
        match s.replace('_', "-").as_str() {
            "OST-GTC" => Ok(ArdType::OstGtc),
            "OST-RTC" => Ok(ArdType::OstRtc),
            "CEOS" => Ok(ArdType::Ceos),
            "Earth-Engine" => Ok(ArdType::EarthEngine),
            other => Err(SarError::Config(format!(
                "Unknown ARD type {}. It should be one of: OST-GTC, OST-RTC, CEOS, Earth-Engine",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ArdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Radiometric product of the backscatter chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationProduct {
    #[serde(rename = "GTC-sigma0")]
    GtcSigma0,
    #[serde(rename = "GTC-gamma0")]
    GtcGamma0,
    #[serde(rename = "RTC-gamma0")]
    RtcGamma0,
}

impl CalibrationProduct {
    /// Terrain flattening is part of the chain
    pub fn is_rtc(&self) -> bool {
        matches!(self, CalibrationProduct::RtcGamma0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Geocoding {
    Terrain,
    Ellipsoid,
}

/// SNAP single-image speckle filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeckleFilterType {
    None,
    Boxcar,
    Median,
    Frost,
    #[serde(rename = "Gamma Map")]
    GammaMap,
    Lee,
    #[serde(rename = "Refined Lee")]
    RefinedLee,
    #[serde(rename = "Lee Sigma")]
    LeeSigma,
    #[serde(rename = "IDAN")]
    Idan,
}

impl SpeckleFilterType {
    /// Name as understood by the Speckle-Filter operator
    pub fn snap_name(&self) -> &'static str {
        match self {
            SpeckleFilterType::None => "None",
            SpeckleFilterType::Boxcar => "Boxcar",
            SpeckleFilterType::Median => "Median",
            SpeckleFilterType::Frost => "Frost",
            SpeckleFilterType::GammaMap => "Gamma Map",
            SpeckleFilterType::Lee => "Lee",
            SpeckleFilterType::RefinedLee => "Refined Lee",
            SpeckleFilterType::LeeSigma => "Lee Sigma",
            SpeckleFilterType::Idan => "IDAN",
        }
    }
}

/// SNAP polarimetric speckle filters (SLC only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolarimetricFilterType {
    #[serde(rename = "Box Car Filter")]
    BoxCar,
    #[serde(rename = "IDAN Filter")]
    Idan,
    #[serde(rename = "Refined Lee Filter")]
    RefinedLee,
    #[serde(rename = "Improved Lee Sigma Filter")]
    ImprovedLeeSigma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemName {
    #[serde(rename = "Copernicus 30m Global DEM")]
    Copernicus30,
    #[serde(rename = "Copernicus 90m Global DEM")]
    Copernicus90,
    #[serde(rename = "SRTM 1Sec HGT")]
    Srtm1Sec,
    #[serde(rename = "SRTM 3Sec")]
    Srtm3Sec,
    #[serde(rename = "Aster 1sec GDEM")]
    Aster1Sec,
    #[serde(rename = "GETASSE30")]
    Getasse30,
    #[serde(rename = "External DEM")]
    External,
}

impl DemName {
    pub fn snap_name(&self) -> &'static str {
        match self {
            DemName::Copernicus30 => "Copernicus 30m Global DEM",
            DemName::Copernicus90 => "Copernicus 90m Global DEM",
            DemName::Srtm1Sec => "SRTM 1Sec HGT",
            DemName::Srtm3Sec => "SRTM 3Sec",
            DemName::Aster1Sec => "Aster 1sec GDEM",
            DemName::Getasse30 => "GETASSE30",
            DemName::External => "External DEM",
        }
    }

    pub fn is_srtm(&self) -> bool {
        matches!(self, DemName::Srtm1Sec | DemName::Srtm3Sec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resampling {
    NearestNeighbour,
    BilinearInterpolation,
    CubicConvolution,
    #[serde(rename = "BISINC_5_POINT_INTERPOLATION")]
    Bisinc5PointInterpolation,
    #[serde(rename = "BISINC_11_POINT_INTERPOLATION")]
    Bisinc11PointInterpolation,
    #[serde(rename = "BISINC_21_POINT_INTERPOLATION")]
    Bisinc21PointInterpolation,
    BicubicInterpolation,
    DelaunayInterpolation,
}

impl Resampling {
    pub fn snap_name(&self) -> &'static str {
        match self {
            Resampling::NearestNeighbour => "NEAREST_NEIGHBOUR",
            Resampling::BilinearInterpolation => "BILINEAR_INTERPOLATION",
            Resampling::CubicConvolution => "CUBIC_CONVOLUTION",
            Resampling::Bisinc5PointInterpolation => "BISINC_5_POINT_INTERPOLATION",
            Resampling::Bisinc11PointInterpolation => "BISINC_11_POINT_INTERPOLATION",
            Resampling::Bisinc21PointInterpolation => "BISINC_21_POINT_INTERPOLATION",
            Resampling::BicubicInterpolation => "BICUBIC_INTERPOLATION",
            Resampling::DelaunayInterpolation => "DELAUNAY_INTERPOLATION",
        }
    }
}

impl FromStr for Resampling {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_uppercase()))
            .map_err(|_| SarError::Config(format!("Unknown resampling method: {}", s)))
    }
}

/// Data type of exported GeoTIFF layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDtype {
    Float32,
    Uint8,
    Uint16,
}

impl OutputDtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputDtype::Float32 => "float32",
            OutputDtype::Uint8 => "uint8",
            OutputDtype::Uint16 => "uint16",
        }
    }
}

/// Multi-temporal statistics requested for a timescan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Median,
    Percentiles,
    Harmonics,
    Avg,
    Max,
    Min,
    Std,
    Cov,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeckleFilterConfig {
    pub filter: SpeckleFilterType,
    #[serde(rename = "ENL")]
    pub enl: u32,
    #[serde(rename = "estimate_ENL")]
    pub estimate_enl: bool,
    pub sigma: f64,
    pub filter_x_size: u32,
    pub filter_y_size: u32,
    pub window_size: String,
    pub target_window_size: String,
    pub num_of_looks: u32,
    pub damping: u32,
    pub pan_size: u32,
}

impl Default for SpeckleFilterConfig {
    fn default() -> Self {
        Self {
            filter: SpeckleFilterType::RefinedLee,
            enl: 1,
            estimate_enl: true,
            sigma: 0.9,
            filter_x_size: 3,
            filter_y_size: 3,
            window_size: "7x7".to_string(),
            target_window_size: "3x3".to_string(),
            num_of_looks: 1,
            damping: 2,
            pan_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolSpeckleFilterConfig {
    pub polarimetric_filter: PolarimetricFilterType,
    pub filter_size: u32,
    pub num_of_looks: u32,
    pub window_size: String,
    pub target_window_size: String,
    pub pan_size: u32,
    pub sigma: f64,
    pub search_window_size: u32,
    pub scale_size: u32,
}

impl Default for PolSpeckleFilterConfig {
    fn default() -> Self {
        Self {
            polarimetric_filter: PolarimetricFilterType::RefinedLee,
            filter_size: 5,
            num_of_looks: 1,
            window_size: "7x7".to_string(),
            target_window_size: "3x3".to_string(),
            pan_size: 50,
            sigma: 0.9,
            search_window_size: 15,
            scale_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemConfig {
    pub dem_name: DemName,
    #[serde(default)]
    pub dem_file: String,
    pub dem_nodata: u32,
    pub dem_resampling: Resampling,
    pub image_resampling: Resampling,
    pub egm_correction: bool,
    pub out_projection: u32,
}

impl DemConfig {
    /// Map projection string understood by SNAP's geocoding operators
    pub fn snap_projection(&self) -> String {
        match self.out_projection {
            code @ 42001..=97002 => format!("AUTO:{}", code),
            4326 => "WGS84(DD)".to_string(),
            code => format!("EPSG:{}", code),
        }
    }

    /// External DEM file or the empty string SNAP expects otherwise
    pub fn dem_file_param(&self) -> String {
        self.dem_file.trim().to_string()
    }
}

impl Default for DemConfig {
    fn default() -> Self {
        Self {
            dem_name: DemName::Copernicus30,
            dem_file: String::new(),
            dem_nodata: 0,
            dem_resampling: Resampling::BilinearInterpolation,
            image_resampling: Resampling::BicubicInterpolation,
            egm_correction: false,
            out_projection: 4326,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_coherence_bands() -> String {
    "VV, VH, HH, HV".to_string()
}

fn default_coherence_azimuth() -> u32 {
    3
}

fn default_coherence_range() -> u32 {
    10
}

/// Parameters for the processing of a single acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleArdConfig {
    pub image_type: ProductType,
    pub ard_type: ArdType,
    pub resolution: u32,
    #[serde(default = "default_true")]
    pub backscatter: bool,
    pub remove_border_noise: bool,
    pub product_type: CalibrationProduct,
    pub polarisation: String,
    pub to_db: bool,
    pub to_tif: bool,
    pub geocoding: Geocoding,
    pub remove_speckle: bool,
    pub speckle_filter: SpeckleFilterConfig,
    pub create_ls_mask: bool,
    #[serde(default)]
    pub apply_ls_mask: bool,
    pub dem: DemConfig,

    // SLC-only parameters, carried so SLC configurations validate and round-trip
    #[serde(default)]
    pub coherence: bool,
    #[serde(default = "default_coherence_bands")]
    pub coherence_bands: String,
    #[serde(default = "default_coherence_azimuth")]
    pub coherence_azimuth: u32,
    #[serde(default = "default_coherence_range")]
    pub coherence_range: u32,
    #[serde(default)]
    pub production: bool,
    #[serde(rename = "H-A-Alpha", default)]
    pub h_a_alpha: bool,
    #[serde(default)]
    pub remove_pol_speckle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pol_speckle_filter: Option<PolSpeckleFilterConfig>,
}

/// Parameters for the stacking of single ARDs into a time-series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesConfig {
    pub to_db: bool,
    pub remove_mt_speckle: bool,
    pub apply_ls_mask: bool,
    pub mt_speckle_filter: SpeckleFilterConfig,
    #[serde(default)]
    pub deseasonalize: bool,
    pub dtype_output: OutputDtype,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimescanConfig {
    pub metrics: Vec<Metric>,
    pub remove_outliers: bool,
    #[serde(default)]
    pub apply_ls_mask: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicConfig {
    pub harmonization: bool,
    #[serde(default)]
    pub production: bool,
    pub cut_to_aoi: bool,
}

/// The nested ARD parameter document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArdParameters {
    #[serde(rename = "single_ARD")]
    pub single_ard: SingleArdConfig,
    #[serde(rename = "time-series_ARD")]
    pub time_series_ard: TimeseriesConfig,
    #[serde(rename = "time-scan_ARD")]
    pub time_scan_ard: TimescanConfig,
    pub mosaic: MosaicConfig,
}

impl ArdParameters {
    /// Built-in parameter preset for a product type and ARD family
    pub fn template(image_type: ProductType, ard_type: ArdType) -> SarResult<Self> {
        if !matches!(image_type, ProductType::GRD | ProductType::SLC) {
            return Err(SarError::Config(format!(
                "No ARD template for {} products",
                image_type
            )));
        }

        let mut single = SingleArdConfig {
            image_type,
            ard_type,
            resolution: 20,
            backscatter: true,
            remove_border_noise: image_type == ProductType::GRD,
            product_type: CalibrationProduct::GtcGamma0,
            polarisation: "VV, VH, HH, HV".to_string(),
            to_db: false,
            to_tif: false,
            geocoding: Geocoding::Terrain,
            remove_speckle: false,
            speckle_filter: SpeckleFilterConfig::default(),
            create_ls_mask: true,
            apply_ls_mask: false,
            dem: DemConfig::default(),
            coherence: false,
            coherence_bands: default_coherence_bands(),
            coherence_azimuth: default_coherence_azimuth(),
            coherence_range: default_coherence_range(),
            production: false,
            h_a_alpha: false,
            remove_pol_speckle: false,
            pol_speckle_filter: None,
        };

        let mut time_series = TimeseriesConfig {
            to_db: true,
            remove_mt_speckle: true,
            apply_ls_mask: false,
            mt_speckle_filter: SpeckleFilterConfig {
                filter: SpeckleFilterType::Lee,
                filter_x_size: 5,
                filter_y_size: 5,
                ..SpeckleFilterConfig::default()
            },
            deseasonalize: false,
            dtype_output: OutputDtype::Float32,
        };

        match ard_type {
            ArdType::OstGtc => {}
            ArdType::OstRtc => {
                single.product_type = CalibrationProduct::RtcGamma0;
            }
            ArdType::Ceos => {
                single.product_type = CalibrationProduct::RtcGamma0;
                single.resolution = 10;
                single.remove_speckle = true;
                single.dem.image_resampling = Resampling::BilinearInterpolation;
            }
            ArdType::EarthEngine => {
                single.product_type = CalibrationProduct::GtcSigma0;
                single.resolution = 10;
                single.to_db = true;
                single.create_ls_mask = false;
                single.dem.dem_name = DemName::Srtm1Sec;
                single.dem.image_resampling = Resampling::BilinearInterpolation;
                time_series.to_db = false;
                time_series.remove_mt_speckle = false;
            }
        }

        if image_type == ProductType::SLC {
            single.coherence = true;
            single.coherence_bands = "VV, VH, HH, HV".to_string();
            single.pol_speckle_filter = Some(PolSpeckleFilterConfig::default());
        }

        Ok(Self {
            single_ard: single,
            time_series_ard: time_series,
            time_scan_ard: TimescanConfig {
                metrics: vec![Metric::Avg, Metric::Max, Metric::Min, Metric::Std, Metric::Cov],
                remove_outliers: true,
                apply_ls_mask: false,
            },
            mosaic: MosaicConfig {
                harmonization: true,
                production: false,
                cut_to_aoi: false,
            },
        })
    }

    pub fn from_json(json: &str) -> SarResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> SarResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Switch geocoding to an external DEM file
    pub fn set_external_dem(&mut self, dem_file: &Path, nodata: u32, egm_correction: bool) -> SarResult<()> {
        if !dem_file.exists() {
            return Err(SarError::Config(format!(
                "External DEM file not found: {}",
                dem_file.display()
            )));
        }
        let dem = &mut self.single_ard.dem;
        dem.dem_name = DemName::External;
        dem.dem_file = dem_file.to_string_lossy().into_owned();
        dem.dem_nodata = nodata;
        dem.egm_correction = egm_correction;
        Ok(())
    }

    /// SRTM does not reach beyond 60 degrees, fall back to Copernicus there
    pub fn adjust_dem_for_latitude(&mut self, center_lat: f64) -> bool {
        let dem = &mut self.single_ard.dem;
        if center_lat.abs() > 59.0 && dem.dem_name.is_srtm() {
            log::warn!(
                "Scene center latitude {:.2} is outside SRTM coverage, switching to {}",
                center_lat,
                DemName::Copernicus30.snap_name()
            );
            dem.dem_name = DemName::Copernicus30;
            return true;
        }
        false
    }
}

const POLARISATION_CHOICES: [&str; 6] = ["VV, VH, HH, HV", "VV", "VH", "VV, VH", "HH, HV", "VV, HH"];
const WINDOW_SIZES: [&str; 7] = ["5x5", "7x7", "9x9", "11x11", "13x13", "15x15", "17x17"];
const TARGET_WINDOW_SIZES: [&str; 2] = ["3x3", "5x5"];

fn check_range(key: &str, value: u32, min: u32, max_exclusive: u32) -> SarResult<()> {
    if value < min || value >= max_exclusive {
        return Err(SarError::Config(format!(
            "Configuration value for ARD parameter {} is wrong {}. It should be within {}..{}",
            key, value, min, max_exclusive
        )));
    }
    Ok(())
}

fn check_choice(key: &str, value: &str, choices: &[&str]) -> SarResult<()> {
    if !choices.contains(&value) {
        return Err(SarError::Config(format!(
            "Configuration value for ARD parameter {} is wrong {}. It should be one of: {:?}",
            key, value, choices
        )));
    }
    Ok(())
}

fn check_sigma(key: &str, sigma: f64) -> SarResult<()> {
    let tenths = sigma * 10.0;
    if (tenths - tenths.round()).abs() > 1e-6 || !(5.0..=9.0).contains(&tenths.round()) {
        return Err(SarError::Config(format!(
            "Configuration value for ARD parameter {} is wrong {}. It should be one of 0.5, 0.6, 0.7, 0.8, 0.9",
            key, sigma
        )));
    }
    Ok(())
}

fn check_speckle_filter(prefix: &str, speckle: &SpeckleFilterConfig) -> SarResult<()> {
    check_range(&format!("{}.ENL", prefix), speckle.enl, 1, 500)?;
    check_sigma(&format!("{}.sigma", prefix), speckle.sigma)?;
    check_range(&format!("{}.filter_x_size", prefix), speckle.filter_x_size, 1, 100)?;
    check_range(&format!("{}.filter_y_size", prefix), speckle.filter_y_size, 1, 100)?;
    check_choice(&format!("{}.window_size", prefix), &speckle.window_size, &WINDOW_SIZES)?;
    check_choice(
        &format!("{}.target_window_size", prefix),
        &speckle.target_window_size,
        &TARGET_WINDOW_SIZES,
    )?;
    check_range(&format!("{}.num_of_looks", prefix), speckle.num_of_looks, 1, 4)?;
    check_range(&format!("{}.damping", prefix), speckle.damping, 0, 100)?;
    check_range(&format!("{}.pan_size", prefix), speckle.pan_size, 1, 200)?;
    Ok(())
}

/// Validate every value of an ARD parameter document against its allowed range
pub fn check_ard_parameters(params: &ArdParameters) -> SarResult<()> {
    let single = &params.single_ard;

    check_range("resolution", single.resolution, 10, 5000)?;
    check_choice("polarisation", &single.polarisation, &POLARISATION_CHOICES)?;
    parse_polarizations(&single.polarisation)?;
    check_speckle_filter("speckle_filter", &single.speckle_filter)?;

    let dem = &single.dem;
    check_range("dem_nodata", dem.dem_nodata, 0, 66000)?;
    if dem.image_resampling == Resampling::DelaunayInterpolation {
        return Err(SarError::Config(
            "DELAUNAY_INTERPOLATION is not available for image resampling".to_string(),
        ));
    }
    if !(2000..42002).contains(&dem.out_projection) && !(42001..=97002).contains(&dem.out_projection) {
        return Err(SarError::Config(format!(
            "Configuration value for ARD parameter out_projection is wrong {}",
            dem.out_projection
        )));
    }
    if !dem.dem_file.trim().is_empty() && !Path::new(dem.dem_file.trim()).exists() {
        return Err(SarError::Config(format!(
            "External DEM file not found: {}",
            dem.dem_file
        )));
    }
    if dem.dem_name == DemName::External && dem.dem_file.trim().is_empty() {
        return Err(SarError::Config(
            "External DEM selected without a dem_file".to_string(),
        ));
    }

    check_choice("coherence_bands", &single.coherence_bands, &POLARISATION_CHOICES)?;
    check_range("coherence_azimuth", single.coherence_azimuth, 1, 100)?;
    check_range("coherence_range", single.coherence_range, 1, 500)?;
    if let Some(pol) = &single.pol_speckle_filter {
        check_range("pol_speckle_filter.filter_size", pol.filter_size, 1, 100)?;
        check_range("pol_speckle_filter.num_of_looks", pol.num_of_looks, 1, 4)?;
        check_choice("pol_speckle_filter.window_size", &pol.window_size, &WINDOW_SIZES)?;
        check_choice(
            "pol_speckle_filter.target_window_size",
            &pol.target_window_size,
            &TARGET_WINDOW_SIZES,
        )?;
        check_range("pol_speckle_filter.pan_size", pol.pan_size, 1, 200)?;
        check_sigma("pol_speckle_filter.sigma", pol.sigma)?;
        if pol.search_window_size % 2 == 0 {
            return Err(SarError::Config(format!(
                "search_window_size must be odd, got {}",
                pol.search_window_size
            )));
        }
        check_range("pol_speckle_filter.search_window_size", pol.search_window_size, 3, 27)?;
        check_range("pol_speckle_filter.scale_size", pol.scale_size, 0, 2)?;
    }

    check_speckle_filter("mt_speckle_filter", &params.time_series_ard.mt_speckle_filter)?;

    if params.time_scan_ard.metrics.is_empty() {
        return Err(SarError::Config("No timescan metrics selected".to_string()));
    }

    Ok(())
}

/// Project level processing configuration written as `processing.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub processing_dir: PathBuf,
    pub temp_dir: PathBuf,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub data_mount: Option<PathBuf>,
    pub snap_cpu_parallelism: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub subset: bool,
    /// Area of interest as WKT in EPSG:4326
    #[serde(default)]
    pub aoi: Option<String>,
    pub processing: ArdParameters,
}

fn default_max_workers() -> usize {
    1
}

impl ProcessingConfig {
    pub fn new<P: AsRef<Path>>(processing_dir: P, processing: ArdParameters) -> Self {
        let processing_dir = processing_dir.as_ref().to_path_buf();
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            temp_dir: processing_dir.join("temp"),
            processing_dir,
            download_dir: None,
            data_mount: None,
            snap_cpu_parallelism: cpus,
            max_workers: 1,
            subset: false,
            aoi: None,
            processing,
        }
    }

    /// Restrict processing to an area of interest
    pub fn with_aoi(mut self, wkt: &str) -> Self {
        self.aoi = Some(wkt.to_string());
        self.subset = true;
        self
    }

    /// Value handed to gpt's `-q` flag
    pub fn gpt_parallelism(&self) -> usize {
        2 * self.snap_cpu_parallelism.max(1)
    }

    pub fn validate(&self) -> SarResult<()> {
        if self.subset && self.aoi.is_none() {
            return Err(SarError::Config("subset requested without an aoi".to_string()));
        }
        if self.snap_cpu_parallelism == 0 || self.max_workers == 0 {
            return Err(SarError::Config(
                "snap_cpu_parallelism and max_workers must be positive".to_string(),
            ));
        }
        check_ard_parameters(&self.processing)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let path = path.as_ref();
        log::debug!("Reading processing configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> SarResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::debug!("Wrote processing configuration to {}", path.display());
        Ok(())
    }
}
