//! GRD to analysis ready backscatter
//!
//! The chain is planned from the ARD parameters first and then executed
//! step by step. Every step writes a new DIMAP product into the temporary
//! directory and deletes its input, so at most two intermediate products
//! exist at any time.

use crate::config::{ArdParameters, OutputDtype, ProcessingConfig};
use crate::core::border_noise::remove_product_border_noise;
use crate::core::dimap::{check_out_dimap, with_added_extension, DimapProduct};
use crate::core::gpt::Gpt;
use crate::core::raster::dimap_to_tif;
use crate::core::wrappers;
use crate::io::{SafeManifest, Sentinel1Scene};
use crate::types::{ProductType, SarError, SarResult};
use std::path::{Path, PathBuf};

/// Processing steps of the GRD chain, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArdStep {
    FrameImport,
    SliceAssembly,
    Subset,
    BorderNoise,
    Calibration,
    Multilook,
    LsMask,
    SpeckleFilter,
    TerrainFlattening,
    LinearToDb,
    Geocoding,
}

impl ArdStep {
    /// Suffix of the temporary product written by the step
    pub fn suffix(&self) -> &'static str {
        match self {
            ArdStep::FrameImport | ArdStep::SliceAssembly | ArdStep::BorderNoise => "_imported",
            ArdStep::Subset => "_imported_subset",
            ArdStep::Calibration => "_cal",
            ArdStep::Multilook => "_ml",
            ArdStep::LsMask => ".ls_mask",
            ArdStep::SpeckleFilter => "_spk",
            ArdStep::TerrainFlattening => "_flat",
            ArdStep::LinearToDb => "_db",
            ArdStep::Geocoding => "_bs",
        }
    }

    /// Name of the error log written into the output directory
    pub fn logfile_name(&self, file_id: &str) -> String {
        match self {
            ArdStep::FrameImport => format!("{}.Import.errLog", file_id),
            ArdStep::SliceAssembly => format!("{}.SliceAssembly.errLog", file_id),
            ArdStep::Subset => format!("{}.Subset.errLog", file_id),
            ArdStep::BorderNoise => format!("{}.BorderNoise.errLog", file_id),
            ArdStep::Calibration => format!("{}.Calibration.errLog", file_id),
            ArdStep::Multilook => format!("{}.multilook.errLog", file_id),
            ArdStep::LsMask => format!("{}.ls_mask.errLog", file_id),
            ArdStep::SpeckleFilter => format!("{}.Speckle.errLog", file_id),
            ArdStep::TerrainFlattening => format!("{}.tf.errLog", file_id),
            ArdStep::LinearToDb => format!("{}.db.errLog", file_id),
            ArdStep::Geocoding => format!("{}_bs.errLog", file_id),
        }
    }
}

/// Steps for an acquisition made of `frames` input products
pub fn plan_steps(ard: &ArdParameters, frames: usize, subset: bool) -> Vec<ArdStep> {
    let single = &ard.single_ard;
    let mut steps = vec![ArdStep::FrameImport];

    if frames > 1 {
        steps.push(ArdStep::SliceAssembly);
        if subset {
            steps.push(ArdStep::Subset);
        }
    }
    // the swath edges are gone after a subset
    if single.remove_border_noise && !subset {
        steps.push(ArdStep::BorderNoise);
    }
    steps.push(ArdStep::Calibration);
    if single.resolution >= 20 {
        steps.push(ArdStep::Multilook);
    }
    if single.create_ls_mask {
        steps.push(ArdStep::LsMask);
    }
    if single.remove_speckle {
        steps.push(ArdStep::SpeckleFilter);
    }
    if single.product_type.is_rtc() {
        steps.push(ArdStep::TerrainFlattening);
    }
    if single.to_db {
        steps.push(ArdStep::LinearToDb);
    }
    steps.push(ArdStep::Geocoding);
    steps
}

/// Products written by a finished acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArdOutputs {
    /// `<output_dir>/<file_id>.bs.dim`
    pub backscatter: PathBuf,
    /// `<output_dir>/<file_id>.LS.dim`
    pub ls_mask: Option<PathBuf>,
    /// `<output_dir>/<file_id>.bs.tif`
    pub geotiff: Option<PathBuf>,
}

/// One acquisition on its way through the GRD chain
pub struct ArdJob<'a> {
    pub gpt: &'a Gpt,
    pub config: &'a ProcessingConfig,
    pub file_id: String,
    pub output_dir: PathBuf,
    /// Frames of one acquisition, in along-track order
    pub inputs: Vec<PathBuf>,
}

fn frame_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl<'a> ArdJob<'a> {
    pub fn new<P: AsRef<Path>>(
        gpt: &'a Gpt,
        config: &'a ProcessingConfig,
        file_id: &str,
        output_dir: P,
        inputs: Vec<PathBuf>,
    ) -> Self {
        Self {
            gpt,
            config,
            file_id: file_id.to_string(),
            output_dir: output_dir.as_ref().to_path_buf(),
            inputs,
        }
    }

    /// Scratch directory of this acquisition below the configured temp dir
    pub fn temp_dir(&self) -> PathBuf {
        self.config.temp_dir.join(&self.file_id)
    }

    pub fn processed_marker(&self) -> PathBuf {
        self.output_dir.join(".processed")
    }

    pub fn final_product(&self) -> DimapProduct {
        DimapProduct::new(self.output_dir.join(format!("{}.bs", self.file_id)))
    }

    pub fn ls_mask_product(&self) -> DimapProduct {
        DimapProduct::new(self.output_dir.join(format!("{}.LS", self.file_id)))
    }

    fn temp_product(&self, step: ArdStep) -> DimapProduct {
        DimapProduct::new(self.temp_dir().join(format!("{}{}", self.file_id, step.suffix())))
    }

    fn logfile(&self, step: ArdStep) -> PathBuf {
        self.output_dir.join(step.logfile_name(&self.file_id))
    }

    /// Run the full chain.
    ///
    /// On failure the scratch directory is removed and the error returned.
    pub fn run(&self) -> SarResult<ArdOutputs> {
        if self.inputs.is_empty() {
            return Err(SarError::Processing(format!("No input products for {}", self.file_id)));
        }
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(self.temp_dir())?;

        let result = self.execute();
        if let Err(e) = &result {
            log::error!("Processing of {} failed: {}", self.file_id, e);
        }
        if let Err(e) = std::fs::remove_dir_all(self.temp_dir()) {
            log::debug!("Could not remove {}: {}", self.temp_dir().display(), e);
        }
        result
    }

    fn execute(&self) -> SarResult<ArdOutputs> {
        let ard = &self.config.processing;
        let steps = plan_steps(ard, self.inputs.len(), self.config.subset);
        log::info!(
            "Processing {} with steps {:?}",
            self.file_id,
            steps
        );

        let mut current: Option<DimapProduct> = None;
        let mut ls_mask = None;

        for step in steps {
            let input = current.as_ref();
            let next = match (step, input) {
                (ArdStep::FrameImport, _) => Some(self.import_frames()?),
                (ArdStep::BorderNoise, Some(product)) => {
                    log::info!("Removing border noise of {}", self.file_id);
                    remove_product_border_noise(product)?;
                    None
                }
                (ArdStep::LsMask, Some(product)) => {
                    ls_mask = Some(self.create_ls_mask(product)?);
                    None
                }
                (step, Some(product)) => Some(self.apply(step, product)?),
                (step, None) => {
                    return Err(SarError::Processing(format!("{:?} has no input product", step)))
                }
            };

            if let Some(next) = next {
                if let Some(previous) = current.replace(next) {
                    previous.delete()?;
                }
            }
        }

        let geocoded = current
            .ok_or_else(|| SarError::Processing("Chain produced no output".to_string()))?;
        self.finish(geocoded, ls_mask)
    }

    fn import_frames(&self) -> SarResult<DimapProduct> {
        let logfile = self.logfile(ArdStep::FrameImport);

        if let [single] = self.inputs.as_slice() {
            let output = self.temp_product(ArdStep::FrameImport);
            log::info!("Importing {}", single.display());
            return wrappers::frame_import(self.gpt, self.config, single, &output, self.config.subset, &logfile);
        }

        let mut frames = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let stem = frame_stem(input);
            let output = DimapProduct::new(self.temp_dir().join(format!("{}_imported", stem)));
            let logfile = self.output_dir.join(format!("{}.Import.errLog", stem));
            log::info!("Importing frame {}", input.display());
            frames.push(wrappers::frame_import(self.gpt, self.config, input, &output, false, &logfile)?);
        }

        let assembled = self.temp_product(ArdStep::SliceAssembly);
        let dims: Vec<PathBuf> = frames.iter().map(DimapProduct::dim).collect();
        let result = wrappers::slice_assembly(
            self.gpt,
            self.config,
            &dims,
            &assembled,
            &self.logfile(ArdStep::SliceAssembly),
        );
        for frame in &frames {
            frame.delete()?;
        }
        result
    }

    fn apply(&self, step: ArdStep, input: &DimapProduct) -> SarResult<DimapProduct> {
        let output = self.temp_product(step);
        let logfile = self.logfile(step);
        let dim = input.dim();
        log::info!("{:?} of {}", step, self.file_id);

        match step {
            ArdStep::Subset => wrappers::subset(self.gpt, self.config, &dim, &output, &logfile),
            ArdStep::Calibration => wrappers::calibration(self.gpt, self.config, &dim, &output, &logfile),
            ArdStep::Multilook => wrappers::multilook(self.gpt, self.config, &dim, &output, &logfile),
            ArdStep::SpeckleFilter => wrappers::speckle_filter(self.gpt, self.config, &dim, &output, &logfile),
            ArdStep::TerrainFlattening => {
                wrappers::terrain_flattening(self.gpt, self.config, &dim, &output, &logfile)
            }
            ArdStep::LinearToDb => wrappers::linear_to_db(self.gpt, &dim, &output, &logfile),
            ArdStep::Geocoding => wrappers::terrain_correction(self.gpt, self.config, &dim, &output, &logfile),
            other => Err(SarError::Processing(format!("{:?} does not produce a new product", other))),
        }
    }

    fn create_ls_mask(&self, input: &DimapProduct) -> SarResult<DimapProduct> {
        let output = self.temp_product(ArdStep::LsMask);
        log::info!("Creating layover/shadow mask of {}", self.file_id);
        let mask = wrappers::ls_mask(self.gpt, self.config, &input.dim(), &output, &self.logfile(ArdStep::LsMask))?;
        mask.move_to(self.ls_mask_product().prefix())
    }

    fn finish(&self, geocoded: DimapProduct, ls_mask: Option<DimapProduct>) -> SarResult<ArdOutputs> {
        if let Err(e) = check_out_dimap(&geocoded, true) {
            geocoded.delete()?;
            return Err(e);
        }
        let final_product = geocoded.move_to(self.final_product().prefix())?;

        let geotiff = if self.config.processing.single_ard.to_tif {
            let tif = with_added_extension(final_product.prefix(), "tif");
            Some(dimap_to_tif(&final_product, &tif, false, OutputDtype::Float32)?)
        } else {
            None
        };

        std::fs::write(self.processed_marker(), "passed all tests\n")?;
        log::info!("Finished {} -> {}", self.file_id, final_product.dim().display());

        Ok(ArdOutputs {
            backscatter: final_product.dim(),
            ls_mask: ls_mask.map(|m| m.dim()),
            geotiff,
        })
    }
}

/// Options for processing a single scene
#[derive(Debug, Clone, Default)]
pub struct CreateArdOptions {
    /// Area of interest as WKT in EPSG:4326
    pub subset: Option<String>,
    /// Reprocess even if a `.processed` marker exists
    pub overwrite: bool,
    /// Explicit gpt executable, located automatically otherwise
    pub gpt: Option<PathBuf>,
}

impl Sentinel1Scene {
    /// Output directory of this scene below a processing directory
    pub fn ard_dir<P: AsRef<Path>>(&self, processing_dir: P) -> PathBuf {
        processing_dir
            .as_ref()
            .join(self.relative_orbit().to_string())
            .join(self.start_date())
    }

    /// Process a GRD product into backscatter ARD below `out_dir`.
    ///
    /// The parameters are checked against the scene location, validated and
    /// written to `<out_dir>/processing.json` before processing starts.
    pub fn create_ard<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        infile: P,
        out_dir: Q,
        mut params: ArdParameters,
        options: &CreateArdOptions,
    ) -> SarResult<ArdOutputs> {
        if self.product_type != ProductType::GRD {
            return Err(SarError::Processing(
                "ARD creation of single products is only available for GRD products".to_string(),
            ));
        }
        let infile = infile.as_ref();
        let out_dir = out_dir.as_ref();

        let manifest = SafeManifest::open(infile)?;
        let center_lat = manifest.center_lat();
        params.adjust_dem_for_latitude(center_lat);
        if center_lat.abs() > 59.0 && params.single_ard.dem.out_projection == 4326 {
            log::info!(
                "Scene is located towards the poles, consider a polar stereographic projection (e.g. 3413 or 3976)"
            );
        }

        let mut config = ProcessingConfig::new(out_dir, params);
        if let Some(aoi) = &options.subset {
            config = config.with_aoi(aoi);
        }
        config.validate()?;
        std::fs::create_dir_all(&config.temp_dir)?;
        config.save(out_dir.join("processing.json"))?;

        let output_dir = self.ard_dir(out_dir);
        let marker = output_dir.join(".processed");
        if marker.exists() {
            if !options.overwrite {
                log::info!("{} has already been processed", self.scene_id);
                let job_output = output_dir.join(format!("{}.bs", self.file_id()));
                return Ok(ArdOutputs {
                    backscatter: with_added_extension(&job_output, "dim"),
                    ls_mask: None,
                    geotiff: None,
                });
            }
            std::fs::remove_file(&marker)?;
        }

        let gpt = match &options.gpt {
            Some(path) => Gpt::new(path, config.snap_cpu_parallelism),
            None => Gpt::locate(config.snap_cpu_parallelism)?,
        };

        let file_id = self.file_id();
        let job = ArdJob::new(&gpt, &config, &file_id, &output_dir, vec![infile.to_path_buf()]);
        let outputs = job.run()?;

        if let Err(e) = std::fs::remove_dir_all(&config.temp_dir) {
            log::debug!("Could not remove {}: {}", config.temp_dir.display(), e);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArdType;

    fn params(ard_type: ArdType) -> ArdParameters {
        ArdParameters::template(ProductType::GRD, ard_type).unwrap()
    }

    #[test]
    fn gtc_plan() {
        let steps = plan_steps(&params(ArdType::OstGtc), 1, false);
        assert_eq!(
            steps,
            vec![
                ArdStep::FrameImport,
                ArdStep::BorderNoise,
                ArdStep::Calibration,
                ArdStep::Multilook,
                ArdStep::LsMask,
                ArdStep::Geocoding,
            ]
        );
    }

    #[test]
    fn ceos_plan_has_speckle_filter_and_flattening() {
        let steps = plan_steps(&params(ArdType::Ceos), 1, false);
        assert!(!steps.contains(&ArdStep::Multilook));
        assert!(steps.contains(&ArdStep::SpeckleFilter));
        assert!(steps.contains(&ArdStep::TerrainFlattening));
    }

    #[test]
    fn earth_engine_plan_converts_to_db() {
        let steps = plan_steps(&params(ArdType::EarthEngine), 1, false);
        assert_eq!(steps[steps.len() - 2], ArdStep::LinearToDb);
        assert!(!steps.contains(&ArdStep::LsMask));
    }

    #[test]
    fn several_frames_are_assembled_then_subset() {
        let steps = plan_steps(&params(ArdType::OstGtc), 3, true);
        assert_eq!(&steps[..3], &[ArdStep::FrameImport, ArdStep::SliceAssembly, ArdStep::Subset]);
        assert!(!steps.contains(&ArdStep::BorderNoise));

        let single_subset = plan_steps(&params(ArdType::OstGtc), 1, true);
        assert!(!single_subset.contains(&ArdStep::Subset));
    }

    #[test]
    fn logfile_names() {
        assert_eq!(ArdStep::FrameImport.logfile_name("20200101_117"), "20200101_117.Import.errLog");
        assert_eq!(ArdStep::Geocoding.logfile_name("20200101_117"), "20200101_117_bs.errLog");
        assert_eq!(ArdStep::TerrainFlattening.logfile_name("x"), "x.tf.errLog");
    }

    #[test]
    fn job_layout() {
        let config = ProcessingConfig::new("/proc", params(ArdType::OstGtc));
        let gpt = Gpt::new("gpt", 1);
        let job = ArdJob::new(&gpt, &config, "20200101_117", "/proc/117/20200101", vec![]);
        assert_eq!(job.final_product().dim(), PathBuf::from("/proc/117/20200101/20200101_117.bs.dim"));
        assert_eq!(job.ls_mask_product().prefix(), Path::new("/proc/117/20200101/20200101_117.LS"));
        assert_eq!(job.temp_dir(), PathBuf::from("/proc/temp/20200101_117"));
        assert!(matches!(job.run(), Err(SarError::Processing(_))));
    }

    #[test]
    fn slc_scenes_are_rejected() {
        let scene =
            Sentinel1Scene::parse("S1A_IW_SLC__1SDV_20200101T053938_20200101T054005_030599_038163_9C4E").unwrap();
        let err = scene
            .create_ard(
                "/nowhere.zip",
                "/tmp/out",
                ArdParameters::template(ProductType::SLC, ArdType::OstGtc).unwrap(),
                &CreateArdOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SarError::Processing(_)));
    }
}
