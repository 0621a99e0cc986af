//! SNAP operator wrappers
//!
//! Every wrapper comes in two halves: a `*_command` builder that turns the
//! configuration into a [`GptCommand`], and a runner that executes it with
//! retries and verifies the written product.

use crate::config::{ArdParameters, CalibrationProduct, Geocoding, ProcessingConfig, SpeckleFilterConfig};
use crate::core::dimap::{check_out_dimap, DimapProduct};
use crate::core::gpt::{with_retries, Gpt, GptCommand, STEP_ATTEMPTS};
use crate::core::graphs::Graph;
use crate::types::{Polarization, SarError, SarResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SNAP wants `VV,VH` where the configuration holds `VV, VH`
pub fn snap_polarisations(list: &str) -> String {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn graph_dir(config: &ProcessingConfig) -> &Path {
    &config.temp_dir
}

fn aoi(config: &ProcessingConfig) -> SarResult<&str> {
    config
        .aoi
        .as_deref()
        .ok_or_else(|| SarError::Config("Subset requested without an aoi".to_string()))
}

/// Import one frame: orbit file, thermal noise removal, optional subset to the aoi
pub fn frame_import_command(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    with_subset: bool,
) -> SarResult<GptCommand> {
    let polarisations = snap_polarisations(&config.processing.single_ard.polarisation);

    let cmd = if with_subset {
        gpt.graph(&Graph::GrdImportSubset.path_in(graph_dir(config)))
            .param_path("input", input)
            .param("region", aoi(config)?)
            .param("polarisation", polarisations)
            .param_path("output", output.prefix())
    } else {
        gpt.graph(&Graph::GrdImport.path_in(graph_dir(config)))
            .param_path("input", input)
            .param("polarisation", polarisations)
            .param_path("output", output.prefix())
    };
    Ok(cmd)
}

/// Assemble consecutive frames of one acquisition
pub fn slice_assembly_command(
    gpt: &Gpt,
    ard: &ArdParameters,
    inputs: &[PathBuf],
    output: &DimapProduct,
) -> GptCommand {
    let mut cmd = gpt
        .operator("SliceAssembly")
        .param("selectedPolarisations", snap_polarisations(&ard.single_ard.polarisation))
        .target(output.prefix());
    for input in inputs {
        cmd = cmd.source(input);
    }
    cmd
}

/// Cut an imported product to the area of interest
pub fn subset_command(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
) -> SarResult<GptCommand> {
    Ok(gpt
        .operator("Subset")
        .param("copyMetadata", "true")
        .param("geoRegion", aoi(config)?)
        .named_source("source", input)
        .target(output.prefix()))
}

pub fn calibration_command(
    gpt: &Gpt,
    ard: &ArdParameters,
    input: &Path,
    output: &DimapProduct,
) -> GptCommand {
    let (beta, gamma, sigma) = match ard.single_ard.product_type {
        CalibrationProduct::GtcSigma0 => (false, false, true),
        CalibrationProduct::GtcGamma0 => (false, true, false),
        // terrain flattening needs beta nought
        CalibrationProduct::RtcGamma0 => (true, false, false),
    };
    gpt.operator("Calibration")
        .param("outputBetaBand", beta)
        .param("outputGammaBand", gamma)
        .param("outputSigmaBand", sigma)
        .target(output.prefix())
        .source(input)
}

/// Looks applied in both directions to reach the target resolution
pub fn multilook_factor(resolution: u32) -> u32 {
    (resolution / 10).max(1)
}

pub fn multilook_command(gpt: &Gpt, ard: &ArdParameters, input: &Path, output: &DimapProduct) -> GptCommand {
    let factor = multilook_factor(ard.single_ard.resolution);
    gpt.operator("Multilook")
        .param("nAzLooks", factor)
        .param("nRgLooks", factor)
        .target(output.prefix())
        .source(input)
}

fn with_speckle_params(cmd: GptCommand, speckle: &SpeckleFilterConfig) -> GptCommand {
    cmd.param("estimateENL", speckle.estimate_enl)
        .param("anSize", speckle.pan_size)
        .param("dampingFactor", speckle.damping)
        .param("enl", speckle.enl)
        .param("filter", speckle.filter.snap_name())
        .param("filterSizeX", speckle.filter_x_size)
        .param("filterSizeY", speckle.filter_y_size)
        .param("numLooksStr", speckle.num_of_looks)
        .param("sigmaStr", speckle.sigma)
        .param("targetWindowSizeStr", &speckle.target_window_size)
        .param("windowSize", &speckle.window_size)
}

pub fn speckle_filter_command(
    gpt: &Gpt,
    speckle: &SpeckleFilterConfig,
    input: &Path,
    output: &DimapProduct,
) -> GptCommand {
    with_speckle_params(gpt.operator("Speckle-Filter"), speckle)
        .target(output.prefix())
        .source(input)
}

pub fn mt_speckle_filter_command(
    gpt: &Gpt,
    speckle: &SpeckleFilterConfig,
    input: &Path,
    output: &DimapProduct,
) -> GptCommand {
    with_speckle_params(gpt.operator("Multi-Temporal-Speckle-Filter"), speckle)
        .target(output.prefix())
        .source(input)
}

pub fn terrain_flattening_command(
    gpt: &Gpt,
    ard: &ArdParameters,
    input: &Path,
    output: &DimapProduct,
) -> GptCommand {
    let dem = &ard.single_ard.dem;
    gpt.operator("Terrain-Flattening")
        .param("additionalOverlap", 0.15)
        .param("oversamplingMultiple", 1.5)
        .param("demName", dem.dem_name.snap_name())
        .param("demResamplingMethod", dem.dem_resampling.snap_name())
        .param("externalDEMFile", dem.dem_file_param())
        .param("externalDEMNoDataValue", dem.dem_nodata)
        .param("externalDEMApplyEGM", dem.egm_correction)
        .target(output.prefix())
        .source(input)
}

pub fn linear_to_db_command(gpt: &Gpt, input: &Path, output: &DimapProduct) -> GptCommand {
    gpt.operator("LinearToFromdB")
        .target(output.prefix())
        .source(input)
}

/// Range-Doppler terrain correction or ellipsoid correction
pub fn terrain_correction_command(
    gpt: &Gpt,
    ard: &ArdParameters,
    input: &Path,
    output: &DimapProduct,
) -> GptCommand {
    let dem = &ard.single_ard.dem;
    let operator = match ard.single_ard.geocoding {
        Geocoding::Terrain => "Terrain-Correction",
        Geocoding::Ellipsoid => "Ellipsoid-Correction-RD",
    };
    gpt.operator(operator)
        .param("demName", dem.dem_name.snap_name())
        .param("demResamplingMethod", dem.dem_resampling.snap_name())
        .param("externalDEMFile", dem.dem_file_param())
        .param("externalDEMNoDataValue", dem.dem_nodata)
        .param("externalDEMApplyEGM", dem.egm_correction)
        .param("imgResamplingMethod", dem.image_resampling.snap_name())
        .param("pixelSpacingInMeter", ard.single_ard.resolution)
        .param("alignToStandardGrid", true)
        .param("mapProjection", dem.snap_projection())
        .target(output.prefix())
        .source(input)
}

/// Layover/shadow mask through the SAR simulation graph
pub fn ls_mask_command(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
) -> GptCommand {
    let single = &config.processing.single_ard;
    let dem = &single.dem;
    gpt.graph(&Graph::LsMask.path_in(graph_dir(config)))
        .param_path("input", input)
        .param("resol", single.resolution)
        .param("dem", dem.dem_name.snap_name())
        .param("dem_file", dem.dem_file_param())
        .param("dem_nodata", dem.dem_nodata)
        .param("dem_resampling", dem.dem_resampling.snap_name())
        .param("image_resampling", dem.image_resampling.snap_name())
        .param("egm_correction", dem.egm_correction)
        .param("projection", dem.snap_projection())
        .param_path("output", output.prefix())
}

/// What goes into a multi-temporal stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackSelection {
    Polarisation(Polarization),
    /// Bands whose name starts with the pattern
    BandPattern(String),
}

pub fn create_stack_command(
    gpt: &Gpt,
    config: &ProcessingConfig,
    inputs: &[PathBuf],
    output: &DimapProduct,
    selection: &StackSelection,
) -> GptCommand {
    let filelist = inputs
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(",");

    match selection {
        StackSelection::Polarisation(pol) => gpt
            .graph(&Graph::BackscatterStack.path_in(graph_dir(config)))
            .param("filelist", filelist)
            .param("pol", pol)
            .param_path("output", output.prefix()),
        StackSelection::BandPattern(pattern) => gpt
            .graph(&Graph::BandPatternStack.path_in(graph_dir(config)))
            .param("filelist", filelist)
            .param("bandPattern", format!("{}.*", pattern))
            .param_path("output", output.prefix()),
    }
}

/// Run a step with retries and verify its product.
///
/// A failed attempt leaves no partial product behind.
pub fn run_step(
    step: &str,
    cmd: &GptCommand,
    output: &DimapProduct,
    logfile: &Path,
    test_stats: bool,
) -> SarResult<DimapProduct> {
    log::debug!("{}: writing {}", step, output.prefix().display());
    with_retries(step, STEP_ATTEMPTS, Duration::from_secs(1), || {
        let result = cmd
            .run(step, logfile)
            .and_then(|_| check_out_dimap(output, test_stats));
        if let Err(e) = result {
            output.delete()?;
            return Err(e);
        }
        Ok(output.clone())
    })
}

/// Make sure the graphs a command refers to exist on disk
fn ensure_graphs(config: &ProcessingConfig, graphs: &[Graph]) -> SarResult<()> {
    for graph in graphs {
        graph.materialize(graph_dir(config))?;
    }
    Ok(())
}

pub fn frame_import(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    with_subset: bool,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    ensure_graphs(config, &[Graph::GrdImport, Graph::GrdImportSubset])?;
    let cmd = frame_import_command(gpt, config, input, output, with_subset)?;
    run_step("Frame import", &cmd, output, logfile, true)
}

pub fn slice_assembly(
    gpt: &Gpt,
    config: &ProcessingConfig,
    inputs: &[PathBuf],
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = slice_assembly_command(gpt, &config.processing, inputs, output);
    run_step("Slice assembly", &cmd, output, logfile, true)
}

pub fn subset(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = subset_command(gpt, config, input, output)?;
    run_step("Subset", &cmd, output, logfile, true)
}

pub fn calibration(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = calibration_command(gpt, &config.processing, input, output);
    run_step("Calibration", &cmd, output, logfile, true)
}

pub fn multilook(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = multilook_command(gpt, &config.processing, input, output);
    run_step("Multi-look", &cmd, output, logfile, true)
}

pub fn speckle_filter(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = speckle_filter_command(gpt, &config.processing.single_ard.speckle_filter, input, output);
    run_step("Speckle filter", &cmd, output, logfile, true)
}

pub fn mt_speckle_filter(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = mt_speckle_filter_command(
        gpt,
        &config.processing.time_series_ard.mt_speckle_filter,
        input,
        output,
    );
    run_step("Multi-temporal speckle filter", &cmd, output, logfile, true)
}

pub fn terrain_flattening(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = terrain_flattening_command(gpt, &config.processing, input, output);
    run_step("Terrain flattening", &cmd, output, logfile, true)
}

pub fn linear_to_db(
    gpt: &Gpt,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = linear_to_db_command(gpt, input, output);
    run_step("dB conversion", &cmd, output, logfile, true)
}

pub fn terrain_correction(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    let cmd = terrain_correction_command(gpt, &config.processing, input, output);
    run_step("Geocoding", &cmd, output, logfile, true)
}

pub fn ls_mask(
    gpt: &Gpt,
    config: &ProcessingConfig,
    input: &Path,
    output: &DimapProduct,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    ensure_graphs(config, &[Graph::LsMask])?;
    let cmd = ls_mask_command(gpt, config, input, output);
    run_step("Layover/shadow mask", &cmd, output, logfile, false)
}

pub fn create_stack(
    gpt: &Gpt,
    config: &ProcessingConfig,
    inputs: &[PathBuf],
    output: &DimapProduct,
    selection: &StackSelection,
    logfile: &Path,
) -> SarResult<DimapProduct> {
    ensure_graphs(config, &[Graph::BackscatterStack, Graph::BandPatternStack])?;
    let cmd = create_stack_command(gpt, config, inputs, output, selection);
    run_step("Stacking", &cmd, output, logfile, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArdType, DemName};
    use crate::types::ProductType;

    fn config(ard_type: ArdType) -> ProcessingConfig {
        let mut config = ProcessingConfig::new(
            "/data/proc",
            ArdParameters::template(ProductType::GRD, ard_type).unwrap(),
        );
        config.snap_cpu_parallelism = 2;
        config
    }

    fn gpt() -> Gpt {
        Gpt::new("/opt/snap/bin/gpt", 2)
    }

    #[test]
    fn calibration_flags_follow_product_type() {
        let out = DimapProduct::new("/tmp/x.cal");
        let gtc = calibration_command(&gpt(), &config(ArdType::OstGtc).processing, Path::new("in.dim"), &out);
        assert_eq!(gtc.get("outputGammaBand"), Some("true"));
        assert_eq!(gtc.get("outputBetaBand"), Some("false"));

        let rtc = calibration_command(&gpt(), &config(ArdType::OstRtc).processing, Path::new("in.dim"), &out);
        assert_eq!(rtc.get("outputBetaBand"), Some("true"));

        let ee = calibration_command(&gpt(), &config(ArdType::EarthEngine).processing, Path::new("in.dim"), &out);
        assert_eq!(ee.get("outputSigmaBand"), Some("true"));
        assert_eq!(ee.args()[..4], ["Calibration", "-x", "-q", "4"]);
    }

    #[test]
    fn import_uses_subset_graph_with_aoi() {
        let out = DimapProduct::new("/tmp/import");
        let plain = frame_import_command(&gpt(), &config(ArdType::OstGtc), Path::new("/s1/a.zip"), &out, false).unwrap();
        assert!(plain.operator.ends_with("grd_import.xml"));
        assert_eq!(plain.get("polarisation"), Some("VV,VH,HH,HV"));
        assert_eq!(plain.get("output"), Some("/tmp/import"));

        let subset_cfg = config(ArdType::OstGtc).with_aoi("POLYGON ((1 1, 2 1, 2 2, 1 1))");
        let sub = frame_import_command(&gpt(), &subset_cfg, Path::new("/s1/a.zip"), &out, true).unwrap();
        assert!(sub.operator.ends_with("grd_import_subset.xml"));
        assert_eq!(sub.get("region"), Some("POLYGON ((1 1, 2 1, 2 2, 1 1))"));

        let broken = config(ArdType::OstGtc);
        assert!(frame_import_command(&gpt(), &broken, Path::new("/s1/a.zip"), &out, true).is_err());
    }

    #[test]
    fn geocoding_parameters() {
        let mut cfg = config(ArdType::OstGtc);
        cfg.processing.single_ard.dem.out_projection = 32633;
        let out = DimapProduct::new("/tmp/tc");
        let tc = terrain_correction_command(&gpt(), &cfg.processing, Path::new("in.dim"), &out);
        assert_eq!(tc.operator, "Terrain-Correction");
        assert_eq!(tc.get("mapProjection"), Some("EPSG:32633"));
        assert_eq!(tc.get("pixelSpacingInMeter"), Some("20"));
        assert_eq!(tc.get("alignToStandardGrid"), Some("true"));
        assert_eq!(tc.get("demName"), Some(DemName::Copernicus30.snap_name()));

        cfg.processing.single_ard.geocoding = Geocoding::Ellipsoid;
        let ec = terrain_correction_command(&gpt(), &cfg.processing, Path::new("in.dim"), &out);
        assert_eq!(ec.operator, "Ellipsoid-Correction-RD");
    }

    #[test]
    fn speckle_parameters() {
        let speckle = SpeckleFilterConfig::default();
        let cmd = speckle_filter_command(&gpt(), &speckle, Path::new("in.dim"), &DimapProduct::new("/tmp/spk"));
        assert_eq!(cmd.get("filter"), Some("Refined Lee"));
        assert_eq!(cmd.get("windowSize"), Some("7x7"));
        assert_eq!(cmd.get("sigmaStr"), Some("0.9"));
        let mt = mt_speckle_filter_command(&gpt(), &speckle, Path::new("in.dim"), &DimapProduct::new("/tmp/mt"));
        assert_eq!(mt.operator, "Multi-Temporal-Speckle-Filter");
    }

    #[test]
    fn multilook_factors() {
        assert_eq!(multilook_factor(10), 1);
        assert_eq!(multilook_factor(20), 2);
        assert_eq!(multilook_factor(100), 10);
    }

    #[test]
    fn stack_inputs_are_comma_joined() {
        let cfg = config(ArdType::OstGtc);
        let cmd = create_stack_command(
            &gpt(),
            &cfg,
            &[PathBuf::from("/a.bs.dim"), PathBuf::from("/b.bs.dim")],
            &DimapProduct::new("/tmp/stack"),
            &StackSelection::Polarisation(Polarization::VH),
        );
        assert_eq!(cmd.get("filelist"), Some("/a.bs.dim,/b.bs.dim"));
        assert_eq!(cmd.get("pol"), Some("VH"));

        let cmd = create_stack_command(
            &gpt(),
            &cfg,
            &[PathBuf::from("/a.dim")],
            &DimapProduct::new("/tmp/stack"),
            &StackSelection::BandPattern("Alpha".to_string()),
        );
        assert_eq!(cmd.get("bandPattern"), Some("Alpha.*"));
    }
}
