use sarprep::config::{ArdParameters, ArdType, DemName, OutputDtype, ProcessingConfig};
use sarprep::types::{ProductType, SarError};

#[test]
fn test_processing_json_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let params = ArdParameters::template(ProductType::GRD, ArdType::OstRtc).unwrap();
    let mut config = ProcessingConfig::new(dir.path(), params)
        .with_aoi("POLYGON((10 45, 11 45, 11 46, 10 46, 10 45))");
    config.processing.time_series_ard.dtype_output = OutputDtype::Uint16;

    let path = dir.path().join("processing.json");
    config.save(&path).unwrap();
    let loaded = ProcessingConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert!(loaded.validate().is_ok());

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["processing"]["time-series_ARD"]["dtype_output"], "uint16");
}

#[test]
fn test_invalid_resolution_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap();
    params.single_ard.resolution = 0;
    let config = ProcessingConfig::new(dir.path(), params);
    assert!(matches!(config.validate(), Err(SarError::Config(_))));
}

#[test]
fn test_subset_needs_an_aoi() {
    let dir = tempfile::tempdir().unwrap();
    let params = ArdParameters::template(ProductType::GRD, ArdType::Ceos).unwrap();
    let mut config = ProcessingConfig::new(dir.path(), params);
    config.subset = true;
    assert!(config.validate().is_err());
}

#[test]
fn test_external_dem_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap();
    assert!(params.set_external_dem(&dir.path().join("missing.tif"), 0, true).is_err());

    let dem = dir.path().join("dem.tif");
    std::fs::write(&dem, b"").unwrap();
    params.set_external_dem(&dem, 0, false).unwrap();
    assert_eq!(params.single_ard.dem.dem_name, DemName::External);
    assert!(!params.single_ard.dem.egm_correction);
}
