use sarprep::config::{ArdParameters, ArdType, ProcessingConfig};
use sarprep::core::dimap::DimapProduct;
use sarprep::core::gpt::Gpt;
use sarprep::core::wrappers;
use sarprep::types::ProductType;
use std::path::{Path, PathBuf};

fn gtc_config(dir: &Path) -> ProcessingConfig {
    let params = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).expect("template");
    ProcessingConfig::new(dir, params)
}

#[test]
fn test_calibration_flags_follow_product_type() {
    let gpt = Gpt::new("/opt/snap/bin/gpt", 4);
    let dir = PathBuf::from("/data/proc");

    let gtc = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap();
    let args = wrappers::calibration_command(&gpt, &gtc, Path::new("in.dim"), &DimapProduct::new(dir.join("cal")))
        .args();
    println!("GTC calibration: {}", args.join(" "));
    assert_eq!(args[0], "Calibration");
    assert!(args.contains(&"-PoutputGammaBand=true".to_string()));
    assert!(args.contains(&"-PoutputBetaBand=false".to_string()));

    let ee = ArdParameters::template(ProductType::GRD, ArdType::EarthEngine).unwrap();
    let args = wrappers::calibration_command(&gpt, &ee, Path::new("in.dim"), &DimapProduct::new(dir.join("cal")))
        .args();
    assert!(args.contains(&"-PoutputSigmaBand=true".to_string()));

    let rtc = ArdParameters::template(ProductType::GRD, ArdType::OstRtc).unwrap();
    let args = wrappers::calibration_command(&gpt, &rtc, Path::new("in.dim"), &DimapProduct::new(dir.join("cal")))
        .args();
    assert!(args.contains(&"-PoutputBetaBand=true".to_string()));
    assert!(args.contains(&"-PoutputSigmaBand=false".to_string()));
}

#[test]
fn test_parallelism_is_passed_to_every_operator() {
    let gpt = Gpt::new("gpt", 3);
    let params = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap();
    let out = DimapProduct::new("/tmp/out");

    for args in [
        wrappers::multilook_command(&gpt, &params, Path::new("in.dim"), &out).args(),
        wrappers::terrain_correction_command(&gpt, &params, Path::new("in.dim"), &out).args(),
        wrappers::linear_to_db_command(&gpt, Path::new("in.dim"), &out).args(),
    ] {
        assert_eq!(&args[1..4], &["-x".to_string(), "-q".to_string(), "3".to_string()]);
        let t = args.iter().position(|a| a == "-t").expect("target flag");
        assert_eq!(args[t + 1], "/tmp/out");
        assert_eq!(args.last().map(String::as_str), Some("in.dim"));
    }
}

#[test]
fn test_multilook_follows_resolution() {
    let gpt = Gpt::new("gpt", 1);
    let mut params = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap();
    params.single_ard.resolution = 30;
    let args = wrappers::multilook_command(&gpt, &params, Path::new("in.dim"), &DimapProduct::new("ml")).args();
    assert!(args.contains(&"-PnAzLooks=3".to_string()));
    assert!(args.contains(&"-PnRgLooks=3".to_string()));
}

#[test]
fn test_subset_and_import_use_the_aoi() {
    let dir = tempfile::tempdir().unwrap();
    let wkt = "POLYGON((10 45, 11 45, 11 46, 10 46, 10 45))";
    let gpt = Gpt::new("gpt", 2);

    let config = gtc_config(dir.path());
    let out = DimapProduct::new(dir.path().join("imported"));
    assert!(wrappers::frame_import_command(&gpt, &config, Path::new("s1.zip"), &out, true).is_err());

    let config = gtc_config(dir.path()).with_aoi(wkt);
    let import = wrappers::frame_import_command(&gpt, &config, Path::new("s1.zip"), &out, true).unwrap();
    assert_eq!(import.get("region"), Some(wkt));
    assert_eq!(import.get("polarisation"), Some("VV,VH,HH,HV"));

    let args = wrappers::subset_command(&gpt, &config, Path::new("imported.dim"), &DimapProduct::new("sub"))
        .unwrap()
        .args();
    assert!(args.contains(&"-Ssource=imported.dim".to_string()));
    assert!(args.contains(&format!("-PgeoRegion={}", wkt)));
}
