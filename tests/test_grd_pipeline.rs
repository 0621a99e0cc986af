use sarprep::config::{ArdParameters, ArdType, ProcessingConfig};
use sarprep::core::gpt::Gpt;
use sarprep::core::grd_to_ard::{ArdJob, CreateArdOptions};
use sarprep::io::Sentinel1Scene;
use sarprep::types::{ProductType, SarError};
use std::path::{Path, PathBuf};

const GRD_ID: &str = "S1A_IW_GRDH_1SDV_20200114T170503_20200114T170528_030802_038831_2F2C";
const SLC_ID: &str = "S1A_IW_SLC__1SDV_20200103T170815_20200103T170842_030639_0382D5_DADE";

/// A gpt stand-in that records its arguments and fails
#[cfg(unix)]
fn failing_gpt(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("gpt");
    let record = dir.join("gpt.args");
    std::fs::write(
        &script,
        format!("#!/bin/sh\necho \"$@\" >> {}\necho 'NullPointerException' >&2\nexit 1\n", record.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(unix)]
#[test]
fn test_failing_import_surfaces_exit_code() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let gpt = Gpt::new(failing_gpt(dir.path()), 2);
    let params = ArdParameters::template(ProductType::GRD, ArdType::OstGtc).unwrap();
    let config = ProcessingConfig::new(dir.path().join("proc"), params);

    let output_dir = dir.path().join("proc").join("117").join("20200114");
    let job = ArdJob::new(&gpt, &config, "20200114_117", &output_dir, vec![dir.path().join(format!("{}.zip", GRD_ID))]);

    match job.run() {
        Err(SarError::GptRuntime { code, logfile, .. }) => {
            assert_eq!(code, 1);
            assert!(logfile.starts_with(&output_dir));
            let log = std::fs::read_to_string(&logfile).unwrap();
            assert!(log.contains("NullPointerException"));
        }
        other => panic!("expected a gpt failure, got {:?}", other.map(|o| o.backscatter)),
    }

    // three attempts, each with the parallelism flag
    let calls = std::fs::read_to_string(dir.path().join("gpt.args")).unwrap();
    assert_eq!(calls.lines().count(), 3);
    assert!(calls.lines().all(|l| l.contains("-x -q 4")));

    assert!(!job.temp_dir().exists());
    assert!(!output_dir.join(".processed").exists());
}

#[test]
fn test_slc_scenes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let scene = Sentinel1Scene::parse(SLC_ID).unwrap();
    let params = ArdParameters::template(ProductType::SLC, ArdType::OstGtc).unwrap();
    let result = scene.create_ard(dir.path().join("missing.zip"), dir.path(), params, &CreateArdOptions::default());
    assert!(matches!(result, Err(SarError::Processing(_))));
}

#[test]
fn test_ard_layout_uses_track_and_date() {
    let scene = Sentinel1Scene::parse(GRD_ID).unwrap();
    let dir = scene.ard_dir("/data/proc");
    assert_eq!(
        dir,
        PathBuf::from("/data/proc").join(scene.relative_orbit().to_string()).join("20200114")
    );
    assert_eq!(scene.file_id(), format!("20200114_{}", scene.relative_orbit()));
}
