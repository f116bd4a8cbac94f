use assert_cmd::cargo::cargo_bin_cmd;
use dyad_lib::{pipeline::validate_pair, PipelineConfig};
use serde_json::Value;
use std::{error::Error, fs, path::PathBuf};
use tempfile::tempdir;

#[test]
fn params_prints_loadable_defaults() -> Result<(), Box<dyn Error>> {
    let output = cargo_bin_cmd!("dyad").arg("params").output()?;
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout)?;
    assert!(text.contains("Book start"));

    let temp = tempdir()?;
    let path = temp.path().join("config.toml");
    cargo_bin_cmd!("dyad")
        .args(["params", "--out", path.to_str().unwrap()])
        .assert()
        .success();
    let config = PipelineConfig::load(&path)?;
    assert_eq!(config, PipelineConfig::default());
    assert_eq!(config.parameters.segmentation[0].name, "baseline");
    Ok(())
}

#[test]
fn simulate_writes_a_valid_pair() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let output = cargo_bin_cmd!("dyad")
        .args([
            "simulate",
            "--out-dir",
            temp.path().to_str().unwrap(),
            "--condition",
            "c",
            "--subject-id",
            "7",
            "--wave",
            "WX",
            "--duration-s",
            "5",
        ])
        .output()?;
    assert!(output.status.success());
    let summary: Value = serde_json::from_slice(&output.stdout)?;
    let ecg = PathBuf::from(summary["ecg"].as_str().unwrap());
    let events = PathBuf::from(summary["events"].as_str().unwrap());
    assert!(ecg.ends_with("C07_WX_mc.txt"));
    let identity = validate_pair(&ecg, &events)?;
    assert_eq!(identity.subject_id, 7);
    let lines = fs::read_to_string(&ecg)?.lines().count();
    assert_eq!(lines, 2 + 2_500);
    Ok(())
}

#[test]
fn simulate_rejects_a_bad_wave() {
    let temp = tempdir().unwrap();
    cargo_bin_cmd!("dyad")
        .args([
            "simulate",
            "--out-dir",
            temp.path().to_str().unwrap(),
            "--wave",
            "W123",
            "--duration-s",
            "2",
        ])
        .assert()
        .failure();
}
