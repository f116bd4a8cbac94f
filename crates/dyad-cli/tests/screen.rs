use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{error::Error, fs};
use tempfile::tempdir;

#[test]
fn screen_annotates_stacked_tables() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let first = temp.path().join("a.csv");
    let second = temp.path().join("b.csv");
    fs::write(
        &first,
        "segment_name,HRV_RMSSD\nrest,10\nrest,10\nrest,10\nrest,10\n",
    )?;
    fs::write(&second, "segment_name,HRV_RMSSD\nrest,1000\ntask,40\ntask,\n")?;
    let out = temp.path().join("screened.csv");

    let output = cargo_bin_cmd!("dyad")
        .args([
            "screen",
            "--input",
            first.to_str().unwrap(),
            "--input",
            second.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--method",
            "mean",
        ])
        .output()?;
    assert!(output.status.success());
    let summary: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(summary["rows"], 7);
    assert_eq!(summary["outliers"], 2);
    assert_eq!(summary["unreliable_rows"], 7);

    let mut reader = csv::Reader::from_path(&out)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    assert_eq!(
        headers,
        [
            "segment_name",
            "HRV_RMSSD",
            "HRV_RMSSD_z_score_outlier",
            "HRV_RMSSD_imputed",
            "segment_outlier"
        ]
    );
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(&rows[4][2], "true");
    assert_eq!(&rows[4][3], "10");
    assert_eq!(&rows[6][3], "40");
    Ok(())
}

#[test]
fn plausibility_screen_runs_first() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("a.csv");
    fs::write(
        &input,
        "segment_name,HRV_RMSSD\nrest,5\nrest,20\nrest,22\nrest,24\nrest,26\n",
    )?;
    let out = temp.path().join("screened.csv");
    let output = cargo_bin_cmd!("dyad")
        .args([
            "screen",
            "--input",
            input.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--plausibility",
        ])
        .output()?;
    assert!(output.status.success());
    let summary: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(summary["metric"], "HRV_RMSSD_plausible");
    assert_eq!(summary["outliers"], 1);
    assert_eq!(summary["unreliable_rows"], 0);
    Ok(())
}

#[test]
fn unknown_metric_fails() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let input = temp.path().join("a.csv");
    fs::write(&input, "segment_name,HRV_RMSSD\nrest,5\n")?;
    cargo_bin_cmd!("dyad")
        .args([
            "screen",
            "--input",
            input.to_str().unwrap(),
            "--out",
            temp.path().join("o.csv").to_str().unwrap(),
            "--metric",
            "HRV_SDNN",
        ])
        .assert()
        .failure();
    Ok(())
}
