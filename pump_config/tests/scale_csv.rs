use std::fs::File;
use std::io::Write;

use pump_config::load_scale_csv;
use tempfile::tempdir;

fn write_csv(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scale.csv");
    let mut f = File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    (dir, path)
}

#[test]
fn loads_and_fits_csv() {
    let (_dir, path) = write_csv("raw,true\n100,205\n200,405\n300,605\n");
    let fit = load_scale_csv(&path).unwrap();
    assert!((fit.a - 2.0).abs() < 1e-5);
    assert!((fit.b - 5.0).abs() < 1e-3);
}

#[test]
fn rejects_wrong_headers() {
    let (_dir, path) = write_csv("raw,flow\n100,0\n200,100\n");
    let err = load_scale_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("headers 'raw,true'"));
}

#[test]
fn rejects_single_row() {
    let (_dir, path) = write_csv("raw,true\n100,205\n");
    let err = load_scale_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("at least two rows"));
}

#[test]
fn rejects_constant_raw() {
    let (_dir, path) = write_csv("raw,true\n100,205\n100,300\n");
    let err = load_scale_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("degenerate X variance"));
}

#[test]
fn rejects_flat_response() {
    let (_dir, path) = write_csv("raw,true\n100,5\n200,5\n");
    let err = load_scale_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("zero slope"));
}

#[test]
fn reports_bad_row_number() {
    let (_dir, path) = write_csv("raw,true\n100,205\nabc,405\n");
    let err = load_scale_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("invalid CSV row 3"));
}
