mod common;

use std::process::{Command, Output};

use common::{HOUSES_CSV, STEADS_CSV, TestFixtures, loader_bytes, read_file, write_file};
use tempfile::TempDir;

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fias-xml-csv"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute fias-xml-csv")
}

fn path_arg(path: &std::path::Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_cli_help_output() {
    let output = run(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("--schemas"));
    assert!(stdout.contains("--output"));
    assert!(stdout.contains("--threads"));
    assert!(stdout.contains("--format"));
    assert!(stdout.contains("--list-schemas"));
}

#[test]
fn test_cli_version_output() {
    let output = run(&["--version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains(concat!("fias-xml-csv ", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_cli_missing_input_path() {
    let output = run(&["/nonexistent/gar/export"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Path does not exist"));
}

#[test]
fn test_cli_converts_directory() {
    let fixtures = TestFixtures::new();
    let temp_dir = TempDir::new().unwrap();
    let csv_dir = temp_dir.path().join("csv");

    let output = run(&[
        path_arg(&fixtures.xml_dir()),
        "--output",
        path_arg(&csv_dir),
        "--schemas",
        path_arg(&fixtures.xsd_dir()),
        "--format",
        "json",
        "--lf",
        "--no-bom",
    ]);

    assert!(output.status.success(), "{:?}", output);
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["total_files"], 3);
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["total_records"], 7);

    assert_eq!(
        read_file(&csv_dir.join("AS_HOUSES_20240101_0001.csv")),
        HOUSES_CSV
    );
    assert_eq!(
        read_file(&csv_dir.join("77/AS_STEADS_20240101_0002.csv")),
        STEADS_CSV
    );
}

#[test]
fn test_cli_failed_file_sets_exit_code() {
    let temp_dir = TempDir::new().unwrap();
    let xml_dir = temp_dir.path().join("xml");
    write_file(&xml_dir.join("AS_GOOD.XML"), r#"<ITEMS><ITEM ID="1"/></ITEMS>"#);
    write_file(&xml_dir.join("AS_BAD.XML"), r#"<ITEMS><ITEM ID="1">"#);

    let output = run(&[
        path_arg(&xml_dir),
        "-o",
        path_arg(&temp_dir.path().join("csv")),
        "--format",
        "summary",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("2 files, 1 converted, 1 failed, 1 records"));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("AS_BAD.XML"));
}

#[test]
fn test_cli_single_file_into_directory() {
    let fixtures = TestFixtures::new();
    let temp_dir = TempDir::new().unwrap();

    let output = run(&[
        path_arg(&fixtures.steads_xml()),
        "-o",
        path_arg(temp_dir.path()),
        "-s",
        path_arg(&fixtures.xsd_dir()),
        "--quiet",
    ]);

    assert!(output.status.success(), "{:?}", output);
    assert!(output.stdout.is_empty());
    assert_eq!(
        read_file(&temp_dir.path().join("AS_STEADS_20240101_0002.csv")),
        loader_bytes(STEADS_CSV)
    );
}

#[test]
fn test_cli_config_file_plain_format() {
    let fixtures = TestFixtures::new();
    let temp_dir = TempDir::new().unwrap();
    let csv_path = temp_dir.path().join("steads.csv");

    let output = run(&[
        path_arg(&fixtures.steads_xml()),
        "-o",
        path_arg(&csv_path),
        "-s",
        path_arg(&fixtures.xsd_dir()),
        "--config",
        path_arg(&fixtures.configs_dir().join("plain.toml")),
    ]);

    assert!(output.status.success(), "{:?}", output);
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("1 files, 1 converted, 0 failed, 2 records"));

    assert_eq!(read_file(&csv_path), STEADS_CSV);
}

#[test]
fn test_cli_list_schemas() {
    let fixtures = TestFixtures::new();
    let output = run(&["--list-schemas", "--schemas", path_arg(&fixtures.xsd_dir())]);

    assert!(output.status.success(), "{:?}", output);
    let listing: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = listing
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();

    assert!(names.contains(&"HOUSE"));
    assert!(names.contains(&"STEAD"));
    assert!(names.windows(2).all(|w| w[0] <= w[1]));
}
