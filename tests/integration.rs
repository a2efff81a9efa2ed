use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pcat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pcat"))
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 40, 40]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Producer output for a three page source
    let pages = root.join("data/extracted/bundle");
    fs::create_dir_all(&pages).unwrap();
    let image = png(600, 400);
    for i in 0..3 {
        fs::write(pages.join(format!("page_{:05}.png", i)), &image).unwrap();
    }
    fs::write(
        pages.join("page_00000.txt"),
        "FLIGHT LOG N908JE passengers: Bill Clinton, Jeffrey Epstein",
    )
    .unwrap();
    fs::write(
        pages.join("page_00002.txt"),
        "EFTA12345678 deposition transcript, United States District Court",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/catalog.sqlite"

[pipeline]
extracted_root = "{root}/data/extracted"
store_root = "{root}/data/store"
workers = 2

[watch]
poll_interval_secs = 1
grace_secs = 1
settle_secs = 0
done_marker = "{root}/data/extracted/DONE"

[retrieval]
default_per_page = 10
max_per_page = 50
"#,
        root = root.display()
    );

    let config_path = config_dir.join("pcat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pcat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pcat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pcat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_pcat(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));

    let (_, stderr, ok) = run_pcat(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_then_rerun() {
    let (tmp, config) = setup_test_env();
    run_pcat(&config, &["init"]);

    let (stdout, stderr, ok) = run_pcat(&config, &["ingest", "bundle.pdf", "--progress", "off"]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("processed: 3"), "{}", stdout);
    assert!(stdout.contains("inserted: 3"), "{}", stdout);
    assert!(stdout.contains("ok"));

    let thumbs = tmp.path().join("data/store/thumbnails/bundle");
    assert!(thumbs.join("page_00000.png").exists());

    let (stdout, _, ok) = run_pcat(&config, &["ingest", "bundle.pdf", "--progress", "off"]);
    assert!(ok);
    assert!(stdout.contains("inserted: 0"), "{}", stdout);
    assert!(stdout.contains("skipped: 3"), "{}", stdout);
}

#[test]
fn test_ingest_unknown_source_fails() {
    let (_tmp, config) = setup_test_env();
    run_pcat(&config, &["init"]);

    let (_, stderr, ok) = run_pcat(&config, &["ingest", "missing.pdf", "--progress", "off"]);
    assert!(!ok);
    assert!(stderr.contains("unavailable"), "{}", stderr);
}

#[test]
fn test_search_list_and_get() {
    let (_tmp, config) = setup_test_env();
    run_pcat(&config, &["init"]);
    run_pcat(&config, &["ingest", "bundle.pdf", "--progress", "off"]);

    let (stdout, stderr, ok) = run_pcat(&config, &["search", "passengers"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("flight_log"), "{}", stdout);
    assert!(stdout.contains("1 total"), "{}", stdout);

    let (stdout, _, ok) = run_pcat(&config, &["search", "nonexistentxyz"]);
    assert!(ok);
    assert!(stdout.contains("No results."));

    let (stdout, _, ok) = run_pcat(&config, &["list", "--category", "legal"]);
    assert!(ok);
    assert!(stdout.contains("EFTA12345678"), "{}", stdout);

    let (_, stderr, ok) = run_pcat(&config, &["list", "--per-page", "500"]);
    assert!(!ok);
    assert!(stderr.contains("per_page"), "{}", stderr);

    let (stdout, stderr, ok) = run_pcat(&config, &["get", "1"]);
    assert!(ok, "get failed: {}", stderr);
    assert!(stdout.contains("--- Record ---"));

    let (_, _, ok) = run_pcat(&config, &["get", "9999"]);
    assert!(!ok);
}

#[test]
fn test_people_and_stats() {
    let (_tmp, config) = setup_test_env();
    run_pcat(&config, &["init"]);
    run_pcat(&config, &["ingest", "bundle.pdf", "--progress", "off"]);

    let (stdout, _, ok) = run_pcat(&config, &["people"]);
    assert!(ok);
    assert!(stdout.contains("Bill Clinton"));
    assert!(stdout.contains("Jeffrey Epstein"));

    let (stdout, _, ok) = run_pcat(&config, &["stats"]);
    assert!(ok);
    assert!(stdout.contains("Records:     3"), "{}", stdout);
    assert!(stdout.contains("bundle.pdf"));
}

#[test]
fn test_watch_stops_on_done_marker() {
    let (tmp, config) = setup_test_env();
    fs::write(tmp.path().join("data/extracted/DONE"), "").unwrap();

    let (stdout, stderr, ok) = run_pcat(&config, &["watch", "bundle.pdf", "--progress", "off"]);
    assert!(ok, "watch failed: {}", stderr);
    assert!(stdout.contains("inserted: 3"), "{}", stdout);
    assert!(stdout.contains("ingested: 3 / 3 pages"), "{}", stdout);

    let (stdout, _, ok) = run_pcat(&config, &["progress", "bundle.pdf"]);
    assert!(ok);
    assert!(stdout.contains("materialized pages: 3"), "{}", stdout);
    assert!(stdout.contains("backlog:            0"), "{}", stdout);
    assert!(stdout.contains("not running"));
}

#[test]
fn test_import_manifest() {
    let (tmp, config) = setup_test_env();
    let manifest = tmp.path().join("manifest.json");
    fs::write(
        &manifest,
        r#"[
            {"source_pdf": "other.pdf", "page_number": 1, "file_path": "extracted/other/page_00001.png",
             "ocr_text": "bank statement wire transfer"},
            {"source_pdf": "other.pdf", "page_number": 2, "file_path": "extracted/other/page_00002.png"}
        ]"#,
    )
    .unwrap();

    let (stdout, stderr, ok) = run_pcat(
        &config,
        &["import", manifest.to_str().unwrap(), "--progress", "off"],
    );
    assert!(ok, "import failed: {}", stderr);
    assert!(stdout.contains("inserted: 2"), "{}", stdout);

    let (stdout, _, ok) = run_pcat(
        &config,
        &["import", manifest.to_str().unwrap(), "--progress", "off"],
    );
    assert!(ok);
    assert!(stdout.contains("inserted: 0"), "{}", stdout);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_pcat(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("config"), "{}", stderr);
}
