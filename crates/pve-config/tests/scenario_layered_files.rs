//! Layered loading from files on disk.

use std::io::Write;

use pve_config::{load_layered_yaml, load_layered_yaml_from_strings};

const BASE: &str = "engine:\n  timezone: Asia/Kolkata\n  grace_margin_secs: 300\n";
const SITE: &str = "engine:\n  grace_margin_secs: 900\nsweep:\n  interval_secs: 30\n";

fn write_layer(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn file_layers_match_string_layers() {
    let dir = tempfile::tempdir().unwrap();
    let base = write_layer(&dir, "base.yaml", BASE);
    let site = write_layer(&dir, "site.yaml", SITE);

    let from_files = load_layered_yaml(&[base.as_str(), site.as_str()]).unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE, SITE]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);

    let cfg = from_files.patrol().unwrap();
    assert_eq!(cfg.engine.grace_margin_secs, 900);
    assert_eq!(cfg.sweep.interval_secs, 30);
    assert_eq!(cfg.engine.timezone, "Asia/Kolkata");
}

#[test]
fn missing_layer_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    let missing = missing.to_string_lossy().into_owned();
    let err = load_layered_yaml(&[missing.as_str()]).unwrap_err();
    assert!(format!("{err:#}").contains("nope.yaml"));
}

