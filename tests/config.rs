use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use rcs2_stamps::config::{ConfigLoader, ConfigOverrides, DEFAULT_OUT_DIR};
use rcs2_stamps::domain::Filter;
use rcs2_stamps::error::StampError;

#[test]
fn load_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("rcs2-stamps.json")).unwrap();
    fs::write(
        &path,
        r#"{
            "catalog": "/srv/rcs2/rcs2map_chip.csv",
            "images_root": "/srv/rcs2/Patches",
            "headers_root": "/srv/rcs2/HEADERS",
            "filters": ["g", "z"],
            "unpack_program": "/opt/cfitsio/bin/funpack",
            "unpack_timeout_secs": 60,
            "jobs": 3
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.as_path())).unwrap();
    assert_eq!(resolved.catalog, "/srv/rcs2/rcs2map_chip.csv");
    assert_eq!(resolved.layout.images_root, "/srv/rcs2/Patches");
    assert_eq!(resolved.layout.headers_root, "/srv/rcs2/HEADERS");
    assert_eq!(resolved.layout.out_dir, DEFAULT_OUT_DIR);
    assert_eq!(resolved.filters, vec![Filter::G, Filter::Z]);
    assert_eq!(resolved.unpack_program, "/opt/cfitsio/bin/funpack");
    assert_eq!(resolved.unpack_timeout, Duration::from_secs(60));
    assert_eq!(resolved.jobs, 3);
}

#[test]
fn command_line_overrides_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("rcs2-stamps.json")).unwrap();
    fs::write(&path, r#"{"out_dir": "from-file", "filters": ["r"]}"#).unwrap();

    let resolved = ConfigLoader::resolve(Some(path.as_path()))
        .unwrap()
        .apply(ConfigOverrides {
            out_dir: Some(Utf8PathBuf::from("from-cli")),
            filters: Some(vec![Filter::I, Filter::I]),
            ..ConfigOverrides::default()
        })
        .unwrap();
    assert_eq!(resolved.layout.out_dir, "from-cli");
    assert_eq!(resolved.filters, vec![Filter::I]);
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("rcs2-stamps.json")).unwrap();
    fs::write(&path, r#"{"filters": ["u"]}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_path())),
        Err(StampError::ConfigParse(_))
    );

    fs::write(&path, r#"{"filters": []}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_path())),
        Err(StampError::InvalidFilter(_))
    );
}
