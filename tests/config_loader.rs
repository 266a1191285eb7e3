mod common;

use std::fs;
use std::sync::Arc;

use bytes::Bytes;
use common::RecordingCodec;
use imgstream::config::{Config, ConfigError};
use imgstream::options::RequestContext;
use imgstream::pipeline::Pipeline;
use imgstream::sequence::SequenceElement;
use imgstream::stage::{StageKind, StageSpec};
use tempfile::TempDir;

const SAMPLE: &str = r#"
[pipeline]
stages = ["resize", "format", "quality"]
max_size_bytes = 2048
format = ["png"]
quality = ["85"]

[pipeline.options]
"jpeg:quality" = "90"

[pipeline.resize]
columns = ["%{query:w}"]
modulus = 2

[[location]]
path = "/thumbs/"
format = ["jpeg"]

[location.resize]
columns = ["%{req:Width}"]

[[location]]
path = "/thumbs/small/"
max_size_bytes = 512

[location.resize]
columns = ["64"]
"#;

fn write_config(content: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");
    fs::write(&path, content).expect("Failed to write config");
    (dir, path)
}

#[test]
fn test_config_path_ends_with_expected() {
    let path = Config::config_path();
    assert!(path.ends_with("imgstream/config.toml"));
}

#[test]
fn test_missing_file_yields_default() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_load_and_resolve_nested_locations() {
    let (_dir, path) = write_config(SAMPLE);
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.locations.len(), 2);

    let root = config.resolve_for("/other/a.png");
    assert_eq!(root.format, vec!["png"]);
    assert_eq!(root.max_size_bytes, Some(2048));

    let small = config.resolve_for("/thumbs/small/a.png");
    assert_eq!(small.format, vec!["jpeg"]);
    assert_eq!(small.quality, vec!["85"]);
    assert_eq!(small.max_size_bytes, Some(512));
    assert_eq!(small.resize.columns, vec!["64", "%{req:Width}", "%{query:w}"]);
    assert_eq!(small.resize.modulus, Some(2));
    assert_eq!(small.options["jpeg:quality"], "90");
    assert_eq!(
        small.stages,
        Some(vec![StageKind::Resize, StageKind::Format, StageKind::Quality])
    );
}

#[test]
fn test_location_order_in_file_does_not_matter() {
    let reordered = r#"
[[location]]
path = "/a/b/"
format = ["jpeg"]

[[location]]
path = "/a/"
format = ["png"]
"#;
    let (_dir, path) = write_config(reordered);
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.resolve_for("/a/b/c").format, vec!["jpeg"]);
    assert_eq!(config.resolve_for("/a/c").format, vec!["png"]);
}

#[test]
fn test_compiled_location_runs() {
    let (_dir, path) = write_config(SAMPLE);
    let config = Config::load_from(&path).unwrap();
    let compiled = config.resolve_for("/thumbs/x.png").compile().unwrap();
    assert_eq!(compiled.max_size_bytes, 2048);
    assert_eq!(compiled.decode_options.len(), 1);
    assert!(matches!(compiled.stages[0], StageSpec::Resize(_)));

    let ctx = RequestContext::new("/thumbs/x.png?w=99").with_header("width", "51");
    let mut pipeline = Pipeline::new(&compiled, Arc::new(RecordingCodec::new(100, 40)), ctx);
    pipeline
        .push_all(vec![
            SequenceElement::Data(Bytes::from_static(b"img")),
            SequenceElement::End,
        ])
        .unwrap();
    let out = pipeline.drain();
    let props = out[0].as_artifact().unwrap().properties().unwrap();
    // 51 wide, 20 derived, both rounded up to even.
    assert_eq!((props.width, props.height), (52, 20));
    assert_eq!(props.format, "jpeg");
    assert_eq!(props.quality, Some(85));
    assert_eq!(pipeline.content_type(), Some("image/jpeg"));
}

#[test]
fn test_parse_error_names_file() {
    let (_dir, path) = write_config("[pipeline\nstages = 3");
    match Config::load_from(&path) {
        Err(ConfigError::ParseError { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn test_unknown_stage_is_a_parse_error() {
    let (_dir, path) = write_config("[pipeline]\nstages = [\"sharpen\"]\n");
    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::ParseError { .. })
    ));
}

#[test]
fn test_validation_rejects_zero_max_size() {
    let (_dir, path) = write_config("[pipeline]\nmax_size_bytes = 0\n");
    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("greater than zero"));
}

#[test]
fn test_validation_rejects_relative_location() {
    let (_dir, path) = write_config("[[location]]\npath = \"thumbs\"\n");
    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::ValidationError { .. })
    ));
}

#[test]
fn test_validation_rejects_bad_expression_in_location() {
    let (_dir, path) = write_config("[[location]]\npath = \"/x/\"\nquality = [\"%{query:q\"]\n");
    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::Expression { .. })
    ));
}
