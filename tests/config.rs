use std::{collections::HashMap, fs, path::PathBuf};

use stem_remix_core::{ErrorKind, RemixConfig, RemixRequest, Stem};
use tempfile::tempdir;

#[test]
fn defaults_are_valid() {
    let config = RemixConfig::default();
    config.validate().unwrap();
    assert_eq!(config.default_gain_db, 4.0);
    assert_eq!(config.max_output_bytes, 8_000_000);
    assert_eq!(config.bitrate_ladder, vec![320, 192, 128]);
    assert_eq!(config.shift_count, 2);
    assert_eq!(config.limiter_ceiling, 0.95);
    assert_eq!(config.model_name, "htdemucs_ft");
    assert_eq!(config.max_concurrent_separations, 1);

    let limiter = config.limiter_settings();
    assert_eq!(limiter.attack_ms, 5.0);
    assert_eq!(limiter.release_ms, 50.0);
    assert!(limiter.auto_level);
}

#[test]
fn partial_toml_keeps_other_defaults() {
    let config = RemixConfig::from_toml_str(
        r#"
        max_output_bytes = 25000000
        bitrate_ladder = [256, 160]
        library_dir = "/srv/music"
        "#,
    )
    .unwrap();

    assert_eq!(config.max_output_bytes, 25_000_000);
    assert_eq!(config.bitrate_ladder, vec![256, 160]);
    assert_eq!(config.library_dir, Some(PathBuf::from("/srv/music")));
    assert_eq!(config.default_gain_db, 4.0);
    config.validate().unwrap();
}

#[test]
fn toml_round_trips() {
    let mut config = RemixConfig::default();
    config.library_dir = Some(PathBuf::from("/music"));
    config.max_concurrent_separations = 3;
    let text = config.to_toml_string().unwrap();
    assert_eq!(RemixConfig::from_toml_str(&text).unwrap(), config);
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = RemixConfig::from_toml_str("max_output_bytes = \"lots\"").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalError);
    assert!(err.to_string().contains("configuration"));
}

#[test]
fn environment_overrides_file_values() {
    let mut config = RemixConfig::from_toml_str("max_output_bytes = 1000").unwrap();
    let env: HashMap<&str, &str> = [
        ("STEM_REMIX_MAX_OUTPUT_BYTES", "50000000"),
        ("STEM_REMIX_MAX_CONCURRENT", "4"),
        ("STEM_REMIX_SCRATCH_DIR", "/tmp/remix-scratch"),
        ("STEM_REMIX_FFMPEG_BIN", "/opt/ffmpeg/bin/ffmpeg"),
    ]
    .into_iter()
    .collect();

    config
        .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(config.max_output_bytes, 50_000_000);
    assert_eq!(config.max_concurrent_separations, 4);
    assert_eq!(config.scratch_dir, PathBuf::from("/tmp/remix-scratch"));
    assert_eq!(config.ffmpeg_bin, "/opt/ffmpeg/bin/ffmpeg");
    assert_eq!(config.demucs_bin, "demucs");
}

#[test]
fn unparsable_environment_value_is_rejected() {
    let mut config = RemixConfig::default();
    let err = config
        .apply_env_overrides(|key| (key == "STEM_REMIX_MAX_CONCURRENT").then(|| "many".into()))
        .unwrap_err();
    assert!(err.to_string().contains("STEM_REMIX_MAX_CONCURRENT"));
}

#[test]
fn load_reads_explicit_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("remix.toml");
    fs::write(&path, "shift_count = 5\nseparator_jobs = 2\n").unwrap();

    let config = RemixConfig::load(Some(&path)).unwrap();
    let opts = config.separation_options();
    assert_eq!(opts.shifts, 5);
    assert_eq!(opts.jobs, 2);
}

#[test]
fn load_fails_on_missing_explicit_file() {
    let dir = tempdir().unwrap();
    assert!(RemixConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
}

fn assert_rejected(name: &str, mutate: impl FnOnce(&mut RemixConfig)) {
    let mut config = RemixConfig::default();
    mutate(&mut config);
    assert!(config.validate().is_err(), "{name} was accepted");
}

#[test]
fn validation_rejects_bad_values() {
    assert_rejected("empty ladder", |c| c.bitrate_ladder.clear());
    assert_rejected("ascending ladder", |c| c.bitrate_ladder = vec![128, 320]);
    assert_rejected("zero bitrate", |c| c.bitrate_ladder = vec![320, 0]);
    assert_rejected("ceiling above 1", |c| c.limiter_ceiling = 1.5);
    assert_rejected("zero ceiling", |c| c.limiter_ceiling = 0.0);
    assert_rejected("zero release", |c| c.limiter_release_ms = 0.0);
    assert_rejected("gain bound", |c| c.max_gain_db = 150.0);
    assert_rejected("default gain", |c| c.default_gain_db = f32::NAN);
    assert_rejected("no shifts", |c| c.shift_count = 0);
    assert_rejected("no concurrency", |c| c.max_concurrent_separations = 0);
    assert_rejected("no output budget", |c| c.max_output_bytes = 0);
}

#[test]
fn deserialized_requests_are_validated() {
    let ok: RemixRequest = serde_json::from_str(
        r#"{"track_reference":"Song","stem":"vocals","direction":"reduce","gain_db":60.0}"#,
    )
    .unwrap();
    assert_eq!(ok.stem(), Stem::Vocals);
    assert_eq!(ok.effective_gain_db(), -60.0);

    let too_loud = serde_json::from_str::<RemixRequest>(
        r#"{"track_reference":"Song","stem":"bass","direction":"boost","gain_db":1000.0}"#,
    );
    assert!(too_loud.unwrap_err().to_string().contains("gain"));

    #[derive(serde::Deserialize)]
    struct Wrapper {
        request: RemixRequest,
    }
    let nan = toml::from_str::<Wrapper>(
        "[request]\ntrack_reference = \"Song\"\nstem = \"bass\"\ndirection = \"boost\"\ngain_db = nan\n",
    );
    assert!(nan.is_err());

    let valid = toml::from_str::<Wrapper>(
        "[request]\ntrack_reference = \"Song\"\nstem = \"drums\"\ndirection = \"boost\"\ngain_db = 4.0\n",
    )
    .unwrap();
    assert_eq!(valid.request.gain_db(), 4.0);
}
