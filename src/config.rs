//! Runtime configuration.
//!
//! Resolution order, highest first: environment variables, TOML file,
//! built-in defaults.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    core::dsp::LimiterSettings,
    error::{RemixError, Result},
    paths::{default_config_file, default_scratch_dir},
    types::{SeparationOptions, MAX_GAIN_DB},
};

pub const CONFIG_ENV: &str = "STEM_REMIX_CONFIG";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemixConfig {
    /// Gain magnitude used when a request does not carry one.
    pub default_gain_db: f32,
    pub max_gain_db: f32,
    pub max_input_duration_secs: u64,
    pub max_output_bytes: u64,
    /// Encoder bitrates in kbps, tried highest first.
    pub bitrate_ladder: Vec<u32>,
    pub shift_count: u32,
    pub separator_jobs: u32,
    pub limiter_ceiling: f32,
    pub limiter_attack_ms: f32,
    pub limiter_release_ms: f32,
    pub limiter_auto_level: bool,
    /// Process-wide ceiling on simultaneous separations.
    pub max_concurrent_separations: usize,
    pub scratch_dir: PathBuf,
    pub library_dir: Option<PathBuf>,
    pub model_name: String,
    pub demucs_bin: String,
    pub ffmpeg_bin: String,
}

impl Default for RemixConfig {
    fn default() -> Self {
        Self {
            default_gain_db: 4.0,
            max_gain_db: MAX_GAIN_DB,
            max_input_duration_secs: 900,
            max_output_bytes: 8_000_000,
            bitrate_ladder: vec![320, 192, 128],
            shift_count: 2,
            separator_jobs: 4,
            limiter_ceiling: 0.95,
            limiter_attack_ms: 5.0,
            limiter_release_ms: 50.0,
            limiter_auto_level: true,
            max_concurrent_separations: 1,
            scratch_dir: default_scratch_dir(),
            library_dir: None,
            model_name: "htdemucs_ft".into(),
            demucs_bin: "demucs".into(),
            ffmpeg_bin: "ffmpeg".into(),
        }
    }
}

impl RemixConfig {
    /// Loads `path`, or `$STEM_REMIX_CONFIG`, or the per-user config file if
    /// it exists; then applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => match env::var_os(CONFIG_ENV) {
                Some(p) => Some(PathBuf::from(p)),
                None => default_config_file().ok().filter(|p| p.exists()),
            },
        };

        let mut config = match file {
            Some(file) => {
                info!("Loading config from {}", file.display());
                let text = fs::read_to_string(&file).map_err(|e| {
                    RemixError::Config(format!("read {} failed: {e}", file.display()))
                })?;
                Self::from_toml_str(&text)?
            }
            None => {
                debug!("No config file, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RemixError::Config(e.to_string()))
    }

    /// Applies `STEM_REMIX_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STEM_REMIX_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STEM_REMIX_LIBRARY_DIR") {
            self.library_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("STEM_REMIX_MAX_OUTPUT_BYTES") {
            self.max_output_bytes = parse_env("STEM_REMIX_MAX_OUTPUT_BYTES", &v)?;
        }
        if let Some(v) = lookup("STEM_REMIX_MAX_CONCURRENT") {
            self.max_concurrent_separations = parse_env("STEM_REMIX_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = lookup("STEM_REMIX_DEMUCS_BIN") {
            self.demucs_bin = v;
        }
        if let Some(v) = lookup("STEM_REMIX_FFMPEG_BIN") {
            self.ffmpeg_bin = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(RemixError::Config(msg));

        if self.bitrate_ladder.is_empty() {
            return bad("bitrate_ladder must not be empty".into());
        }
        if self.bitrate_ladder.contains(&0) {
            return bad("bitrate_ladder entries must be positive".into());
        }
        if self.bitrate_ladder.windows(2).any(|w| w[0] <= w[1]) {
            return bad(format!(
                "bitrate_ladder must be strictly descending, got {:?}",
                self.bitrate_ladder
            ));
        }
        if !(self.limiter_ceiling > 0.0 && self.limiter_ceiling <= 1.0) {
            return bad(format!(
                "limiter_ceiling must be in (0, 1], got {}",
                self.limiter_ceiling
            ));
        }
        if !(self.limiter_attack_ms.is_finite() && self.limiter_attack_ms >= 0.0)
            || !(self.limiter_release_ms.is_finite() && self.limiter_release_ms > 0.0)
        {
            return bad("limiter attack/release must be finite and non-negative".into());
        }
        if !(self.max_gain_db.is_finite() && self.max_gain_db > 0.0 && self.max_gain_db <= MAX_GAIN_DB)
        {
            return bad(format!("max_gain_db must be in (0, {MAX_GAIN_DB}]"));
        }
        if !self.default_gain_db.is_finite() || self.default_gain_db.abs() > self.max_gain_db {
            return bad(format!(
                "default_gain_db must be within ±{} dB",
                self.max_gain_db
            ));
        }
        if self.shift_count == 0 || self.separator_jobs == 0 {
            return bad("shift_count and separator_jobs must be at least 1".into());
        }
        if self.max_concurrent_separations == 0 {
            return bad("max_concurrent_separations must be at least 1".into());
        }
        if self.max_output_bytes == 0 || self.max_input_duration_secs == 0 {
            return bad("max_output_bytes and max_input_duration_secs must be positive".into());
        }
        Ok(())
    }

    pub fn separation_options(&self) -> SeparationOptions {
        SeparationOptions {
            shifts: self.shift_count,
            jobs: self.separator_jobs,
        }
    }

    pub fn limiter_settings(&self) -> LimiterSettings {
        LimiterSettings {
            ceiling: self.limiter_ceiling,
            attack_ms: self.limiter_attack_ms,
            release_ms: self.limiter_release_ms,
            adaptive_release: true,
            auto_level: self.limiter_auto_level,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RemixError::Config(format!("{key}: cannot parse `{value}`")))
}
