use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use tracing::info;

use crate::{
    config::RemixConfig,
    core::audio::read_audio,
    error::{RemixError, Result},
    io::process::{run_tool, tool_version, ToolFailure},
    types::{SeparationOptions, Stem, StemSet},
};

/// Engine stderr fragments that mean the input itself was rejected.
const UNSUPPORTED_MARKERS: [&str; 5] = [
    "could not load file",
    "invalid data found",
    "unsupported",
    "could not decode",
    "does not contain any stream",
];

pub trait StemSeparator: Send + Sync {
    /// Splits `input` into the four stems, writing files under `output_dir`.
    /// Must not modify `input`.
    fn separate(&self, input: &Path, output_dir: &Path, opts: &SeparationOptions) -> Result<StemSet>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Reads `{dir}/{stem}.wav` for all four stems, decoding in parallel.
pub fn load_stems(dir: &Path) -> Result<StemSet> {
    let entries = Stem::ALL
        .par_iter()
        .map(|&stem| {
            let path = dir.join(format!("{stem}.wav"));
            if !path.exists() {
                return Err(RemixError::Separation(format!(
                    "stem file not found: {}",
                    path.display()
                )));
            }
            let audio = read_audio(&path).map_err(|e| {
                RemixError::Separation(format!("unreadable {stem} stem: {e}"))
            })?;
            Ok((stem, path, audio))
        })
        .collect::<Result<Vec<_>>>()?;

    StemSet::new(entries)
}

/// Runs the `demucs` command line tool.
#[derive(Clone, Debug)]
pub struct DemucsSeparator {
    program: String,
    model: String,
}

impl DemucsSeparator {
    pub fn new(program: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &RemixConfig) -> Self {
        Self::new(config.demucs_bin.clone(), config.model_name.clone())
    }

    /// Checks that the engine can be launched.
    pub fn probe(&self) -> Result<String> {
        tool_version(&self.program, "--help")
            .map_err(|e| RemixError::Separation(format!("{}: {e}", self.program)))
    }

    pub fn command_args(
        &self,
        input: &Path,
        out_root: &Path,
        opts: &SeparationOptions,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-n".into(),
            self.model.clone().into(),
            "--shifts".into(),
            opts.shifts.to_string().into(),
            "-j".into(),
            opts.jobs.to_string().into(),
            "-o".into(),
            out_root.into(),
            "--filename".into(),
            "{stem}.{ext}".into(),
        ];
        args.push(input.into());
        args
    }

    /// Directory the engine writes stems into.
    pub fn stems_dir(&self, out_root: &Path) -> PathBuf {
        out_root.join(&self.model)
    }
}

fn classify_failure(program: &str, failure: ToolFailure) -> RemixError {
    match failure {
        ToolFailure::Launch(e) => RemixError::Separation(format!("could not launch {program}: {e}")),
        ToolFailure::Exit { ref stderr, .. } => {
            let lower = stderr.to_lowercase();
            if UNSUPPORTED_MARKERS.iter().any(|m| lower.contains(m)) {
                RemixError::UnsupportedFormat(failure.to_string())
            } else {
                RemixError::Separation(failure.to_string())
            }
        }
    }
}

impl StemSeparator for DemucsSeparator {
    fn separate(&self, input: &Path, output_dir: &Path, opts: &SeparationOptions) -> Result<StemSet> {
        fs::create_dir_all(output_dir)?;
        info!(
            "Separating {} with {} (shifts={}, jobs={})",
            input.display(),
            self.model,
            opts.shifts,
            opts.jobs
        );

        run_tool(&self.program, self.command_args(input, output_dir, opts))
            .map_err(|f| classify_failure(&self.program, f))?;

        let stems = load_stems(&self.stems_dir(output_dir))?;
        info!(
            "Separation complete: {} frames at {} Hz",
            stems.frames(),
            stems.sample_rate()
        );
        Ok(stems)
    }

    fn name(&self) -> &str {
        "demucs"
    }
}
