use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    config::RemixConfig,
    error::{RemixError, Result},
    io::process::{run_tool, tool_version},
};

/// Compresses a WAV file at a fixed bitrate.
///
/// Each call is an independent encode that overwrites `output`. For a given
/// input and bitrate the output size must be stable.
pub trait AudioEncoder: Send + Sync {
    fn encode(&self, input_wav: &Path, output: &Path, bitrate_kbps: u32) -> Result<()>;

    /// Extension of the produced container, without the dot.
    fn extension(&self) -> &str;
}

/// Outcome of walking the bitrate ladder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BudgetedEncode {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub bitrate_kbps: u32,
    /// `(bitrate, size)` of every attempt, in order.
    pub attempts: Vec<(u32, u64)>,
}

/// Encodes at each rung of `ladder` (highest first) until the file fits in
/// `max_bytes`. Nothing is truncated to force a fit: if the lowest rung is
/// still too large the call fails with `SizeExceeded` and removes the file.
pub fn encode_within_budget(
    encoder: &dyn AudioEncoder,
    input_wav: &Path,
    output: &Path,
    ladder: &[u32],
    max_bytes: u64,
) -> Result<BudgetedEncode> {
    let mut rungs = ladder.to_vec();
    rungs.sort_unstable_by(|a, b| b.cmp(a));
    rungs.dedup();
    if rungs.is_empty() {
        return Err(RemixError::Config("empty bitrate ladder".into()));
    }

    let mut attempts = Vec::with_capacity(rungs.len());
    for &bitrate in &rungs {
        if output.exists() {
            fs::remove_file(output)?;
        }
        encoder.encode(input_wav, output, bitrate)?;

        let size = fs::metadata(output)
            .map_err(|e| RemixError::Encode(format!("no output at {}: {e}", output.display())))?
            .len();
        attempts.push((bitrate, size));
        info!(
            "Encoded at {bitrate} kbps: {:.1} MB (limit {:.1} MB)",
            size as f64 / 1_000_000.0,
            max_bytes as f64 / 1_000_000.0
        );

        if size <= max_bytes {
            return Ok(BudgetedEncode {
                path: output.to_path_buf(),
                size_bytes: size,
                bitrate_kbps: bitrate,
                attempts,
            });
        }
    }

    fs::remove_file(output).ok();
    let (bitrate_kbps, size_bytes) = attempts
        .last()
        .copied()
        .ok_or_else(|| RemixError::Internal("no encode attempts".into()))?;
    Err(RemixError::SizeExceeded {
        size_bytes,
        bitrate_kbps,
        max_bytes,
    })
}

/// MP3 via `ffmpeg` and libmp3lame, constant bitrate, bit-exact output.
#[derive(Clone, Debug)]
pub struct FfmpegEncoder {
    program: String,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &RemixConfig) -> Self {
        Self::new(config.ffmpeg_bin.clone())
    }

    pub fn probe(&self) -> Result<String> {
        tool_version(&self.program, "-version")
            .map_err(|e| RemixError::Encode(format!("{}: {e}", self.program)))
    }

    pub fn command_args(&self, input_wav: &Path, output: &Path, bitrate_kbps: u32) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(input_wav.into());
        for arg in [
            "-map_metadata",
            "-1",
            "-fflags",
            "+bitexact",
            "-flags:a",
            "+bitexact",
            "-codec:a",
            "libmp3lame",
            "-b:a",
        ] {
            args.push(arg.into());
        }
        args.push(format!("{bitrate_kbps}k").into());
        args.push("-f".into());
        args.push("mp3".into());
        args.push(output.into());
        args
    }
}

impl AudioEncoder for FfmpegEncoder {
    fn encode(&self, input_wav: &Path, output: &Path, bitrate_kbps: u32) -> Result<()> {
        debug!("ffmpeg encode {} at {bitrate_kbps} kbps", input_wav.display());
        run_tool(&self.program, self.command_args(input_wav, output, bitrate_kbps))
            .map_err(|e| RemixError::Encode(format!("{}: {e}", self.program)))?;
        Ok(())
    }

    fn extension(&self) -> &str {
        "mp3"
    }
}
