use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, RemixError, Result};

/// Gain bound applied to requests, in dB.
pub const MAX_GAIN_DB: f32 = 100.0;

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// One of the four stems produced by the separation model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stem {
    Bass,
    Drums,
    Vocals,
    Other,
}

impl Stem {
    /// Mixing order. Also the index order of [`StemSet`] and [`MixPlan`].
    pub const ALL: [Stem; 4] = [Stem::Bass, Stem::Drums, Stem::Vocals, Stem::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stem::Bass => "bass",
            Stem::Drums => "drums",
            Stem::Vocals => "vocals",
            Stem::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stem::Bass => "Bass",
            Stem::Drums => "Drums",
            Stem::Vocals => "Vocals",
            Stem::Other => "Other",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Stem::Bass => 0,
            Stem::Drums => 1,
            Stem::Vocals => 2,
            Stem::Other => 3,
        }
    }
}

impl fmt::Display for Stem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stem {
    type Err = RemixError;

    fn from_str(s: &str) -> Result<Self> {
        Stem::ALL
            .into_iter()
            .find(|stem| stem.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                RemixError::InvalidRequest(format!(
                    "invalid stem `{s}`, must be one of: bass, drums, vocals, other"
                ))
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Boost,
    Reduce,
}

impl Direction {
    pub fn action(&self) -> &'static str {
        match self {
            Direction::Boost => "Boost",
            Direction::Reduce => "Reduce",
        }
    }

    fn sign(&self) -> f32 {
        match self {
            Direction::Boost => 1.0,
            Direction::Reduce => -1.0,
        }
    }
}

/// What the caller asked for. Validated on construction and never mutated.
///
/// `gain_db` is signed as supplied; `reduce` subtracts it. The action shown
/// to the caller follows the sign of the effective gain, not `direction`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRemixRequest")]
pub struct RemixRequest {
    track_reference: String,
    stem: Stem,
    direction: Direction,
    gain_db: f32,
}

impl RemixRequest {
    pub fn new(
        track_reference: impl Into<String>,
        stem: Stem,
        direction: Direction,
        gain_db: f32,
    ) -> Result<Self> {
        if !gain_db.is_finite() {
            return Err(RemixError::InvalidRequest(format!(
                "gain must be a finite number, got {gain_db}"
            )));
        }
        if gain_db.abs() > MAX_GAIN_DB {
            return Err(RemixError::InvalidRequest(format!(
                "gain must be between -{MAX_GAIN_DB} and +{MAX_GAIN_DB} dB"
            )));
        }
        Ok(Self {
            track_reference: track_reference.into(),
            stem,
            direction,
            gain_db,
        })
    }

    pub fn track_reference(&self) -> &str {
        &self.track_reference
    }

    pub fn stem(&self) -> Stem {
        self.stem
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Gain applied to the targeted stem: `reduce` subtracts the stored value.
    pub fn effective_gain_db(&self) -> f32 {
        self.direction.sign() * self.gain_db
    }

    /// What the mix actually does to the stem. A zero gain keeps the
    /// requested direction.
    pub fn effective_direction(&self) -> Direction {
        let effective = self.effective_gain_db();
        if effective > 0.0 {
            Direction::Boost
        } else if effective < 0.0 {
            Direction::Reduce
        } else {
            self.direction
        }
    }

    /// `{title} ({Stem} {Action}).{ext}`
    pub fn output_filename(&self, title: &str, ext: &str) -> String {
        format!(
            "{} ({} {}).{}",
            title,
            self.stem.display_name(),
            self.effective_direction().action(),
            ext
        )
    }
}

/// Unvalidated wire form of [`RemixRequest`].
#[derive(Deserialize)]
struct RawRemixRequest {
    track_reference: String,
    stem: Stem,
    direction: Direction,
    gain_db: f32,
}

impl TryFrom<RawRemixRequest> for RemixRequest {
    type Error = RemixError;

    fn try_from(raw: RawRemixRequest) -> Result<Self> {
        RemixRequest::new(raw.track_reference, raw.stem, raw.direction, raw.gain_db)
    }
}

/// Result of resolving a track reference to a local file.
#[derive(Clone, Debug)]
pub struct AcquiredTrack {
    pub local_path: PathBuf,
    pub title: String,
    pub duration_secs: f64,
}

/// Settings forwarded to the separation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeparationOptions {
    pub shifts: u32,
    pub jobs: u32,
}

#[derive(Clone, Debug)]
pub struct EncodedArtifact {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
    pub bitrate_kbps: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Queued,
    Downloading,
    Separating,
    Mixing,
    Encoding,
    Delivering,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Stage following this one on the success path.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Downloading),
            Stage::Downloading => Some(Stage::Separating),
            Stage::Separating => Some(Stage::Mixing),
            Stage::Mixing => Some(Stage::Encoding),
            Stage::Encoding => Some(Stage::Delivering),
            Stage::Delivering => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Stage::Queued => "Queued",
            Stage::Downloading => "Downloading…",
            Stage::Separating => "Separating (AI)…",
            Stage::Mixing => "Mixing…",
            Stage::Encoding => "Encoding…",
            Stage::Delivering => "Uploading…",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Queued => "queued",
            Stage::Downloading => "downloading",
            Stage::Separating => "separating",
            Stage::Mixing => "mixing",
            Stage::Encoding => "encoding",
            Stage::Delivering => "delivering",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub stage: Stage,
    pub message: String,
}

/// Why a run ended in [`Stage::Failed`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Last stage entered before failing.
    pub stage: Stage,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} during {}: {}", self.kind, self.stage, self.message)
    }
}

impl std::error::Error for RunFailure {}

pub type RunOutcome = std::result::Result<EncodedArtifact, RunFailure>;

/// Allowed duration difference between stems, in milliseconds.
pub const STEM_ALIGNMENT_TOLERANCE_MS: u32 = 50;

/// The four separated stems of one track, indexed in [`Stem::ALL`] order.
#[derive(Clone, Debug)]
pub struct StemSet {
    stems: [AudioData; 4],
    paths: [PathBuf; 4],
}

impl StemSet {
    /// Builds a set from `(stem, file, audio)` triples, checking that every
    /// stem is present once and that the waveforms line up.
    pub fn new(entries: Vec<(Stem, PathBuf, AudioData)>) -> Result<Self> {
        let mut slots: [Option<(PathBuf, AudioData)>; 4] = [None, None, None, None];
        for (stem, path, audio) in entries {
            if slots[stem.index()].is_some() {
                return Err(RemixError::Separation(format!("duplicate {stem} stem")));
            }
            slots[stem.index()] = Some((path, audio));
        }

        let mut paths: Vec<PathBuf> = Vec::with_capacity(4);
        let mut stems: Vec<AudioData> = Vec::with_capacity(4);
        for (stem, slot) in Stem::ALL.iter().zip(slots) {
            let (path, audio) =
                slot.ok_or_else(|| RemixError::Separation(format!("missing {stem} stem")))?;
            paths.push(path);
            stems.push(audio);
        }

        let reference = &stems[0];
        if reference.sample_rate == 0 || reference.channels == 0 {
            return Err(RemixError::Separation("stems have an empty audio spec".into()));
        }
        let tolerance =
            (reference.sample_rate as usize * STEM_ALIGNMENT_TOLERANCE_MS as usize) / 1000;
        for (stem, audio) in Stem::ALL.iter().zip(&stems) {
            if audio.sample_rate != reference.sample_rate || audio.channels != reference.channels {
                return Err(RemixError::Separation(format!(
                    "{stem} stem is {} Hz/{}ch, expected {} Hz/{}ch",
                    audio.sample_rate, audio.channels, reference.sample_rate, reference.channels
                )));
            }
            if audio.frames().abs_diff(reference.frames()) > tolerance {
                return Err(RemixError::Separation(format!(
                    "{stem} stem has {} frames, expected {} (±{tolerance})",
                    audio.frames(),
                    reference.frames()
                )));
            }
        }

        Ok(Self {
            stems: four(stems)?,
            paths: four(paths)?,
        })
    }

    pub fn get(&self, stem: Stem) -> &AudioData {
        &self.stems[stem.index()]
    }

    pub fn path(&self, stem: Stem) -> &PathBuf {
        &self.paths[stem.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stem, &AudioData)> {
        Stem::ALL.into_iter().zip(self.stems.iter())
    }

    pub fn sample_rate(&self) -> u32 {
        self.stems[0].sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.stems[0].channels
    }

    /// Longest stem, in frames.
    pub fn frames(&self) -> usize {
        self.stems.iter().map(AudioData::frames).max().unwrap_or(0)
    }
}

fn four<T>(v: Vec<T>) -> Result<[T; 4]> {
    <[T; 4]>::try_from(v).map_err(|_| RemixError::Internal("stem count mismatch".into()))
}

/// Linear gain multiplier per stem, derived from a [`RemixRequest`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixPlan {
    gains: [f32; 4],
}

impl MixPlan {
    pub fn from_request(request: &RemixRequest) -> Self {
        let mut gains = [1.0f32; 4];
        gains[request.stem().index()] = db_to_gain(request.effective_gain_db());
        Self { gains }
    }

    pub fn gain(&self, stem: Stem) -> f32 {
        self.gains[stem.index()]
    }

    pub fn gains(&self) -> [f32; 4] {
        self.gains
    }
}

pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(f32::MIN_POSITIVE).log10()
}
