//! # stem-remix-core
//!
//! Stem-level remixing of audio tracks: acquire a track, split it into
//! bass/drums/vocals/other with a separation model, boost or reduce one stem,
//! limit the recombined mix and encode it under a size budget.

pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod paths;
pub mod types;

pub use crate::{
    config::RemixConfig,
    core::{
        audio::{probe_duration, read_audio, scan_duration, write_audio},
        dsp::{limit, LimiterSettings},
        encoder::{encode_within_budget, AudioEncoder, FfmpegEncoder},
        mixer::mix,
        pipeline::{PipelineRun, RemixHandle, RemixPipeline},
        separator::{load_stems, DemucsSeparator, StemSeparator},
        source::{DefaultSource, HttpSource, LocalLibrary, TrackSource},
    },
    error::{ErrorKind, RemixError, Result},
    types::{
        AcquiredTrack, AudioData, Direction, EncodedArtifact, MixPlan, ProgressEvent,
        RemixRequest, RunFailure, RunOutcome, SeparationOptions, Stage, Stem, StemSet,
    },
};
