use std::{fs::File, path::Path};

use hound::WavWriter;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use crate::{
    error::{RemixError, Result},
    types::AudioData,
};

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| unsupported(path, e))?;
    Ok(probed.format)
}

fn unsupported(path: &Path, e: SymphoniaError) -> RemixError {
    RemixError::UnsupportedFormat(format!("{}: {e}", path.display()))
}

/// Decodes the default track of `path` into interleaved f32 samples.
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path = path.as_ref();
    let mut format = open_format(path)?;

    let track = format
        .default_track()
        .ok_or_else(|| RemixError::UnsupportedFormat(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| unsupported(path, e))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unsupported(path, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet in {}: {e}", path.display());
                continue;
            }
            Err(e) => return Err(unsupported(path, e)),
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    debug!(
        "Read audio {}: sample_rate={}, channels={}, samples={}",
        path.display(),
        sample_rate,
        channels,
        samples.len()
    );

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// Duration in seconds, from container metadata when present, otherwise
/// from the timestamps of the last packet.
pub fn probe_duration<P: AsRef<Path>>(path: P) -> Result<f64> {
    let path = path.as_ref();
    let format = open_format(path)?;
    let track = format
        .default_track()
        .ok_or_else(|| RemixError::UnsupportedFormat(format!("{}: no audio track", path.display())))?;

    if let (Some(frames), Some(rate)) = (track.codec_params.n_frames, track.codec_params.sample_rate) {
        if rate > 0 {
            return Ok(frames as f64 / rate as f64);
        }
    }
    drop(format);

    scan_duration(path)
}

/// Duration in seconds from packet timestamps, without decoding any audio.
pub fn scan_duration<P: AsRef<Path>>(path: P) -> Result<f64> {
    let path = path.as_ref();
    let mut format = open_format(path)?;
    let track = format
        .default_track()
        .ok_or_else(|| RemixError::UnsupportedFormat(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;
    let time_base = track.codec_params.time_base;
    let sample_rate = track.codec_params.sample_rate;

    let mut end_ts = 0u64;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => {
                end_ts = end_ts.max(packet.ts() + packet.dur());
            }
            Ok(_) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unsupported(path, e)),
        }
    }

    match (time_base, sample_rate) {
        (Some(tb), _) => {
            let time = tb.calc_time(end_ts);
            Ok(time.seconds as f64 + time.frac)
        }
        (None, Some(rate)) if rate > 0 => Ok(end_ts as f64 / rate as f64),
        _ => Err(RemixError::UnsupportedFormat(format!(
            "{}: no timing information",
            path.display()
        ))),
    }
}

/// Writes 32-bit float WAV so intermediates are not requantized.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioData) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec).map_err(wav_error)?;
    for &sample in &audio.samples {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(())
}

fn wav_error(e: hound::Error) -> RemixError {
    match e {
        hound::Error::IoError(io) => RemixError::Io(io),
        other => RemixError::Internal(format!("wav write failed: {other}")),
    }
}
