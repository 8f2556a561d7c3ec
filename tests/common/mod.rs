#![allow(dead_code)]

use std::{
    f32::consts::PI,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Mutex,
    },
    thread,
    time::Duration,
};

use stem_remix_core::{
    load_stems, read_audio, write_audio, AcquiredTrack, AudioData, AudioEncoder, RemixConfig,
    RemixError, Result, SeparationOptions, StemSeparator, StemSet, TrackSource,
};

pub fn tone(secs: f32, sample_rate: u32, channels: u16, freq: f32, amp: f32) -> AudioData {
    let frames = (secs * sample_rate as f32) as usize;
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let s = (2.0 * PI * freq * t).sin() * amp;
        for _ in 0..channels {
            samples.push(s);
        }
    }
    AudioData {
        samples,
        sample_rate,
        channels,
    }
}

pub fn write_tone(path: &Path, secs: f32, sample_rate: u32) -> PathBuf {
    write_audio(path, &tone(secs, sample_rate, 1, 220.0, 0.5)).unwrap();
    path.to_path_buf()
}

/// Config pointing at a private scratch root.
pub fn test_config(scratch: &Path) -> RemixConfig {
    RemixConfig {
        scratch_dir: scratch.to_path_buf(),
        ..RemixConfig::default()
    }
}

pub fn scratch_entries(scratch: &Path) -> usize {
    match fs::read_dir(scratch) {
        Ok(rd) => rd.count(),
        Err(_) => 0,
    }
}

/// Serves one fixture file under a fixed title.
pub struct FixtureSource {
    pub file: PathBuf,
    pub title: String,
    pub calls: AtomicUsize,
}

impl FixtureSource {
    pub fn new(file: PathBuf, title: &str) -> Self {
        Self {
            file,
            title: title.into(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl TrackSource for FixtureSource {
    fn resolve(&self, _reference: &str, dest_dir: &Path) -> Result<AcquiredTrack> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let local_path = dest_dir.join(self.file.file_name().unwrap());
        fs::copy(&self.file, &local_path)?;
        let duration_secs = read_audio(&local_path)?.duration_secs();
        Ok(AcquiredTrack {
            local_path,
            title: self.title.clone(),
            duration_secs,
        })
    }
}

/// Never finds anything.
pub struct EmptySource;

impl TrackSource for EmptySource {
    fn resolve(&self, reference: &str, _dest_dir: &Path) -> Result<AcquiredTrack> {
        Err(RemixError::NotFound(reference.to_string()))
    }
}

/// Blocks until released, then delegates.
pub struct GatedSource {
    pub inner: FixtureSource,
    pub release: Mutex<mpsc::Receiver<()>>,
}

impl TrackSource for GatedSource {
    fn resolve(&self, reference: &str, dest_dir: &Path) -> Result<AcquiredTrack> {
        self.release.lock().unwrap().recv().ok();
        self.inner.resolve(reference, dest_dir)
    }
}

/// Writes each stem as a scaled copy of the input and reads them back.
pub struct CopySeparator {
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub delay: Duration,
}

impl CopySeparator {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            delay,
        }
    }
}

impl StemSeparator for CopySeparator {
    fn separate(&self, input: &Path, output_dir: &Path, _opts: &SeparationOptions) -> Result<StemSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);

        let audio = read_audio(input)?;
        for (i, name) in ["bass", "drums", "vocals", "other"].iter().enumerate() {
            let scale = 0.2 + 0.1 * i as f32;
            let stem = AudioData {
                samples: audio.samples.iter().map(|s| s * scale).collect(),
                ..audio.clone()
            };
            write_audio(output_dir.join(format!("{name}.wav")), &stem)?;
        }
        let stems = load_stems(output_dir);

        self.active.fetch_sub(1, Ordering::SeqCst);
        stems
    }

    fn name(&self) -> &str {
        "copy"
    }
}

/// Fails with a fixed error.
pub struct FailingSeparator(pub fn() -> RemixError);

impl StemSeparator for FailingSeparator {
    fn separate(&self, _input: &Path, _output_dir: &Path, _opts: &SeparationOptions) -> Result<StemSet> {
        Err((self.0)())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Signals when it starts, then waits to be released before delegating.
pub struct GatedSeparator {
    pub inner: CopySeparator,
    pub started: Mutex<mpsc::Sender<()>>,
    pub release: Mutex<mpsc::Receiver<()>>,
}

impl StemSeparator for GatedSeparator {
    fn separate(&self, input: &Path, output_dir: &Path, opts: &SeparationOptions) -> Result<StemSet> {
        self.started.lock().unwrap().send(()).ok();
        self.release.lock().unwrap().recv().ok();
        self.inner.separate(input, output_dir, opts)
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Constant-bitrate stand-in: `duration * kbps * 125` bytes.
pub struct CbrEncoder {
    pub calls: Mutex<Vec<u32>>,
}

impl CbrEncoder {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn expected_size(duration_secs: f64, kbps: u32) -> u64 {
        (duration_secs * kbps as f64 * 125.0).ceil() as u64
    }
}

impl AudioEncoder for CbrEncoder {
    fn encode(&self, input_wav: &Path, output: &Path, bitrate_kbps: u32) -> Result<()> {
        self.calls.lock().unwrap().push(bitrate_kbps);
        let reader = hound::WavReader::open(input_wav)
            .map_err(|e| RemixError::Encode(e.to_string()))?;
        let spec = reader.spec();
        let frames = reader.len() as f64 / spec.channels as f64;
        let duration = frames / spec.sample_rate as f64;
        let size = Self::expected_size(duration, bitrate_kbps) as usize;
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        fs::write(output, bytes)?;
        Ok(())
    }

    fn extension(&self) -> &str {
        "mp3"
    }
}
