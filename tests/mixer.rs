mod common;

use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use common::tone;
use stem_remix_core::{
    core::dsp::peak, mix, AudioData, Direction, ErrorKind, LimiterSettings, MixPlan, RemixRequest,
    Stem, StemSet,
};

const SR: u32 = 8_000;

fn silence(frames: usize) -> AudioData {
    AudioData {
        samples: vec![0.0; frames],
        sample_rate: SR,
        channels: 1,
    }
}

fn set(audio: [AudioData; 4]) -> StemSet {
    let entries = Stem::ALL
        .into_iter()
        .zip(audio)
        .map(|(stem, a)| (stem, PathBuf::from(format!("{stem}.wav")), a))
        .collect();
    StemSet::new(entries).unwrap()
}

/// Bass plays the first half, vocals the second; the rest is silent.
fn split_halves() -> StemSet {
    let half = SR as usize;
    let mut bass = tone(2.0, SR, 1, 110.0, 0.5);
    bass.samples[half..].fill(0.0);
    let mut vocals = tone(2.0, SR, 1, 440.0, 0.5);
    vocals.samples[..half].fill(0.0);
    set([bass, silence(2 * half), vocals, silence(2 * half)])
}

fn request(stem: Stem, direction: Direction, gain: f32) -> RemixRequest {
    RemixRequest::new("Billie Jean", stem, direction, gain).unwrap()
}

#[test]
fn plan_targets_only_the_requested_stem() {
    let plan = MixPlan::from_request(&request(Stem::Vocals, Direction::Reduce, 60.0));
    assert_abs_diff_eq!(plan.gain(Stem::Vocals), 0.001, epsilon = 1e-6);
    for stem in [Stem::Bass, Stem::Drums, Stem::Other] {
        assert_eq!(plan.gain(stem), 1.0);
    }

    let plan = MixPlan::from_request(&request(Stem::Bass, Direction::Boost, 4.0));
    assert_abs_diff_eq!(plan.gain(Stem::Bass), 1.584_893, epsilon = 1e-5);
}

#[test]
fn mix_stays_under_ceiling_for_any_gain() {
    let stems = split_halves();
    let limiter = LimiterSettings::default();
    for stem in Stem::ALL {
        for gain in [0.0, 4.0, 12.0, 40.0, 100.0] {
            for direction in [Direction::Boost, Direction::Reduce] {
                let plan = MixPlan::from_request(&request(stem, direction, gain));
                let out = mix(&stems, &plan, &limiter).unwrap();
                assert!(
                    out.peak() <= limiter.ceiling,
                    "{direction:?} {stem} {gain} dB peaked at {}",
                    out.peak()
                );
                assert_eq!(out.samples.len(), stems.frames());
            }
        }
    }
}

#[test]
fn reduce_keeps_relative_attenuation_after_limiting() {
    let stems = split_halves();
    let plan = MixPlan::from_request(&request(Stem::Vocals, Direction::Reduce, 60.0));
    let out = mix(&stems, &plan, &LimiterSettings::default()).unwrap();

    let half = SR as usize;
    let edge = SR as usize / 10;
    let bass_region = peak(&out.samples[..half - edge]);
    let vocal_region = peak(&out.samples[half + edge..]);
    assert!(bass_region > 0.5);
    assert!(
        vocal_region < bass_region * 0.01,
        "vocals at {vocal_region}, bass at {bass_region}"
    );
}

#[test]
fn boost_makes_target_stem_dominant() {
    let stems = split_halves();
    let plan = MixPlan::from_request(&request(Stem::Vocals, Direction::Boost, 12.0));
    let out = mix(&stems, &plan, &LimiterSettings::default()).unwrap();

    let half = SR as usize;
    let edge = SR as usize / 10;
    let bass_region = peak(&out.samples[..half - edge]);
    let vocal_region = peak(&out.samples[half + edge..]);
    assert!(vocal_region > bass_region);
    assert!(vocal_region <= 0.95);
}

#[test]
fn short_stems_are_padded() {
    let long = tone(1.0, SR, 1, 220.0, 0.2);
    let mut short = tone(1.0, SR, 1, 330.0, 0.2);
    // 10 ms shorter, inside the alignment tolerance
    short.samples.truncate(short.samples.len() - 80);
    let stems = set([long.clone(), short, long.clone(), long]);

    let plan = MixPlan::from_request(&request(Stem::Drums, Direction::Boost, 4.0));
    let out = mix(&stems, &plan, &LimiterSettings::default()).unwrap();
    assert_eq!(out.frames(), SR as usize);
}

#[test]
fn misaligned_stems_are_rejected() {
    let long = tone(1.0, SR, 1, 220.0, 0.2);
    let short = tone(0.5, SR, 1, 220.0, 0.2);
    let entries = Stem::ALL
        .into_iter()
        .zip([long.clone(), short, long.clone(), long])
        .map(|(stem, a)| (stem, PathBuf::from(stem.as_str()), a))
        .collect();
    let err = StemSet::new(entries).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeparationError);
}

#[test]
fn mismatched_sample_rates_are_rejected() {
    let a = tone(1.0, SR, 1, 220.0, 0.2);
    let b = tone(1.0, SR * 2, 1, 220.0, 0.2);
    let entries = Stem::ALL
        .into_iter()
        .zip([a.clone(), a.clone(), b, a])
        .map(|(stem, a)| (stem, PathBuf::from(stem.as_str()), a))
        .collect();
    assert_eq!(
        StemSet::new(entries).unwrap_err().kind(),
        ErrorKind::SeparationError
    );
}

#[test]
fn missing_stem_is_rejected() {
    let a = tone(1.0, SR, 1, 220.0, 0.2);
    let entries = [Stem::Bass, Stem::Drums, Stem::Vocals]
        .into_iter()
        .map(|stem| (stem, PathBuf::from(stem.as_str()), a.clone()))
        .collect();
    let err = StemSet::new(entries).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeparationError);
    assert!(err.to_string().contains("other"));
}

#[test]
fn quiet_mix_is_the_exact_weighted_sum() {
    let bass = tone(1.0, SR, 2, 110.0, 0.05);
    let drums = tone(1.0, SR, 2, 220.0, 0.05);
    let vocals = tone(1.0, SR, 2, 440.0, 0.05);
    let mut other = tone(1.0, SR, 2, 880.0, 0.05);
    // 20 ms short, padded with silence
    other.samples.truncate(other.samples.len() - 2 * 160);
    let stems = set([bass.clone(), drums.clone(), vocals.clone(), other.clone()]);

    let plan = MixPlan::from_request(&request(Stem::Vocals, Direction::Boost, 6.0));
    let limiter = LimiterSettings {
        auto_level: false,
        ..LimiterSettings::default()
    };
    let out = mix(&stems, &plan, &limiter).unwrap();

    assert_eq!(out.channels, 2);
    assert_eq!(out.samples.len(), bass.samples.len());
    let g = plan.gain(Stem::Vocals);
    for i in (0..out.samples.len()).step_by(13) {
        let o = other.samples.get(i).copied().unwrap_or(0.0);
        let expected = bass.samples[i] + drums.samples[i] + g * vocals.samples[i] + o;
        assert_abs_diff_eq!(out.samples[i], expected, epsilon = 1e-6);
    }
}

#[test]
fn empty_stems_cannot_be_mixed() {
    let stems = set([silence(0), silence(0), silence(0), silence(0)]);
    let plan = MixPlan::from_request(&request(Stem::Bass, Direction::Boost, 4.0));
    let err = mix(&stems, &plan, &LimiterSettings::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SeparationError);
}
