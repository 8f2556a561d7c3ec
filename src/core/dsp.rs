use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::gain_to_db;

/// Averaging window for adaptive release, in milliseconds.
const RELEASE_AVERAGE_MS: f32 = 400.0;
/// How much sustained gain reduction stretches the release time.
const RELEASE_SPREAD: f32 = 4.0;

/// Peak limiter parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Linear ceiling no output sample may exceed, in (0, 1].
    pub ceiling: f32,
    /// Lookahead and attack time.
    pub attack_ms: f32,
    pub release_ms: f32,
    /// Lengthen release while gain reduction is sustained.
    pub adaptive_release: bool,
    /// Apply makeup gain after limiting so the output peak sits at the ceiling.
    pub auto_level: bool,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            ceiling: 0.95,
            attack_ms: 5.0,
            release_ms: 50.0,
            adaptive_release: true,
            auto_level: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LimiterReport {
    pub input_peak: f32,
    pub output_peak: f32,
    /// Deepest gain reduction applied, in dB (<= 0).
    pub max_reduction_db: f32,
    pub makeup_db: f32,
}

pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .filter(|s| s.is_finite())
        .fold(0.0f32, |acc, s| acc.max(s.abs()))
}

fn ms_to_samples(ms: f32, sample_rate: u32) -> usize {
    (ms.max(0.0) / 1000.0 * sample_rate as f32).round() as usize
}

/// One-pole smoothing coefficient reaching ~63% of a step in `samples`.
fn smoothing_coef(samples: f32) -> f32 {
    if samples <= 1.0 {
        1.0
    } else {
        1.0 - (-1.0 / samples).exp()
    }
}

/// `out[i] = min(values[i..=i + window])`, clamped at the end of the slice.
fn forward_min(values: &[f32], window: usize) -> Vec<f32> {
    let mut out = vec![1.0f32; values.len()];
    let mut deque: VecDeque<usize> = VecDeque::new();
    for i in (0..values.len()).rev() {
        while let Some(&back) = deque.back() {
            if values[back] >= values[i] {
                deque.pop_back();
            } else {
                break;
            }
        }
        deque.push_back(i);
        while let Some(&front) = deque.front() {
            if front > i + window {
                deque.pop_front();
            } else {
                break;
            }
        }
        if let Some(&front) = deque.front() {
            out[i] = values[front];
        }
    }
    out
}

/// Lookahead peak limiter over interleaved samples, in place.
///
/// Channels are linked: every channel of a frame gets the same gain.
/// Afterwards no sample magnitude exceeds `settings.ceiling`; non-finite
/// input samples are zeroed.
pub fn limit(
    samples: &mut [f32],
    channels: usize,
    sample_rate: u32,
    settings: &LimiterSettings,
) -> LimiterReport {
    let channels = channels.max(1);
    let ceiling = settings.ceiling;

    for s in samples.iter_mut() {
        if !s.is_finite() {
            *s = 0.0;
        }
    }
    let input_peak = peak(samples);

    // Gain each frame needs on its own to sit at the ceiling.
    let targets: Vec<f32> = samples
        .chunks(channels)
        .map(|frame| {
            let p = peak(frame);
            if p > ceiling {
                ceiling / p
            } else {
                1.0
            }
        })
        .collect();

    let lookahead = ms_to_samples(settings.attack_ms, sample_rate);
    let required = forward_min(&targets, lookahead);

    let attack_coef = smoothing_coef(lookahead as f32 / 5.0);
    let release_samples = ms_to_samples(settings.release_ms, sample_rate).max(1) as f32;
    let average_coef = smoothing_coef(ms_to_samples(RELEASE_AVERAGE_MS, sample_rate) as f32);

    let mut env = 1.0f32;
    let mut average = 1.0f32;
    let mut min_env = 1.0f32;

    for ((frame, &req), &target) in samples
        .chunks_mut(channels)
        .zip(required.iter())
        .zip(targets.iter())
    {
        if req < env {
            env += (req - env) * attack_coef;
        } else {
            let stretch = if settings.adaptive_release {
                1.0 + RELEASE_SPREAD * (1.0 - average)
            } else {
                1.0
            };
            env += (req - env) * smoothing_coef(release_samples * stretch);
        }
        // The smoothed envelope may lag; the frame's own target is a hard bound.
        env = env.min(target);
        average += (env - average) * average_coef;
        min_env = min_env.min(env);

        for s in frame.iter_mut() {
            *s *= env;
        }
    }

    let mut makeup = 1.0f32;
    if settings.auto_level {
        let limited_peak = peak(samples);
        if limited_peak > 0.0 && limited_peak < ceiling {
            makeup = ceiling / limited_peak;
            for s in samples.iter_mut() {
                *s *= makeup;
            }
        }
    }

    for s in samples.iter_mut() {
        *s = s.clamp(-ceiling, ceiling);
    }

    LimiterReport {
        input_peak,
        output_peak: peak(samples),
        max_reduction_db: gain_to_db(min_env),
        makeup_db: gain_to_db(makeup),
    }
}
