use ndarray::{ArrayView1, ArrayViewMut1, Zip};
use tracing::debug;

use crate::{
    core::dsp::{limit, LimiterSettings},
    error::{RemixError, Result},
    types::{AudioData, MixPlan, StemSet},
};

/// Sums the gain-adjusted stems, then peak-limits the result.
///
/// The sum is deliberately left unnormalized: normalizing here would undo
/// the requested emphasis. Shorter stems are zero-padded to the longest.
/// Stems are accumulated in place into the output buffer.
pub fn mix(stems: &StemSet, plan: &MixPlan, limiter: &LimiterSettings) -> Result<AudioData> {
    let channels = stems.channels() as usize;
    let len = stems.frames() * channels;
    if len == 0 {
        return Err(RemixError::Separation("stems contain no audio".into()));
    }

    let mut mixed = vec![0.0f32; len];
    for (stem, audio) in stems.iter() {
        let gain = plan.gain(stem);
        let n = audio.samples.len().min(len);
        Zip::from(ArrayViewMut1::from(&mut mixed[..n]))
            .and(ArrayView1::from(&audio.samples[..n]))
            .for_each(|acc, &sample| *acc += gain * sample);
    }

    let report = limit(&mut mixed, channels, stems.sample_rate(), limiter);
    debug!(
        "Mixed {} samples: peak {:.3} -> {:.3}, reduction {:.1} dB, makeup {:.1} dB",
        len, report.input_peak, report.output_peak, report.max_reduction_db, report.makeup_db
    );

    Ok(AudioData {
        samples: mixed,
        sample_rate: stems.sample_rate(),
        channels: stems.channels(),
    })
}
