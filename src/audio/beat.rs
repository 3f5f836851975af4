//! Dynamic-programming beat tracker.
//!
//! Every frame gets a cumulative score: its own Gaussian-smoothed onset
//! strength plus the best score of a predecessor roughly one beat period
//! earlier, penalised by the squared log deviation from that period. The
//! beat sequence is recovered by backtracking from the strongest late peak.

use crate::audio::tempo::TempoEstimator;
use crate::audio::types::{AudioBuffer, TempoCurve, TempoParameters};
use crate::error::Result;

/// Tempo the tracker follows
#[derive(Debug, Clone, Copy)]
pub enum TempoGuide<'a> {
    /// One tempo for the whole signal
    Global(f64),
    /// One tempo per onset frame
    Local(&'a [f64]),
}

impl TempoGuide<'_> {
    fn bpm_at(&self, frame: usize) -> f64 {
        match self {
            TempoGuide::Global(bpm) => *bpm,
            TempoGuide::Local(bpms) => bpms
                .get(frame)
                .or_else(|| bpms.last())
                .copied()
                .unwrap_or(0.0),
        }
    }
}

/// Beat tracker settings
#[derive(Debug, Clone, Copy)]
pub struct BeatTracker {
    tightness: f64,
    trim: bool,
}

impl BeatTracker {
    pub fn new(tightness: f64, trim: bool) -> Self {
        Self { tightness, trim }
    }

    /// Beat positions as onset frame indices, strictly increasing.
    ///
    /// An envelope without any onset yields no beats.
    pub fn track(&self, onsets: &[f32], frame_rate: f64, guide: TempoGuide<'_>) -> Vec<usize> {
        if onsets.iter().all(|&v| v == 0.0) {
            return Vec::new();
        }

        let n = onsets.len();
        let frames_per_beat: Vec<f64> = (0..n)
            .map(|i| {
                (frame_rate * 60.0 / guide.bpm_at(i))
                    .round_ties_even()
                    .max(1.0)
                    .min(n as f64)
            })
            .collect();

        let normalized = normalize(onsets);
        let local = local_score(&normalized, &frames_per_beat);
        let (cumulative, backlinks) = self.dynamic_program(&local, &frames_per_beat);

        let mut beats = Vec::new();
        let mut frame = last_beat(&cumulative) as isize;
        while frame >= 0 {
            beats.push(frame as usize);
            frame = backlinks[frame as usize];
        }
        beats.reverse();

        self.trim_beats(&local, beats)
    }

    fn dynamic_program(&self, local: &[f64], frames_per_beat: &[f64]) -> (Vec<f64>, Vec<isize>) {
        let n = local.len();
        let mut cumulative = vec![0.0f64; n];
        let mut backlinks = vec![-1isize; n];

        // Weak leading frames do not start a beat chain
        let threshold = 0.01 * local.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut first_beat = true;

        for i in 0..n {
            let period = frames_per_beat[i];
            let nearest = i as isize - (period / 2.0).round_ties_even() as isize;
            let farthest = i as isize - 2 * period as isize;

            let mut best = f64::NEG_INFINITY;
            let mut best_loc = -1isize;
            let mut loc = nearest;
            while loc >= farthest && loc >= 0 {
                let interval = (i as isize - loc) as f64;
                let score = cumulative[loc as usize]
                    - self.tightness * (interval.ln() - period.ln()).powi(2);
                if score > best {
                    best = score;
                    best_loc = loc;
                }
                loc -= 1;
            }

            cumulative[i] = if best_loc >= 0 { local[i] + best } else { local[i] };

            if first_beat && local[i] < threshold {
                backlinks[i] = -1;
            } else {
                backlinks[i] = best_loc;
                first_beat = false;
            }
        }

        (cumulative, backlinks)
    }

    /// Drop beats in weak leading and trailing stretches
    fn trim_beats(&self, local: &[f64], beats: Vec<usize>) -> Vec<usize> {
        let threshold = if self.trim {
            let beat_scores: Vec<f64> = beats.iter().map(|&b| local[b]).collect();
            let smooth = smooth_beat_scores(&beat_scores, local.len());
            let mean_square = smooth.iter().map(|v| v * v).sum::<f64>() / smooth.len().max(1) as f64;
            0.5 * mean_square.sqrt()
        } else {
            0.0
        };

        let head = local.iter().take_while(|&&v| v <= threshold).count();
        let tail = local.len() - local.iter().rev().take_while(|&&v| v <= threshold).count();

        beats
            .into_iter()
            .filter(|&b| b >= head && b < tail)
            .collect()
    }
}

/// Beat times following a tempo curve, relative to the buffer start
pub fn align(buffer: &AudioBuffer, params: &TempoParameters, curve: &TempoCurve) -> Result<Vec<f64>> {
    Ok(TempoEstimator::new(buffer, params)?.align(curve))
}

/// Onsets scaled to unit sample standard deviation
fn normalize(onsets: &[f32]) -> Vec<f64> {
    let n = onsets.len() as f64;
    let mean = onsets.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = onsets
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0).max(1.0);
    let scale = variance.sqrt() + f64::MIN_POSITIVE;

    onsets.iter().map(|&v| v as f64 / scale).collect()
}

/// Onsets smoothed with a Gaussian spanning one beat period either side
fn local_score(onsets: &[f64], frames_per_beat: &[f64]) -> Vec<f64> {
    let n = onsets.len();

    (0..n)
        .map(|i| {
            let period = frames_per_beat[i];
            let reach = period as isize;
            (-reach..=reach)
                .filter_map(|d| {
                    let j = i as isize + d;
                    (j >= 0 && (j as usize) < n).then(|| {
                        let x = d as f64 * 32.0 / period;
                        (-0.5 * x * x).exp() * onsets[j as usize]
                    })
                })
                .sum::<f64>()
        })
        .collect()
}

/// Last local maximum of the cumulative score reaching half the median peak
fn last_beat(cumulative: &[f64]) -> usize {
    let n = cumulative.len();
    let is_peak = |i: usize| {
        i > 0 && cumulative[i] > cumulative[i - 1] && cumulative[i] >= cumulative[(i + 1).min(n - 1)]
    };

    let mut peaks: Vec<f64> = (0..n).filter(|&i| is_peak(i)).map(|i| cumulative[i]).collect();
    if peaks.is_empty() {
        return n - 1;
    }
    peaks.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = peaks.len() / 2;
    let median = if peaks.len() % 2 == 0 {
        0.5 * (peaks[mid - 1] + peaks[mid])
    } else {
        peaks[mid]
    };
    let threshold = 0.5 * median;

    (0..n)
        .rev()
        .find(|&i| is_peak(i) && cumulative[i] >= threshold)
        .unwrap_or(n - 1)
}

/// Beat strengths convolved with a 5-point Hann kernel, dropping the
/// first two outputs and keeping at most `limit`
fn smooth_beat_scores(scores: &[f64], limit: usize) -> Vec<f64> {
    const KERNEL: [f64; 5] = [0.0, 0.5, 1.0, 0.5, 0.0];

    let full_len = scores.len() + KERNEL.len() - 1;
    let full: Vec<f64> = (0..full_len)
        .map(|k| {
            KERNEL
                .iter()
                .enumerate()
                .filter(|&(j, _)| k >= j && k - j < scores.len())
                .map(|(j, w)| w * scores[k - j])
                .sum::<f64>()
        })
        .collect();

    full.into_iter().skip(2).take(limit).collect()
}
