//! Click-track synthesis and mixing for listening back to detected beats.

use tracing::debug;

use crate::audio::types::{AudioBuffer, ClickParameters};
use crate::error::Result;

/// One click: a sine at `freq` Hz decaying from 1 to 2^-10 over
/// `round(duration * sample_rate)` samples
pub fn synthesize_click(sample_rate: u32, freq: f64, duration: f64) -> Vec<f32> {
    let len = (duration * sample_rate as f64).round() as usize;
    let omega = 2.0 * std::f64::consts::PI * freq / sample_rate as f64;
    let decay_steps = len.saturating_sub(1).max(1) as f64;

    (0..len)
        .map(|i| {
            let envelope = 2f64.powf(-10.0 * i as f64 / decay_steps);
            (envelope * (omega * i as f64).sin()) as f32
        })
        .collect()
}

/// Click track of `length` samples with a click starting at each time.
///
/// Clicks start at `floor(t * sample_rate)`, are cut at the end of the
/// track, and add where they overlap.
pub fn synthesize_clicks(times: &[f64], sample_rate: u32, length: usize, freq: f64, duration: f64) -> Vec<f32> {
    let click = synthesize_click(sample_rate, freq, duration);
    let mut track = vec![0.0f32; length];

    for &t in times {
        let position = (t * sample_rate as f64).floor();
        if !(0.0..length as f64).contains(&position) {
            continue;
        }
        let start = position as usize;
        for (dst, &c) in track[start..].iter_mut().zip(&click) {
            *dst += c;
        }
    }

    track
}

/// `samples * volume / 100 + clicks`, divided through by its mean when that
/// mean exceeds 1
pub fn mix(samples: &[f32], clicks: &[f32], volume: u8) -> Vec<f32> {
    let gain = volume as f32 / 100.0;
    let mut mixed: Vec<f32> = samples
        .iter()
        .zip(clicks)
        .map(|(&s, &c)| s * gain + c)
        .collect();

    let mean = mixed.iter().map(|&v| v as f64).sum::<f64>() / mixed.len().max(1) as f64;
    if mean > 1.0 {
        debug!("Scaling mixed audio down by its mean {:.3}", mean);
        for v in mixed.iter_mut() {
            *v = (*v as f64 / mean) as f32;
        }
    }

    mixed
}

/// Mix clicks at `beats` (seconds, relative to the buffer) into the buffer.
///
/// Returns the mixed samples and the buffer's sample rate.
pub fn render(
    buffer: &AudioBuffer,
    beats: &[f64],
    volume: u8,
    click_freq: f64,
    click_duration: f64,
) -> Result<(Vec<f32>, u32)> {
    ClickParameters {
        volume,
        click_freq,
        click_duration,
    }
    .validate()?;

    let clicks = synthesize_clicks(beats, buffer.sample_rate, buffer.len(), click_freq, click_duration);
    Ok((mix(&buffer.samples, &clicks, volume), buffer.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_shape() {
        let click = synthesize_click(22050, 660.0, 0.1);
        assert_eq!(click.len(), 2205);
        assert_eq!(click[0], 0.0);

        // Envelope ends at 2^-10
        let peak_head = click[..100].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let peak_tail = click[2105..].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak_head > 0.9);
        assert!(peak_tail < 2.0 / 1024.0);
    }

    #[test]
    fn test_silence_without_beats() {
        let buffer = AudioBuffer::new(vec![0.7; 4410], 22050);
        let (mixed, sample_rate) = render(&buffer, &[], 0, 660.0, 0.1).unwrap();
        assert_eq!(sample_rate, 22050);
        assert_eq!(mixed.len(), buffer.len());
        assert!(mixed.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_click_placement_and_clipping() {
        let click = synthesize_click(1000, 100.0, 0.05);
        let track = synthesize_clicks(&[0.0105, 0.98, 2.0, -1.0], 1000, 1000, 100.0, 0.05);

        assert_eq!(track.len(), 1000);
        // floor(0.0105 * 1000) = 10
        assert!(track[..10].iter().all(|&v| v == 0.0));
        assert_eq!(&track[10..60], &click[..]);
        // Last click is cut at the end of the track
        assert_eq!(&track[980..], &click[..20]);
    }

    #[test]
    fn test_overlapping_clicks_add() {
        let click = synthesize_click(1000, 50.0, 0.1);
        let track = synthesize_clicks(&[0.0, 0.0], 1000, 200, 50.0, 0.1);
        for (t, c) in track.iter().zip(&click) {
            assert_eq!(*t, 2.0 * c);
        }
    }

    #[test]
    fn test_volume_scales_source() {
        let samples: Vec<f32> = (0..100).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        let mixed = mix(&samples, &vec![0.0; 100], 20);
        for (m, s) in mixed.iter().zip(&samples) {
            assert_eq!(*m, s * 0.2);
        }
    }

    #[test]
    fn test_mean_normalization() {
        let samples: Vec<f32> = (0..1000).map(|i| 2.0 + (i % 7) as f32 * 0.25).collect();
        let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / samples.len() as f64;
        assert!(mean > 1.0);

        let mixed = mix(&samples, &vec![0.0; 1000], 100);
        for (m, s) in mixed.iter().zip(&samples) {
            assert!((*m as f64 * mean - *s as f64).abs() < 1e-5);
        }

        // A mean at or below 1 leaves the mix untouched
        let quiet = vec![0.5f32; 10];
        assert_eq!(mix(&quiet, &vec![0.0; 10], 100), quiet);
    }

    #[test]
    fn test_invalid_click_parameters() {
        let buffer = AudioBuffer::new(vec![0.0; 100], 22050);
        assert!(render(&buffer, &[], 101, 660.0, 0.1).unwrap_err().is_invalid_parameter());
        assert!(render(&buffer, &[], 20, 0.0, 0.1).unwrap_err().is_invalid_parameter());
        assert!(render(&buffer, &[], 20, 660.0, 0.0).unwrap_err().is_invalid_parameter());
    }
}
