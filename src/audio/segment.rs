use crate::audio::types::{round2, Segment, TempoCurve};

/// Collapse a tempo curve into maximal runs of equal two-decimal tempo.
///
/// Times are shifted by `window_start`. A run ends at the time of the first
/// point whose rounded tempo differs, so the segments tile the curve's time
/// range without gaps. Each segment keeps the unrounded tempo of its first
/// point.
pub fn segmentize(curve: &TempoCurve, window_start: f64) -> Vec<Segment> {
    let Some(first) = curve.points.first() else {
        return Vec::new();
    };

    let mut segments = Vec::new();
    let mut run_start = first.time;
    let mut run_bpm = first.bpm;

    for point in &curve.points[1..] {
        if !same_tempo(point.bpm, run_bpm) {
            segments.push(Segment {
                start: run_start + window_start,
                end: point.time + window_start,
                bpm: run_bpm,
            });
            run_start = point.time;
            run_bpm = point.bpm;
        }
    }

    let last_time = curve.points[curve.points.len() - 1].time;
    segments.push(Segment {
        start: run_start + window_start,
        end: last_time + window_start,
        bpm: run_bpm,
    });

    segments
}

/// Equal at two decimals, with NaN equal to itself
fn same_tempo(a: f64, b: f64) -> bool {
    let (a, b) = (round2(a), round2(b));
    a == b || (a.is_nan() && b.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::TempoPoint;

    fn curve(bpms: &[f64], step: f64) -> TempoCurve {
        TempoCurve::new(
            bpms.iter()
                .enumerate()
                .map(|(i, &bpm)| TempoPoint {
                    time: i as f64 * step,
                    bpm,
                })
                .collect(),
        )
    }

    /// Sample each segment's tempo back onto the original times
    fn reconstruct(original: &TempoCurve, segments: &[Segment], window_start: f64) -> TempoCurve {
        let points = original
            .points
            .iter()
            .map(|p| {
                let t = p.time + window_start;
                let segment = segments
                    .iter()
                    .rev()
                    .find(|s| s.start <= t)
                    .unwrap_or(&segments[0]);
                TempoPoint {
                    time: p.time,
                    bpm: segment.bpm,
                }
            })
            .collect();
        TempoCurve::new(points)
    }

    #[test]
    fn test_constant_curve_is_one_segment() {
        let c = curve(&[120.19; 50], 0.5);
        let segments = segmentize(&c, 3.0);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 3.0);
        assert_eq!(segments[0].end, 3.0 + 49.0 * 0.5);
        assert_eq!(segments[0].bpm, 120.19);
    }

    #[test]
    fn test_plateaus() {
        let c = curve(&[90.0, 90.0, 90.0, 150.0, 150.0, 120.0], 1.0);
        let segments = segmentize(&c, 0.0);

        assert_eq!(
            segments,
            vec![
                Segment { start: 0.0, end: 3.0, bpm: 90.0 },
                Segment { start: 3.0, end: 5.0, bpm: 150.0 },
                Segment { start: 5.0, end: 5.0, bpm: 120.0 },
            ]
        );
    }

    #[test]
    fn test_stores_unrounded_run_tempo() {
        let c = curve(&[120.001, 120.004, 119.999, 125.0], 1.0);
        let segments = segmentize(&c, 0.0);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].bpm, 120.001);
        assert_eq!(segments[0].end, 3.0);
    }

    #[test]
    fn test_segments_tile_the_curve() {
        let bpms: Vec<f64> = (0..200).map(|i| 100.0 + ((i / 17) % 4) as f64 * 7.5).collect();
        let c = curve(&bpms, 256.0 / 22050.0);
        let start = 12.25;
        let segments = segmentize(&c, start);

        assert_eq!(segments[0].start, c.points[0].time + start);
        assert_eq!(segments[segments.len() - 1].end, c.points[199].time + start);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert_ne!(round2(pair[0].bpm), round2(pair[1].bpm));
        }
    }

    #[test]
    fn test_segmentize_is_idempotent() {
        let bpms = [95.5, 95.5, 95.501, 120.3, 120.3, 88.0, 88.0, 88.0, 120.3];
        let c = curve(&bpms, 0.25);
        let segments = segmentize(&c, 1.5);

        let again = segmentize(&reconstruct(&c, &segments, 1.5), 1.5);
        assert_eq!(again, segments);
    }

    #[test]
    fn test_empty_and_single_point() {
        assert!(segmentize(&TempoCurve::default(), 0.0).is_empty());

        let single = segmentize(&curve(&[f64::INFINITY], 1.0), 2.0);
        assert_eq!(single, vec![Segment { start: 2.0, end: 2.0, bpm: f64::INFINITY }]);
    }
}
