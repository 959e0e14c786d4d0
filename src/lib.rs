//! Lap telemetry alignment and per-minisector dominance classification.
//!
//! Two laps recorded over the same route rarely share sample instants. This
//! crate aligns such streams onto a shared distance grid, computes the time
//! gap between them at equal distance, and splits the route into fixed-width
//! minisectors to decide which entity was locally quicker on a chosen metric.
//!
//! Acquisition of raw telemetry and any rendering of the results are outside
//! this crate: callers hand in validated [`Stream`]s and receive plain series
//! and verdict records back.

pub mod align;
pub mod sector;

pub use align::{delta_time, resample, AlignedSeries, Channel, CommonBasis, DeltaTime};
pub use sector::{classify, Segment, SegmentGrid, SegmentVerdict};

use std::collections::HashMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Conventional metric name for speed, the default comparison channel.
pub const SPEED: &str = "speed";

/// Historical minisector count used for track dominance maps.
pub const DEFAULT_SEGMENT_COUNT: usize = 25;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("stream '{entity}' has {len} samples; at least 2 are required")]
    EmptyStream { entity: String, len: usize },
    #[error("stream '{entity}' sample {index} has a non-finite or negative value")]
    InvalidSample { entity: String, index: usize },
    #[error("stream '{entity}' distance decreases at sample {index}")]
    NonMonotonicDistance { entity: String, index: usize },
    #[error("stream '{entity}' time decreases at sample {index}")]
    NonMonotonicTime { entity: String, index: usize },
    #[error(
        "streams '{a}' ({a_min:.1}..{a_max:.1} m) and '{b}' ({b_min:.1}..{b_max:.1} m) share no distance range"
    )]
    DisjointRange {
        a: String,
        a_min: f64,
        a_max: f64,
        b: String,
        b_min: f64,
        b_max: f64,
    },
    #[error("segment count must be at least 1, got {0}")]
    InvalidSegmentCount(usize),
    #[error("metric '{metric}' missing from stream '{entity}' at sample {index}")]
    UnknownMetric {
        metric: String,
        entity: String,
        index: usize,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// One telemetry sample as delivered by the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sample {
    pub distance_m: f64,
    pub time_s: f64,
    pub metrics: HashMap<String, f64>,
}

impl Sample {
    pub fn new(distance_m: f64, time_s: f64) -> Self {
        Self {
            distance_m,
            time_s,
            metrics: HashMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

/// One entity's ordered samples for one traversal of the route.
///
/// Validated once at construction and read-only afterwards. Channels are
/// stored column-wise; a metric column only exists if every sample carried
/// that metric, so interpolation never hits a hole mid-lap.
#[derive(Clone, Debug)]
pub struct Stream {
    entity: String,
    distance_m: Array1<f64>,
    time_s: Array1<f64>,
    metrics: HashMap<String, Array1<f64>>,
    // metric name -> first sample index where it was absent
    partial_metrics: HashMap<String, usize>,
}

impl Stream {
    pub fn new(entity: impl Into<String>, samples: Vec<Sample>) -> Result<Self, CompareError> {
        let entity = entity.into();
        if samples.len() < 2 {
            return Err(CompareError::EmptyStream {
                entity,
                len: samples.len(),
            });
        }
        for (index, s) in samples.iter().enumerate() {
            let ok = s.distance_m.is_finite()
                && s.distance_m >= 0.0
                && s.time_s.is_finite()
                && s.time_s >= 0.0
                && s.metrics.values().all(|v| v.is_finite());
            if !ok {
                return Err(CompareError::InvalidSample {
                    entity: entity.clone(),
                    index,
                });
            }
        }
        for index in 1..samples.len() {
            if samples[index].distance_m < samples[index - 1].distance_m {
                return Err(CompareError::NonMonotonicDistance {
                    entity: entity.clone(),
                    index,
                });
            }
            if samples[index].time_s < samples[index - 1].time_s {
                return Err(CompareError::NonMonotonicTime {
                    entity: entity.clone(),
                    index,
                });
            }
        }

        let mut metrics = HashMap::new();
        let mut partial_metrics = HashMap::new();
        for name in samples[0].metrics.keys() {
            let mut column = Vec::with_capacity(samples.len());
            let mut missing_at = None;
            for (index, s) in samples.iter().enumerate() {
                match s.metrics.get(name) {
                    Some(&v) => column.push(v),
                    None => {
                        missing_at = Some(index);
                        break;
                    }
                }
            }
            match missing_at {
                None => {
                    metrics.insert(name.clone(), Array1::from_vec(column));
                }
                Some(index) => {
                    partial_metrics.insert(name.clone(), index);
                }
            }
        }

        debug!(
            entity = %entity,
            samples = samples.len(),
            metrics = metrics.len(),
            "stream validated"
        );
        let distance_m: Array1<f64> = samples.iter().map(|s| s.distance_m).collect();
        let time_s: Array1<f64> = samples.iter().map(|s| s.time_s).collect();
        Ok(Self {
            entity,
            distance_m,
            time_s,
            metrics,
            partial_metrics,
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn len(&self) -> usize {
        self.distance_m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance_m.is_empty()
    }

    pub fn distance_m(&self) -> &Array1<f64> {
        &self.distance_m
    }

    pub fn time_s(&self) -> &Array1<f64> {
        &self.time_s
    }

    /// First and last distance of the traversal. Distances are sorted, so
    /// these bound the stream's coverage.
    pub fn distance_range(&self) -> (f64, f64) {
        (
            self.distance_m[0],
            self.distance_m[self.distance_m.len() - 1],
        )
    }

    pub(crate) fn channel_values(&self, channel: Channel<'_>) -> Result<&Array1<f64>, CompareError> {
        match channel {
            Channel::Time => Ok(&self.time_s),
            Channel::Metric(name) => {
                self.metrics
                    .get(name)
                    .ok_or_else(|| CompareError::UnknownMetric {
                        metric: name.to_string(),
                        entity: self.entity.clone(),
                        index: self.partial_metrics.get(name).copied().unwrap_or(0),
                    })
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    /// Metric used for per-segment dominance.
    pub metric: String,
    /// Number of equal-width minisectors over the route.
    pub segment_count: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            metric: SPEED.to_string(),
            segment_count: DEFAULT_SEGMENT_COUNT,
        }
    }
}

/// Full comparison output for the renderer: the time-gap trace between the
/// first two streams plus one dominance verdict per minisector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Comparison {
    pub delta: DeltaTime,
    pub segments: Vec<Segment>,
    pub verdicts: Vec<Option<SegmentVerdict>>,
}

/// Run the whole pipeline over two or more streams.
///
/// The first stream is the delta-time reference; dominance is classified
/// across all of them on `params.metric`.
pub fn compare(streams: &[&Stream], params: &Params) -> Result<Comparison, CompareError> {
    if streams.len() < 2 {
        return Err(CompareError::InvalidParameter(format!(
            "comparison needs at least 2 streams, got {}",
            streams.len()
        )));
    }
    let delta = align::delta_time(streams[0], streams[1])?;
    let grid = sector::SegmentGrid::for_streams(streams, params.segment_count)?;
    let verdicts = sector::classify(streams, &grid, &params.metric)?;
    Ok(Comparison {
        delta,
        segments: grid.segments().to_vec(),
        verdicts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(entity: &str, points: &[(f64, f64, f64)]) -> Stream {
        let samples = points
            .iter()
            .map(|&(d, t, v)| Sample::new(d, t).with_metric(SPEED, v))
            .collect();
        Stream::new(entity, samples).unwrap()
    }

    #[test]
    fn test_rejects_short_stream() {
        let err = Stream::new("VER", vec![Sample::new(0.0, 0.0)]).unwrap_err();
        assert!(matches!(err, CompareError::EmptyStream { len: 1, .. }));
    }

    #[test]
    fn test_rejects_distance_decrease_at_index() {
        let samples = vec![
            Sample::new(0.0, 0.0),
            Sample::new(10.0, 1.0),
            Sample::new(5.0, 2.0),
        ];
        let err = Stream::new("VER", samples).unwrap_err();
        match err {
            CompareError::NonMonotonicDistance { entity, index } => {
                assert_eq!(entity, "VER");
                assert_eq!(index, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_time_decrease() {
        let samples = vec![Sample::new(0.0, 1.0), Sample::new(10.0, 0.5)];
        let err = Stream::new("VER", samples).unwrap_err();
        assert!(matches!(err, CompareError::NonMonotonicTime { index: 1, .. }));
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let samples = vec![Sample::new(0.0, 0.0), Sample::new(f64::NAN, 1.0)];
        let err = Stream::new("VER", samples).unwrap_err();
        assert!(matches!(err, CompareError::InvalidSample { index: 1, .. }));
    }

    #[test]
    fn test_partial_metric_reports_first_missing_sample() {
        let samples = vec![
            Sample::new(0.0, 0.0).with_metric("throttle", 1.0),
            Sample::new(5.0, 0.5),
            Sample::new(10.0, 1.0).with_metric("throttle", 0.8),
        ];
        let s = Stream::new("VER", samples).unwrap();
        let err = s.channel_values(Channel::Metric("throttle")).unwrap_err();
        match err {
            CompareError::UnknownMetric { metric, index, .. } => {
                assert_eq!(metric, "throttle");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compare_two_lap_pipeline() {
        // spec scenarios: delta 0.2s/0.3s and the reference winning the lap
        let a = stream("VER", &[(0.0, 0.0, 100.0), (10.0, 1.0, 120.0)]);
        let b = stream("LEC", &[(0.0, 0.2, 90.0), (10.0, 1.3, 110.0)]);
        let params = Params {
            segment_count: 1,
            ..Params::default()
        };
        let out = compare(&[&a, &b], &params).unwrap();

        assert_eq!(out.delta.delta_s.len(), 2);
        assert!((out.delta.delta_s[0] - 0.2).abs() < 1e-12);
        assert!((out.delta.delta_s[1] - 0.3).abs() < 1e-12);
        assert_eq!(out.segments.len(), 1);
        let verdict = out.verdicts[0].as_ref().unwrap();
        assert_eq!(verdict.winner, "VER");
        assert!((verdict.winning_value - 110.0).abs() < 1e-12);
        assert!((verdict.means["LEC"] - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_compare_requires_two_streams() {
        let a = stream("VER", &[(0.0, 0.0, 100.0), (10.0, 1.0, 120.0)]);
        let err = compare(&[&a], &Params::default()).unwrap_err();
        assert!(matches!(err, CompareError::InvalidParameter(_)));
    }

    #[test]
    fn test_compare_surfaces_unknown_metric() {
        let a = stream("VER", &[(0.0, 0.0, 100.0), (10.0, 1.0, 120.0)]);
        let b = stream("LEC", &[(0.0, 0.2, 90.0), (10.0, 1.3, 110.0)]);
        let params = Params {
            metric: "rpm".to_string(),
            segment_count: 1,
        };
        let err = compare(&[&a, &b], &params).unwrap_err();
        assert!(matches!(err, CompareError::UnknownMetric { .. }));
    }

    #[test]
    fn test_comparison_serde_round_trip() {
        let a = stream("VER", &[(0.0, 0.0, 100.0), (10.0, 1.0, 120.0)]);
        let b = stream("LEC", &[(0.0, 0.2, 90.0), (10.0, 1.3, 110.0)]);
        let out = compare(&[&a, &b], &Params::default()).unwrap();
        let json = serde_json::to_string(&out).unwrap();
        let back: Comparison = serde_json::from_str(&json).unwrap();
        assert_eq!(back.delta.delta_s, out.delta.delta_s);
        assert_eq!(back.verdicts.len(), out.verdicts.len());
    }
}
