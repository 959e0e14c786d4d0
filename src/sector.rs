//! Minisector partitioning and per-segment dominance classification.
//!
//! The route's distance span is cut into N equal-width segments; each
//! entity's metric is averaged per segment and the entity with the greatest
//! mean takes the segment. Track dominance maps are drawn straight from the
//! resulting verdicts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::align::Channel;
use crate::{CompareError, Stream};

/// Fixed-width slice of the route. Half-open `[start, end)`; the final
/// segment is closed so the route endpoint belongs to it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub start_m: f64,
    pub end_m: f64,
}

/// Equal-width partition of `[0, total_distance]`.
#[derive(Clone, Debug)]
pub struct SegmentGrid {
    segments: Vec<Segment>,
    width_m: f64,
    total_m: f64,
}

impl SegmentGrid {
    pub fn new(total_distance_m: f64, count: usize) -> Result<Self, CompareError> {
        if count < 1 {
            return Err(CompareError::InvalidSegmentCount(count));
        }
        if !total_distance_m.is_finite() || total_distance_m <= 0.0 {
            return Err(CompareError::InvalidParameter(format!(
                "total distance must be positive and finite, got {total_distance_m}"
            )));
        }
        let width_m = total_distance_m / count as f64;
        let mut segments = Vec::with_capacity(count);
        for index in 0..count {
            let start_m = width_m * index as f64;
            let end_m = if index + 1 == count {
                total_distance_m
            } else {
                width_m * (index + 1) as f64
            };
            segments.push(Segment {
                index,
                start_m,
                end_m,
            });
        }
        Ok(Self {
            segments,
            width_m,
            total_m: total_distance_m,
        })
    }

    /// Grid covering `[0, max distance]` across every input stream.
    pub fn for_streams(streams: &[&Stream], count: usize) -> Result<Self, CompareError> {
        if streams.is_empty() {
            return Err(CompareError::InvalidParameter(
                "at least one stream is required to size the grid".to_string(),
            ));
        }
        let total = streams
            .iter()
            .map(|s| s.distance_range().1)
            .fold(f64::NEG_INFINITY, f64::max);
        Self::new(total, count)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn count(&self) -> usize {
        self.segments.len()
    }

    pub fn width_m(&self) -> f64 {
        self.width_m
    }

    pub fn total_m(&self) -> f64 {
        self.total_m
    }

    /// Segment index for a distance, or `None` outside `[0, total]`.
    pub fn index_of(&self, distance_m: f64) -> Option<usize> {
        if !distance_m.is_finite() || distance_m < 0.0 || distance_m > self.total_m {
            return None;
        }
        // the route endpoint (and any float spill just below it) lands in
        // the closed final segment
        Some(((distance_m / self.width_m) as usize).min(self.segments.len() - 1))
    }

    /// Per-sample segment labels for one stream. Samples beyond the grid's
    /// total distance label as `None`.
    pub fn labels(&self, stream: &Stream) -> Vec<Option<usize>> {
        stream
            .distance_m()
            .iter()
            .map(|&d| self.index_of(d))
            .collect()
    }
}

/// Classification output for one segment: the winning entity and every
/// entity's mean of the chosen metric over its samples in the segment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentVerdict {
    pub segment: usize,
    pub winner: String,
    pub winning_value: f64,
    pub means: BTreeMap<String, f64>,
}

/// Decide the locally-best entity per segment.
///
/// Each entity's `metric` is averaged over its samples per segment; the
/// strictly greatest mean wins, ties going to the earliest stream in caller
/// order. A segment no entity sampled yields `None` rather than being
/// skipped, so the output always has one slot per segment index.
pub fn classify(
    streams: &[&Stream],
    grid: &SegmentGrid,
    metric: &str,
) -> Result<Vec<Option<SegmentVerdict>>, CompareError> {
    if streams.is_empty() {
        return Err(CompareError::InvalidParameter(
            "classification needs at least one stream".to_string(),
        ));
    }
    // resolve every metric column up front so a missing metric aborts the
    // whole classification instead of returning partial verdicts
    let columns = streams
        .iter()
        .map(|s| s.channel_values(Channel::Metric(metric)))
        .collect::<Result<Vec<_>, _>>()?;

    let count = grid.count();
    let mut sums = vec![vec![0.0f64; streams.len()]; count];
    let mut counts = vec![vec![0usize; streams.len()]; count];
    for (e, stream) in streams.iter().enumerate() {
        for (i, &d) in stream.distance_m().iter().enumerate() {
            if let Some(seg) = grid.index_of(d) {
                sums[seg][e] += columns[e][i];
                counts[seg][e] += 1;
            }
        }
    }

    let mut verdicts = Vec::with_capacity(count);
    for seg in 0..count {
        let mut means = BTreeMap::new();
        let mut winner: Option<(usize, f64)> = None;
        for (e, stream) in streams.iter().enumerate() {
            if counts[seg][e] == 0 {
                continue;
            }
            let mean = sums[seg][e] / counts[seg][e] as f64;
            means.insert(stream.entity().to_string(), mean);
            // strictly-greater comparison keeps the earliest entity on ties
            let better = match winner {
                None => true,
                Some((_, best)) => mean > best,
            };
            if better {
                winner = Some((e, mean));
            }
        }
        match winner {
            Some((e, winning_value)) => verdicts.push(Some(SegmentVerdict {
                segment: seg,
                winner: streams[e].entity().to_string(),
                winning_value,
                means,
            })),
            None => {
                warn!(segment = seg, "no entity sampled this segment");
                verdicts.push(None);
            }
        }
    }
    debug!(
        segments = count,
        entities = streams.len(),
        metric,
        "dominance classified"
    );
    Ok(verdicts)
}
