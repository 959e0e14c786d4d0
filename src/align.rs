//! Distance-basis construction, resampling and delta-time computation.
//!
//! Comparing two laps pointwise requires both to be expressed over the same
//! distance grid. The grid is the reference lap's own distance sequence,
//! restricted to the range every participating lap covers; the other laps'
//! channels are linearly interpolated onto it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CompareError, Stream};

/// Resamplable channel of a stream: elapsed time or a named metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel<'a> {
    Time,
    Metric(&'a str),
}

impl Channel<'_> {
    fn name(&self) -> &str {
        match *self {
            Channel::Time => "time",
            Channel::Metric(name) => name,
        }
    }
}

/// Shared distance grid used to make two or more streams comparable.
/// Derived per alignment; never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommonBasis {
    pub distance_m: Vec<f64>,
}

impl CommonBasis {
    /// Build the basis from a reference stream: its distance sequence
    /// restricted to the intersection of every input stream's coverage.
    pub fn build(reference: &Stream, others: &[&Stream]) -> Result<Self, CompareError> {
        let (mut lo, mut hi) = reference.distance_range();
        for other in others {
            let (o_lo, o_hi) = other.distance_range();
            if o_lo > hi || o_hi < lo {
                let (a_min, a_max) = reference.distance_range();
                return Err(CompareError::DisjointRange {
                    a: reference.entity().to_string(),
                    a_min,
                    a_max,
                    b: other.entity().to_string(),
                    b_min: o_lo,
                    b_max: o_hi,
                });
            }
            lo = lo.max(o_lo);
            hi = hi.min(o_hi);
        }
        let distance_m: Vec<f64> = reference
            .distance_m()
            .iter()
            .copied()
            .filter(|d| *d >= lo && *d <= hi)
            .collect();
        debug!(
            reference = reference.entity(),
            points = distance_m.len(),
            lo,
            hi,
            "common basis built"
        );
        Ok(Self { distance_m })
    }

    pub fn len(&self) -> usize {
        self.distance_m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance_m.is_empty()
    }
}

/// One stream's channel resampled onto a common basis; same length as the
/// basis, one value per basis distance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignedSeries {
    pub entity: String,
    pub channel: String,
    pub distance_m: Vec<f64>,
    pub values: Vec<f64>,
}

/// Linearly interpolate one channel of `stream` onto every basis distance.
///
/// A basis distance that exactly equals a sample's distance returns that
/// sample's value with no arithmetic applied. A zero-width bracket
/// (duplicate consecutive distances) yields the first of the tied pair.
/// Pure function; the stream is never mutated.
pub fn resample(
    stream: &Stream,
    basis: &CommonBasis,
    channel: Channel<'_>,
) -> Result<AlignedSeries, CompareError> {
    let values = stream.channel_values(channel)?;
    let xs = stream.distance_m();
    let mut out = Vec::with_capacity(basis.len());
    let mut idx = 0usize;
    for &d in &basis.distance_m {
        while idx + 1 < xs.len() && xs[idx + 1] < d {
            idx += 1;
        }
        let x0 = xs[idx];
        let v0 = values[idx];
        let v = if idx + 1 < xs.len() {
            let x1 = xs[idx + 1];
            let v1 = values[idx + 1];
            if d == x0 {
                v0
            } else if d == x1 {
                v1
            } else if x1 == x0 {
                v0
            } else {
                v0 + (v1 - v0) * (d - x0) / (x1 - x0)
            }
        } else {
            v0
        };
        out.push(v);
    }
    Ok(AlignedSeries {
        entity: stream.entity().to_string(),
        channel: channel.name().to_string(),
        distance_m: basis.distance_m.clone(),
        values: out,
    })
}

/// Time gap between two laps at equal distance.
///
/// Sign convention: positive `delta_s[i]` means `comparison` reached
/// `distance_m[i]` later than `reference`, i.e. the comparison lap is
/// behind at that point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaTime {
    pub reference: String,
    pub comparison: String,
    pub distance_m: Vec<f64>,
    pub delta_s: Vec<f64>,
}

/// Compute `time_comparison(d) - time_reference(d)` over the reference
/// stream's basis.
pub fn delta_time(reference: &Stream, comparison: &Stream) -> Result<DeltaTime, CompareError> {
    let basis = CommonBasis::build(reference, &[comparison])?;
    let ref_time = resample(reference, &basis, Channel::Time)?;
    let cmp_time = resample(comparison, &basis, Channel::Time)?;
    let delta_s = cmp_time
        .values
        .iter()
        .zip(&ref_time.values)
        .map(|(b, a)| b - a)
        .collect();
    Ok(DeltaTime {
        reference: reference.entity().to_string(),
        comparison: comparison.entity().to_string(),
        distance_m: basis.distance_m,
        delta_s,
    })
}
