//! Public result records delivered to the report callback

use serde::Serialize;
use crate::{DT, KEY_SIZE, MAX_EXTENT, WINDOW_SIZE};

/// Per-flow loss metrics for one report interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossResults {
    /// Packets received during the interval; duplicates do not count
    pub packets_received: f64,
    /// Packets dropped during the interval; duplicates do not count
    pub packets_dropped: f64,
    /// The loss ratio itself: dropped / (received + dropped)
    pub value: f64,
    /// A run of N contiguous dropped packets, N >= 1, contributes N - 1
    pub consecutive_drops: f64,
    /// Autocorrelation coefficient expressing how likely consecutive
    /// packets are both lost, normalized by the variance
    pub autocorr: f64,
}

/// Reorder-extent histogram for one report interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReorderExtentResults {
    /// `MAX_EXTENT` bins; bin i counts non-duplicate packets observed with
    /// extent i
    pub bins: Vec<u32>,
    /// Missing packets declared dropped because their extent would exceed
    /// `MAX_EXTENT`
    pub assumed_drops: u32,
}

/// One reorder-density histogram bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReorderDensityBin {
    /// Displacement, in `-DT ..= DT`
    pub distance: i32,
    pub frequency: u32,
}

/// Reorder-density histogram for one report interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReorderDensityResults {
    /// `WINDOW_SIZE` bins covering distances `-DT ..= DT`
    pub bins: Vec<ReorderDensityBin>,
}

/// A complete per-flow report, passed by reference to the callback.
/// Each metric payload is present only when its estimator is enabled and
/// produced something to say.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Results {
    /// Flow the results apply to
    pub flow_key: [u8; KEY_SIZE],
    /// Bounding wall-clock timestamps of the received packets, in
    /// microseconds since the Unix epoch
    pub earliest: u64,
    pub latest: u64,
    /// Duration of the measurement interval, microseconds
    pub duration: u64,
    /// Bounding sequence numbers
    pub min_seq: u32,
    pub max_seq: u32,
    /// Number of observed packets
    pub packet_count: u32,
    pub loss: Option<LossResults>,
    pub reorder_extent: Option<ReorderExtentResults>,
    pub reorder_density: Option<ReorderDensityResults>,
}

impl LossResults {
    /// Derive the public loss record from raw tallies
    pub(crate) fn from_tallies(received: u32, dropped: u32, consecutive_drops: u32) -> Self {
        let r = f64::from(received);
        let d = f64::from(dropped);
        let c = f64::from(consecutive_drops);
        let autocorr = if d != 0.0 { (c * r + c * d - d * d) / (d * r) } else { 0.0 };
        LossResults {
            packets_received: r,
            packets_dropped: d,
            value: d / (r + d),
            consecutive_drops: c,
            autocorr,
        }
    }
}

impl ReorderDensityResults {
    pub(crate) fn from_fd(fd: &[u32; WINDOW_SIZE]) -> Self {
        ReorderDensityResults {
            bins: fd
                .iter()
                .enumerate()
                .map(|(i, &frequency)| ReorderDensityBin {
                    distance: i as i32 - DT as i32,
                    frequency,
                })
                .collect(),
        }
    }
}

impl ReorderExtentResults {
    pub(crate) fn from_hist(hist: &[u32; MAX_EXTENT + 1], assumed_drops: u32) -> Self {
        ReorderExtentResults {
            bins: hist[..MAX_EXTENT].to_vec(),
            assumed_drops,
        }
    }
}
