//! Flowgauge: real-time, in-process network-quality estimation
//!
//! Applications feed per-packet metadata (flow key, stream id, sequence
//! number) as packets arrive; the library runs a three-stage concurrent
//! pipeline and periodically reports per-flow quality metrics through an
//! application-supplied callback:
//!
//! - packet loss with drop-burst and autocorrelation statistics,
//! - Reorder Extent (RFC 4737),
//! - Reorder Density (RFC 5236).
//!
//! ```no_run
//! use flowgauge::{Estimator, EstimatorOptions, PacketInfo, StreamTuple};
//! use std::time::Duration;
//!
//! let options = EstimatorOptions {
//!     aggregation_interval: Duration::from_millis(500),
//!     reporter_schedule: "c,5,0".to_string(),
//!     reporter_min_batches: 5,
//!     ..Default::default()
//! };
//! let estimator = Estimator::new(
//!     options,
//!     Some(Box::new(|results| {
//!         println!("flow {:?}: {} packets", results.flow_key, results.packet_count);
//!     })),
//! )
//! .expect("configuration is valid");
//!
//! let mut handle = estimator.handle();
//! let stream = StreamTuple { flow_key: [42, 43], stream_id: 44 };
//! for seq in 0..100 {
//!     handle.push(&PacketInfo { stream, seq }).unwrap();
//! }
//! handle.flush().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod flowstate;
pub mod results;
pub mod seqno;
pub mod staging;

mod epoch;
mod pipeline;
mod schedule;
mod stats;
mod timing;

pub use config::EstimatorOptions;
pub use error::{Error, Result};
pub use pipeline::{Estimator, EstimatorHandle, ReportCallback};
pub use results::{
    LossResults, ReorderDensityBin, ReorderDensityResults, ReorderExtentResults, Results,
};

use serde::{Deserialize, Serialize};

/// Bytes in a flow key
pub const KEY_SIZE: usize = 2;

/// Largest reorder extent tracked; later arrivals are capped here
pub const MAX_EXTENT: usize = 255;

/// Reorder-density displacement threshold; distances span `-DT ..= DT`
pub const DT: usize = 8;

/// Number of reorder-density histogram bins
pub const WINDOW_SIZE: usize = 2 * DT + 1;

/// How far behind the next expected sequence number a missing-packet record
/// may fall before it is pruned
pub const MAX_HISTORY: usize = 2 * MAX_EXTENT;

/// Identity of a packet stream: a user-provided flow key plus the stream's
/// identifier within that flow. The pair uniquely identifies a sequence
/// space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTuple {
    pub flow_key: [u8; KEY_SIZE],
    pub stream_id: u8,
}

/// Per-packet metadata pushed by producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInfo {
    pub stream: StreamTuple,
    /// Sequence number of the packet within its stream
    pub seq: u32,
}
