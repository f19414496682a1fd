//! Configuration types for the estimator

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Estimator configuration, fixed at construction time.
///
/// The reporter schedule is a string of semicolon-separated repeating
/// reports, each `DESTS,INTERVAL[,OFFSET]` with the interval and offset in
/// seconds. `'c'` (the callback) is the only destination currently
/// understood. Example: `"c,5,0;c,5,2.5"` invokes the callback every 2.5
/// seconds, each report covering 5 seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorOptions {
    /// Period at which the aggregator hands an epoch of arrivals to the
    /// reporter
    #[serde(with = "humantime_serde")]
    pub aggregation_interval: Duration,

    /// Reporter schedule string, see above
    pub reporter_schedule: String,

    /// The reporter processes epochs only once at least this many are
    /// pending; epochs beyond the first serve as look-ahead for the loss
    /// estimator. Must be at least 1.
    pub reporter_min_batches: u32,

    /// Measure packet loss?
    pub measure_loss: bool,

    /// Measure reorder extent (RFC 4737)?
    pub measure_reorder_extent: bool,

    /// Measure reorder density (RFC 5236)?
    pub measure_reorder_density: bool,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        EstimatorOptions {
            aggregation_interval: Duration::from_millis(500),
            reporter_schedule: "c,5,0".to_string(),
            reporter_min_batches: 5,
            measure_loss: true,
            measure_reorder_extent: true,
            measure_reorder_density: true,
        }
    }
}

impl EstimatorOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.reporter_min_batches == 0 {
            return Err(Error::Config(
                "reporter_min_batches must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which estimators are enabled, threaded through the pipeline stages
#[derive(Debug, Clone, Copy)]
pub(crate) struct Measures {
    pub loss: bool,
    pub extent: bool,
    pub density: bool,
}

impl Measures {
    pub fn from_options(options: &EstimatorOptions) -> Self {
        Measures {
            loss: options.measure_loss,
            extent: options.measure_reorder_extent,
            density: options.measure_reorder_density,
        }
    }

    pub fn reorder(&self) -> bool {
        self.extent || self.density
    }
}
