//! The three-stage estimation pipeline
//!
//! Producers (application threads) push packet metadata through batched
//! staging handles. One aggregator thread groups arrivals into periodic
//! epochs; one reporter thread runs the estimators over a sliding window of
//! epochs and invokes the application callback on schedule. The `Estimator`
//! owns both threads along with the handoff state between them.

pub(crate) mod aggregator;
pub(crate) mod reporter;

use crate::config::{EstimatorOptions, Measures};
use crate::epoch::{EpochMap, Pools};
use crate::error::{Error, Result};
use crate::results::Results;
use crate::schedule::ReportSchedule;
use crate::staging::{FlushMode, StagingHandle, StagingQueue};
use crate::{timing, PacketInfo};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Callback invoked by the reporter thread with each flow's results
pub type ReportCallback = Box<dyn FnMut(&Results) + Send>;

/// Handoff state between the aggregator and the reporter, all behind one
/// mutex
pub(crate) struct Handoff {
    /// Epochs awaiting the reporter, earliest first
    pub pending: VecDeque<EpochMap>,
    /// Spent allocations on their way back to the aggregator
    pub pools: Pools,
    pub reporter_sleeping: bool,
}

pub(crate) struct PipelineShared {
    pub handoff: Mutex<Handoff>,
    pub cond: Condvar,
    pub done: AtomicBool,
}

impl PipelineShared {
    fn new() -> Arc<Self> {
        Arc::new(PipelineShared {
            handoff: Mutex::new(Handoff {
                pending: VecDeque::new(),
                pools: Pools::default(),
                reporter_sleeping: false,
            }),
            cond: Condvar::new(),
            done: AtomicBool::new(false),
        })
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// The estimation service. Owns the aggregator and reporter threads;
/// dropping or shutting it down joins both. A fresh `Estimator` after
/// shutdown behaves exactly like a fresh process.
pub struct Estimator {
    shared: Arc<PipelineShared>,
    queue: Arc<StagingQueue<PacketInfo>>,
    aggregator: Option<JoinHandle<()>>,
    reporter: Option<JoinHandle<()>>,
}

impl Estimator {
    /// Validate the configuration, start both pipeline threads and return
    /// the running service. Configuration errors are returned before any
    /// thread is spawned.
    pub fn new(options: EstimatorOptions, callback: Option<ReportCallback>) -> Result<Self> {
        options.validate()?;
        let schedule = ReportSchedule::parse(&options.reporter_schedule, timing::now_micros())?;
        let measures = Measures::from_options(&options);

        if measures.loss {
            tracing::info!("initializing loss estimator");
        }
        if measures.reorder() {
            tracing::info!(
                extent = measures.extent,
                density = measures.density,
                "initializing reorder estimator"
            );
        }

        let shared = PipelineShared::new();
        let queue = StagingQueue::new();

        let agg_ctx = aggregator::AggregatorCtx {
            shared: Arc::clone(&shared),
            queue: queue.handle(),
            interval: options.aggregation_interval,
            measures,
        };
        let aggregator = std::thread::Builder::new()
            .name("flowgauge-aggregator".to_string())
            .spawn(move || aggregator::run(agg_ctx))?;

        let rep_ctx = reporter::ReporterCtx {
            shared: Arc::clone(&shared),
            schedule,
            min_batches: options.reporter_min_batches,
            measures,
            callback,
        };
        let reporter = match std::thread::Builder::new()
            .name("flowgauge-reporter".to_string())
            .spawn(move || reporter::run(rep_ctx))
        {
            Ok(handle) => handle,
            Err(e) => {
                // Unwind the aggregator before reporting the failure.
                shared.done.store(true, Ordering::SeqCst);
                queue.shutdown();
                let _ = aggregator.join();
                return Err(e.into());
            }
        };

        Ok(Estimator {
            shared,
            queue,
            aggregator: Some(aggregator),
            reporter: Some(reporter),
        })
    }

    /// Open a producer handle. Handles are cheap; give one to each
    /// producing thread.
    pub fn handle(&self) -> EstimatorHandle {
        EstimatorHandle { queue: self.queue.handle() }
    }

    /// Stop the pipeline: wake and join both threads. Pushed metadata that
    /// has not yet been aggregated is discarded.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        if self.aggregator.is_none() && self.reporter.is_none() {
            return Ok(());
        }
        self.shared.done.store(true, Ordering::SeqCst);
        self.queue.shutdown();

        if let Some(handle) = self.aggregator.take() {
            handle
                .join()
                .map_err(|_| Error::Other("aggregator thread panicked".to_string()))?;
        }

        {
            let _guard = self.shared.handoff.lock().unwrap();
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.reporter.take() {
            handle
                .join()
                .map_err(|_| Error::Other("reporter thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for Estimator {
    fn drop(&mut self) {
        let _ = self.shutdown_inner();
    }
}

/// Producer-side handle: a batched staging queue into the aggregator
pub struct EstimatorHandle {
    queue: StagingHandle<PacketInfo>,
}

impl EstimatorHandle {
    /// Stage one packet's metadata. Batched: nothing reaches the
    /// aggregator until an explicit [`flush`](Self::flush).
    pub fn push(&mut self, info: &PacketInfo) -> Result<()> {
        if self.queue.push(*info, FlushMode::NoFlush) {
            Ok(())
        } else {
            Err(Error::Shutdown)
        }
    }

    /// Flush staged metadata to the aggregator
    pub fn flush(&mut self) -> Result<()> {
        if self.queue.flush() {
            Ok(())
        } else {
            Err(Error::Shutdown)
        }
    }

    /// Override the staging queue's auto-flush threshold for this handle
    pub fn set_flush_threshold(&mut self, threshold: usize) {
        self.queue.set_flush_threshold(threshold);
    }

    /// Number of staged items not yet flushed
    pub fn staged_len(&self) -> usize {
        self.queue.local_len()
    }
}
