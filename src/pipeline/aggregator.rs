//! Aggregator thread: group arrivals into periodic epoch buckets
//!
//! The loop waits on the staging queue with a deadline at the next epoch
//! boundary and rotates the working epoch whenever the boundary passes,
//! whether or not arrivals are pending. Rotation hands the finished map to
//! the reporter and pulls recycled allocations back, all under one
//! acquisition of the pipeline mutex.

use super::PipelineShared;
use crate::config::Measures;
use crate::epoch::{self, EpochMap, Pools};
use crate::staging::{Popped, StagingHandle};
use crate::stats::{loss, reorder};
use crate::{timing, PacketInfo};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) struct AggregatorCtx {
    pub shared: Arc<PipelineShared>,
    pub queue: StagingHandle<PacketInfo>,
    pub interval: Duration,
    pub measures: Measures,
}

pub(crate) fn run(mut ctx: AggregatorCtx) {
    tracing::debug!(interval = ?ctx.interval, "aggregator started");

    let mut pools = Pools::default();
    let mut current = EpochMap::new();
    let mut deadline = Instant::now() + ctx.interval;

    while !ctx.shared.is_done() {
        // The boundary may have passed while we were busy processing;
        // rotate before draining anything further.
        if Instant::now() > deadline {
            rotate(&ctx.shared, &mut current, &mut pools);
            deadline += ctx.interval;
            continue;
        }

        match ctx.queue.pop_deadline(deadline) {
            Popped::Item(info) => handle_arrival(&mut current, &mut pools, &info, ctx.measures),
            Popped::Timeout => {
                rotate(&ctx.shared, &mut current, &mut pools);
                deadline += ctx.interval;
            }
            Popped::Shutdown => break,
        }
    }

    tracing::debug!("aggregator exiting");
}

fn handle_arrival(current: &mut EpochMap, pools: &mut Pools, info: &PacketInfo, measures: Measures) {
    let key = epoch::MapKey::stream(&info.stream);
    let data = epoch::force_entry(current, key, pools);

    // Arrival timestamps reflect processing time at the aggregator, not
    // push time at the producer.
    let ts = timing::now_micros();

    data.packets.arrival(ts, info.seq);
    if measures.loss {
        loss::loss_arrival(&mut data.loss, info.seq);
    }
    if measures.reorder() {
        reorder::reorder_arrival(&mut data.reorder, info.seq);
    }
}

/// Epoch rotation: publish the working map, reclaim spent allocations, wake
/// the reporter if it is sleeping, and start a fresh working map.
fn rotate(shared: &PipelineShared, current: &mut EpochMap, pools: &mut Pools) {
    let finished = std::mem::take(current);
    {
        let mut handoff = shared.handoff.lock().unwrap();
        handoff.pending.push_back(finished);
        pools.absorb(&mut handoff.pools);
        if handoff.reporter_sleeping {
            shared.cond.notify_one();
        }
    }
    *current = pools.take_map();
}
