//! Reporter thread: drive the estimators and emit results on schedule
//!
//! The reporter sleeps on the handoff condition until epochs are pending,
//! drains them as one batch, and processes the earliest epoch whenever at
//! least `min_batches` are in hand; the epochs behind it serve as the loss
//! estimator's look-ahead window. Every schedule slot keeps its own tracker
//! map of accumulated results; when a slot comes due, stream entries roll
//! up into flow entries of the same tagged map and each non-empty flow is
//! reported through the callback.

use super::{PipelineShared, ReportCallback};
use crate::config::Measures;
use crate::epoch::{self, EpochMap, MapKey, Pools};
use crate::results::{LossResults, ReorderDensityResults, ReorderExtentResults, Results};
use crate::schedule::ReportSchedule;
use crate::stats::{self, loss, reorder, ReporterData, StreamState};
use crate::timing;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub(crate) struct ReporterCtx {
    pub shared: Arc<PipelineShared>,
    pub schedule: ReportSchedule,
    pub min_batches: u32,
    pub measures: Measures,
    pub callback: Option<ReportCallback>,
}

pub(crate) fn run(mut ctx: ReporterCtx) {
    let ntrackers = ctx.schedule.parallelism();
    tracing::debug!(trackers = ntrackers, min_batches = ctx.min_batches, "reporter started");

    let mut trackers: Vec<HashMap<MapKey, ReporterData>> =
        (0..ntrackers).map(|_| HashMap::new()).collect();
    let mut states: HashMap<MapKey, StreamState> = HashMap::new();
    let mut local: VecDeque<EpochMap> = VecDeque::new();
    let mut pools = Pools::default();

    loop {
        {
            let mut handoff = ctx.shared.handoff.lock().unwrap();
            handoff.reporter_sleeping = true;
            while handoff.pending.is_empty() && !ctx.shared.is_done() {
                handoff = ctx.shared.cond.wait(handoff).unwrap();
            }
            handoff.reporter_sleeping = false;
            if ctx.shared.is_done() {
                break;
            }

            // Take every pending epoch in one batch; send spent
            // allocations back toward the aggregator.
            local.append(&mut handoff.pending);
            handoff.pools.absorb(&mut pools);
        }

        while local.len() >= ctx.min_batches as usize {
            process_earliest(&mut ctx, &mut trackers, &mut states, &mut local, &mut pools);
        }
    }

    tracing::debug!("reporter exiting");
}

fn process_earliest(
    ctx: &mut ReporterCtx,
    trackers: &mut [HashMap<MapKey, ReporterData>],
    states: &mut HashMap<MapKey, StreamState>,
    local: &mut VecDeque<EpochMap>,
    pools: &mut Pools,
) {
    let Some(epoch) = local.pop_front() else {
        return;
    };

    // Convert this epoch's aggregator data, stream by stream, and fold the
    // conversion into every tracker slot.
    for (key, agg) in epoch.iter() {
        let state = states.entry(*key).or_default();

        let mut rd = ReporterData {
            packets: agg.packets,
            ..Default::default()
        };
        if ctx.measures.loss {
            loss::loss_a2r(
                &mut rd.loss,
                &agg.loss,
                &mut state.loss,
                local.iter(),
                key,
                ctx.min_batches,
            );
        }
        if ctx.measures.reorder() {
            reorder::reorder_a2r(&mut rd.reorder, &agg.reorder, &mut state.reorder, ctx.measures);
        }

        for tracker in trackers.iter_mut() {
            let accum = tracker.entry(*key).or_default();
            stats::accumulate_time(accum, &rd, ctx.measures);
        }
    }

    // Fire every slot that has come due.
    let now = timing::now_micros();
    for slot in 0..trackers.len() {
        let Some(outlets) = ctx.schedule.outlets(slot, now) else {
            continue;
        };
        let wants_callback = outlets.contains('c');
        if !wants_callback {
            tracing::warn!(outlets, "unsupported report outlet");
        }

        let tracker = &mut trackers[slot];

        // Consolidate stream-level entries into flow-level entries of the
        // same map. Keys are collected first so insertion cannot disturb
        // the iteration.
        let stream_keys: Vec<MapKey> =
            tracker.keys().filter(|k| k.is_stream()).copied().collect();
        for key in stream_keys {
            let unit = tracker.get(&key).cloned().unwrap_or_default();
            let accum = tracker.entry(key.to_flow()).or_default();
            stats::accumulate_flows(accum, &unit, ctx.measures);
        }

        if wants_callback {
            if let Some(callback) = ctx.callback.as_mut() {
                let duration = ctx.schedule.duration_us(slot);
                for (key, data) in tracker.iter() {
                    if !key.is_flow() || data.packets.packet_count == 0 {
                        continue;
                    }
                    let results = build_results(key, data, duration, ctx.measures);
                    callback(&results);
                }
            }
        }

        ctx.schedule.reset(slot, timing::now_micros());
        tracker.clear();
    }

    epoch::recycle_map(epoch, pools);
}

/// Assemble the public record for one flow
fn build_results(key: &MapKey, data: &ReporterData, duration: u64, measures: Measures) -> Results {
    let mut results = Results {
        flow_key: key.flow_key(),
        earliest: data.packets.earliest,
        latest: data.packets.latest,
        duration,
        min_seq: data.packets.min_seq,
        max_seq: data.packets.max_seq,
        packet_count: data.packets.packet_count,
        loss: None,
        reorder_extent: None,
        reorder_density: None,
    };

    if measures.loss && data.loss.received > 0 {
        results.loss = Some(LossResults::from_tallies(
            data.loss.received,
            data.loss.dropped,
            data.loss.consecutive_drops,
        ));
    }

    if measures.extent {
        let hist = &data.reorder.extent_hist;
        let any = hist[..crate::MAX_EXTENT].iter().any(|&c| c > 0);
        if any || data.reorder.extent_assumed_drops > 0 {
            results.reorder_extent = Some(ReorderExtentResults::from_hist(
                hist,
                data.reorder.extent_assumed_drops,
            ));
        }
    }

    if measures.density {
        let any = data.reorder.fd.iter().any(|&c| c > 0);
        if any || data.reorder.density_assumed_drops > 0 {
            results.reorder_density = Some(ReorderDensityResults::from_fd(&data.reorder.fd));
        }
    }

    results
}
