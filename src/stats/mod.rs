//! Per-stream metric state machines
//!
//! Each estimator splits into an aggregator-side arrival recorder, a
//! reporter-side conversion that drives the persistent per-stream state
//! machine, and accumulation over time (consecutive epochs of one stream)
//! and over flows (streams of one flow).

pub(crate) mod loss;
pub(crate) mod packet;
pub(crate) mod reorder;

use crate::config::Measures;
use self::loss::{LossReport, LossState};
use self::packet::PacketStats;
use self::reorder::{ReorderReport, ReorderState};

/// Reporter-side per-stream (or per-flow) results for one report interval
#[derive(Debug, Clone, Default)]
pub(crate) struct ReporterData {
    pub packets: PacketStats,
    pub loss: LossReport,
    pub reorder: ReorderReport,
}

/// Persistent per-stream estimator state, owned by the reporter and living
/// across epochs
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    pub loss: LossState,
    pub reorder: ReorderState,
}

/// Accumulate a unit into a running per-stream accumulator over time
pub(crate) fn accumulate_time(accum: &mut ReporterData, unit: &ReporterData, measures: Measures) {
    accum.packets.accumulate(&unit.packets);
    if measures.loss {
        loss::accumulate_time(&mut accum.loss, &unit.loss);
    }
    if measures.reorder() {
        reorder::accumulate_time(&mut accum.reorder, &unit.reorder, measures);
    }
}

/// Accumulate a per-stream unit into its flow's accumulator
pub(crate) fn accumulate_flows(accum: &mut ReporterData, unit: &ReporterData, measures: Measures) {
    accum.packets.accumulate(&unit.packets);
    if measures.loss {
        loss::accumulate_flows(&mut accum.loss, &unit.loss);
    }
    if measures.reorder() {
        reorder::accumulate_flows(&mut accum.reorder, &unit.reorder, measures);
    }
}
