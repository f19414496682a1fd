//! Packet-loss estimation over coalesced sequence-number ranges
//!
//! The aggregator records each epoch's arrivals as coalesced ranges. On the
//! reporter side, `loss_a2r` assembles the epoch's ranges with an anchor
//! from the previous epoch (when the flow state shows no delimiter between
//! them) and with borrowed ranges from up to `W - 1` future epochs, sorts
//! the assembly modulo wrap-around, and sweeps it once to tally received
//! packets, dropped packets, and drop-burst (gap) statistics.

use crate::epoch::{EpochMap, MapKey};
use crate::flowstate::FlowState;
use crate::seqno::{self, modular_distance, Seqno, SeqnoRange};

/// Wrap-around detection constant: half of this is the largest adjacent gap
/// an ascending range sort may contain without implying a wrap
const WRAPAROUND: Seqno = 1 << (Seqno::BITS / 2);

/// Aggregator-side per-stream per-epoch loss data
#[derive(Debug, Default)]
pub(crate) struct LossArrivals {
    pub ranges: Vec<SeqnoRange>,
    pub flow_state: FlowState,
}

/// Reporter-side per-stream (or per-flow) loss tallies
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LossReport {
    pub flow_state: FlowState,
    /// Streams excluded from a flow rollup because their flow state
    /// degenerated
    pub bad_flows: u32,
    pub received: u32,
    pub dropped: u32,
    pub consecutive_drops: u32,
    pub gap_total: u32,
    pub gap_count: u32,
    pub gap_min: u32,
    pub gap_max: u32,
}

/// Persistent per-stream loss state, owned by the reporter
#[derive(Debug, Default)]
pub(crate) struct LossState {
    /// Highest sequence number of the last computation, the "past" anchor
    /// for the next epoch when no delimiter intervenes
    pub high_seqno: Option<Seqno>,
    /// Last range swept, carried across computations
    pub last_range: Option<SeqnoRange>,
}

/// Record one arrival into the epoch's loss view
pub(crate) fn loss_arrival(lda: &mut LossArrivals, seq: Seqno) {
    seqno::record_arrival(&mut lda.ranges, seq);
    lda.flow_state = lda.flow_state.packet();
}

/// When an assembled range was received, relative to the epoch under
/// computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrivalPeriod {
    Past,
    Present,
    Future,
}

/// A range copied into the assembly: sort and sweep scratch state ride along
#[derive(Debug, Clone, Copy)]
struct RangeSlot {
    range: SeqnoRange,
    wraparound: bool,
    period: ArrivalPeriod,
}

fn rangecmp(a: &RangeSlot, b: &RangeSlot) -> std::cmp::Ordering {
    // The low comparison is modular: a range less than half the sequence
    // space ahead sorts later even across the numeric wrap point.
    b.wraparound
        .cmp(&a.wraparound)
        .then_with(|| (a.range.low.wrapping_sub(b.range.low) as i32).cmp(&0))
}

/// Convert one epoch's loss arrivals into report tallies, driving the
/// persistent state. `future` supplies the epochs after the one under
/// computation, in order; only entries for `key` participate, and only the
/// first `periods_to_wait - 1` epochs are consulted.
pub(crate) fn loss_a2r<'a>(
    ldr: &mut LossReport,
    lda: &LossArrivals,
    state: &mut LossState,
    future: impl Iterator<Item = &'a EpochMap>,
    key: &MapKey,
    periods_to_wait: u32,
) {
    let mut slots: Vec<RangeSlot> = Vec::with_capacity(lda.ranges.len() + 1);
    for r in &lda.ranges {
        slots.push(RangeSlot { range: *r, wraparound: false, period: ArrivalPeriod::Present });
    }
    ldr.flow_state = lda.flow_state;

    // A past anchor exists only when this epoch's arrivals abut the
    // previous epoch's: no delimiter in front, and a prior high to abut.
    if lda.flow_state.begins_with_p() {
        if let Some(high) = state.high_seqno {
            slots.push(RangeSlot {
                range: SeqnoRange { low: high, high },
                wraparound: false,
                period: ArrivalPeriod::Past,
            });
        }
    }

    // Borrow ranges from the look-ahead window.
    for epoch in future.take(periods_to_wait.saturating_sub(1) as usize) {
        if let Some(entry) = epoch.get(key) {
            for r in &entry.loss.ranges {
                slots.push(RangeSlot {
                    range: *r,
                    wraparound: false,
                    period: ArrivalPeriod::Future,
                });
            }
        }
    }

    state.high_seqno = None;
    if let Some(present_high) = compute(ldr, state, &mut slots) {
        state.high_seqno = Some(present_high);
    }
}

/// Sort the assembly, slice out the presently-accountable ranges, and sweep
/// them. Returns the high sequence number of the last accountable range.
fn compute(ldr: &mut LossReport, state: &mut LossState, slots: &mut [RangeSlot]) -> Option<Seqno> {
    let n = slots.len();
    if n == 0 {
        return None;
    }

    slots.sort_by(rangecmp);

    // Mark ranges front to back as pre-wrap; the first oversized adjacent
    // gap is the wrap point, and a re-sort rotates the marked prefix ahead.
    for i in 0..n {
        slots[i].wraparound = true;
        if i + 1 < n
            && slots[i + 1].range.low.wrapping_sub(slots[i].range.high) > WRAPAROUND / 2
        {
            slots.sort_by(rangecmp);
            break;
        }
    }

    // begin: first index after the last PAST range.
    // end: last index that is not FUTURE.
    let mut begin = 0usize;
    let mut end = n;
    for (i, slot) in slots.iter().enumerate() {
        if slot.period == ArrivalPeriod::Past {
            begin = i + 1;
        }
        if slot.period != ArrivalPeriod::Future {
            end = i;
        }
    }
    if end >= n {
        return None;
    }

    if begin <= end {
        // First-ever computation: pretend the packet just before the first
        // range arrived, so the sweep accounts the first range in full.
        let first_low = slots[begin].range.low;
        let last = state.last_range.get_or_insert(SeqnoRange {
            low: first_low.wrapping_sub(1),
            high: first_low.wrapping_sub(1),
        });
        let base = last.high;

        for slot in &slots[begin..=end] {
            let mut r = slot.range;
            let d_prev_high = modular_distance(base, last.high);
            let d_this_low = modular_distance(base, r.low);
            let d_this_high = modular_distance(base, r.high);

            // Overlap with the previously swept range.
            if d_this_low <= d_prev_high {
                if d_this_high <= d_prev_high {
                    // Fully subsumed.
                    continue;
                }
                // Rewrite the low side to one past the overlap point.
                // Example: (1, 5), (4, 6) accounts (4, 6) as (6, 6).
                r.low = r.high.min(last.high).wrapping_add(1);
            }
            // Never wrap back around into the base.
            if r.high < r.low {
                r.high = base.wrapping_sub(1);
            }

            let received = r.high.wrapping_sub(r.low).wrapping_add(1);
            let distance = modular_distance(last.high, r.low);
            // Example: (x, 4), (7, y): distance 3, gap 2 (seqnos 5 and 6).
            let gap = distance.saturating_sub(1);

            *last = r;

            ldr.received = ldr.received.wrapping_add(received);
            ldr.dropped = ldr.dropped.wrapping_add(gap);
            if gap > 1 {
                ldr.consecutive_drops += gap - 1;
            }
            if gap > 0 {
                if ldr.gap_count == 0 || gap < ldr.gap_min {
                    ldr.gap_min = gap;
                }
                if ldr.gap_count == 0 || gap > ldr.gap_max {
                    ldr.gap_max = gap;
                }
                ldr.gap_total += gap;
                ldr.gap_count += 1;
            }
        }
    }

    Some(slots[end].range.high)
}

fn accumulate(accum: &mut LossReport, unit: &LossReport) {
    if accum.received + accum.dropped != 0 && unit.received + unit.dropped != 0 {
        accum.received += unit.received;
        accum.dropped += unit.dropped;
        accum.consecutive_drops += unit.consecutive_drops;
        accum.gap_total += unit.gap_total;
        accum.gap_count += unit.gap_count;
        accum.gap_min = accum.gap_min.min(unit.gap_min);
        accum.gap_max = accum.gap_max.max(unit.gap_max);
    } else if unit.received + unit.dropped != 0 {
        // First non-empty unit seeds the accumulator wholesale, so the
        // gap extremes start from real values.
        *accum = *unit;
    }
}

/// Accumulate consecutive epochs of one stream
pub(crate) fn accumulate_time(accum: &mut LossReport, unit: &LossReport) {
    accumulate(accum, unit);
    accum.flow_state = accum.flow_state.concatenate(unit.flow_state);
}

/// Accumulate a stream into its flow; degenerate streams are counted, not
/// merged
pub(crate) fn accumulate_flows(accum: &mut LossReport, unit: &LossReport) {
    if unit.flow_state.is_error() {
        accum.bad_flows += 1;
    } else {
        accumulate(accum, unit);
    }
}
