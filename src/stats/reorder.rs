//! Packet-reordering estimation: Reorder Extent and Reorder Density
//!
//! Both metrics share the aggregator-side arrival recording (ranges in
//! arrival order) and run their own persistent per-stream state machine on
//! the reporter side.
//!
//! Extent follows RFC 4737: a table of missing-packet records keyed by
//! sequence number; a late arrival resolves its record and the extent is
//! the number of arrivals since the packet went missing, capped at
//! `MAX_EXTENT`. Records too far behind the next expected sequence number
//! are pruned; pruned, never-observed records count as assumed drops.
//!
//! Density follows RFC 5236: a bounded window of arrivals is replayed
//! against a receive index, tallying the signed displacement of each packet
//! into a `2 * DT + 1` bin histogram. Displacements beyond the threshold
//! are silently dropped.

use crate::config::Measures;
use crate::seqno::{self, modular_distance, seqcmp, Seqno, SeqnoRange};
use crate::{DT, MAX_EXTENT, MAX_HISTORY, WINDOW_SIZE};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Aggregator-side per-stream per-epoch reorder data: ranges in arrival
/// order, which the state machines replay
#[derive(Debug, Default)]
pub(crate) struct ReorderArrivals {
    pub ranges: Vec<SeqnoRange>,
}

/// Reporter-side reorder histograms for one stream or flow
#[derive(Debug, Clone)]
pub(crate) struct ReorderReport {
    /// Extent histogram; in-order packets land in bin 0
    pub extent_hist: [u32; MAX_EXTENT + 1],
    /// Missing packets assumed dropped because their extent would exceed
    /// the maximum
    pub extent_assumed_drops: u32,
    /// Frequency of displacement, indexed by `distance + DT`
    pub fd: [u32; WINDOW_SIZE],
    /// Reserved; the density algorithm does not currently tally assumed
    /// drops
    pub density_assumed_drops: u32,
}

impl Default for ReorderReport {
    fn default() -> Self {
        ReorderReport {
            extent_hist: [0; MAX_EXTENT + 1],
            extent_assumed_drops: 0,
            fd: [0; WINDOW_SIZE],
            density_assumed_drops: 0,
        }
    }
}

#[derive(Debug)]
struct MissingPacket {
    observed: bool,
    /// Arrival index the packet would have occupied had it been on time
    ref_index: u64,
}

/// Reorder-density state machine
#[derive(Debug, Default)]
struct DensityState {
    /// True between processing steps, while the machine waits to admit a
    /// new arrival into the window
    awaiting_arrival: bool,
    /// Receive index: the next original position to account
    ri: Seqno,
    window: VecDeque<Seqno>,
    buffer: BTreeSet<Seqno>,
    window_initialized: bool,
}

/// Persistent per-stream reorder state, owned by the reporter
#[derive(Debug, Default)]
pub(crate) struct ReorderState {
    initialized: bool,

    /// Arrivals seen on this stream, duplicate-corrected
    num_arrivals: u64,
    /// Next expected sequence number
    next_exp: Seqno,
    /// Missing-packet records, ordered by sequence number
    missing: BTreeMap<Seqno, MissingPacket>,

    density: DensityState,
}

/// Record one arrival into the epoch's reorder view
pub(crate) fn reorder_arrival(rda: &mut ReorderArrivals, seq: Seqno) {
    seqno::record_arrival(&mut rda.ranges, seq);
}

/// Replay one epoch's arrivals through the enabled state machines
pub(crate) fn reorder_a2r(
    dr: &mut ReorderReport,
    da: &ReorderArrivals,
    state: &mut ReorderState,
    measures: Measures,
) {
    for r in &da.ranges {
        let range_size = r.high.wrapping_sub(r.low).wrapping_add(1);

        if !state.initialized {
            if measures.extent {
                state.next_exp = r.low;
            }
            state.initialized = true;
        }

        if measures.density {
            let mut i = r.low;
            loop {
                density_step(&mut state.density, dr, i);
                if i == r.high {
                    break;
                }
                i = i.wrapping_add(1);
            }
        }

        if measures.extent {
            extent_range(state, dr, r, range_size);
        }
    }

    if measures.extent {
        prune_missing(state, dr);
    }
}

fn extent_range(state: &mut ReorderState, dr: &mut ReorderReport, r: &SeqnoRange, range_size: u32) {
    // Case 1: the range is in order, with or without a discontinuity.
    // Jump the counters ahead; a discontinuity becomes missing records.
    if seqcmp(r.low, state.next_exp) != Ordering::Less {
        if seqcmp(r.low, state.next_exp) == Ordering::Greater {
            let ref_index = state.num_arrivals + 1;
            let mut i = state.next_exp;
            while i != r.low {
                state.missing.insert(i, MissingPacket { observed: false, ref_index });
                i = i.wrapping_add(1);
            }
        }
        state.next_exp = r.high.wrapping_add(1);
        state.num_arrivals += u64::from(range_size);
        dr.extent_hist[0] += range_size;
        return;
    }

    // Case 2: the range starts reordered. Account packet by packet.
    let mut i = r.low;
    loop {
        state.num_arrivals += 1;
        if seqcmp(i, state.next_exp) != Ordering::Less {
            state.next_exp = i.wrapping_add(1);
            dr.extent_hist[0] += 1;
        } else {
            resolve_missing(dr, state, i);
        }
        if i == r.high {
            break;
        }
        i = i.wrapping_add(1);
    }
}

/// Expects `num_arrivals` already incremented for this packet; decrements
/// it back upon detecting a duplicate.
fn resolve_missing(dr: &mut ReorderReport, state: &mut ReorderState, seq: Seqno) {
    let Some(mp) = state.missing.get_mut(&seq) else {
        // Late packet with no missing record: stale duplicate, ignore.
        return;
    };

    if !mp.observed {
        let extent = (state.num_arrivals - mp.ref_index).min(MAX_EXTENT as u64) as usize;
        mp.observed = true;
        dr.extent_hist[extent] += 1;
    } else {
        state.num_arrivals -= 1;
    }
}

fn prune_missing(state: &mut ReorderState, dr: &mut ReorderReport) {
    let next_exp = state.next_exp;
    state.missing.retain(|&seq, mp| {
        let stale = seqcmp(seq, next_exp) == Ordering::Less
            && modular_distance(seq, next_exp) > MAX_HISTORY as u32;
        if stale && !mp.observed {
            dr.extent_assumed_drops += 1;
        }
        !stale
    });
}

fn density_step(st: &mut DensityState, dr: &mut ReorderReport, seq: Seqno) {
    // Bootstrap: admit distinct values until the window holds DT + 1.
    if !st.window_initialized {
        if !st.window.contains(&seq) {
            st.window.push_back(seq);
        }
        if st.window.len() == DT + 1 {
            st.ri = 0;
            st.window_initialized = true;
        } else {
            return;
        }
    }

    let mut handled_this = false;
    if st.awaiting_arrival {
        maybe_admit(st, seq);
        handled_this = true;
    }
    if !st.awaiting_arrival {
        process_window_item(st, dr);
    }
    if st.awaiting_arrival && !handled_this {
        maybe_admit(st, seq);
    }
}

fn maybe_admit(st: &mut DensityState, seq: Seqno) {
    if seq >= st.ri && !st.window.contains(&seq) && !st.buffer.contains(&seq) {
        st.window.push_back(seq);
        st.awaiting_arrival = false;
    }
}

fn process_window_item(st: &mut DensityState, dr: &mut ReorderReport) {
    if st.window.contains(&st.ri) || st.buffer.contains(&st.ri) {
        let Some(head) = st.window.pop_front() else {
            st.awaiting_arrival = true;
            return;
        };
        let d = st.ri.wrapping_sub(head) as i32;
        if d.unsigned_abs() <= DT as u32 {
            dr.fd[(d + DT as i32) as usize] += 1;
            st.buffer.remove(&st.ri);
            if d < 0 {
                st.buffer.insert(head);
            }
            st.ri = st.ri.wrapping_add(1);
        }
        // Beyond the threshold: the packet falls outside the density
        // window and is not tallied.
        st.awaiting_arrival = true;
    } else {
        // RI itself may have been dropped; skip to the next position that
        // can still be accounted.
        let window_min = st.window.iter().copied().min().unwrap_or(Seqno::MAX);
        let buffer_min = st.buffer.iter().next().copied().unwrap_or(Seqno::MAX);
        let m = window_min.min(buffer_min);
        if st.ri < m {
            st.ri = m;
        } else {
            st.ri = st.ri.wrapping_add(1);
        }
        st.awaiting_arrival = false;
    }
}

fn accumulate(accum: &mut ReorderReport, unit: &ReorderReport, measures: Measures) {
    if measures.extent {
        for i in 0..MAX_EXTENT {
            accum.extent_hist[i] += unit.extent_hist[i];
        }
        accum.extent_assumed_drops += unit.extent_assumed_drops;
    }
    if measures.density {
        for i in 0..WINDOW_SIZE {
            accum.fd[i] += unit.fd[i];
        }
        accum.density_assumed_drops += unit.density_assumed_drops;
    }
}

pub(crate) fn accumulate_time(accum: &mut ReorderReport, unit: &ReorderReport, measures: Measures) {
    accumulate(accum, unit, measures);
}

pub(crate) fn accumulate_flows(accum: &mut ReorderReport, unit: &ReorderReport, measures: Measures) {
    accumulate(accum, unit, measures);
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: Measures = Measures { loss: false, extent: true, density: true };
    const EXTENT_ONLY: Measures = Measures { loss: false, extent: true, density: false };
    const DENSITY_ONLY: Measures = Measures { loss: false, extent: false, density: true };

    fn arrivals(seqs: &[Seqno]) -> ReorderArrivals {
        let mut rda = ReorderArrivals::default();
        for &seq in seqs {
            reorder_arrival(&mut rda, seq);
        }
        rda
    }

    fn run(seqs: &[Seqno], state: &mut ReorderState, measures: Measures) -> ReorderReport {
        let mut dr = ReorderReport::default();
        reorder_a2r(&mut dr, &arrivals(seqs), state, measures);
        dr
    }

    #[test]
    fn test_arrival_appends_in_order() {
        let rda = arrivals(&[5, 6, 2, 3]);
        assert_eq!(
            rda.ranges,
            vec![SeqnoRange { low: 5, high: 6 }, SeqnoRange { low: 2, high: 3 }]
        );
    }

    #[test]
    fn test_extent_in_order_stream() {
        let mut state = ReorderState::default();
        let dr = run(&[0, 1, 2, 3, 4], &mut state, EXTENT_ONLY);
        assert_eq!(dr.extent_hist[0], 5);
        assert!(dr.extent_hist[1..].iter().all(|&c| c == 0));
    }

    #[test]
    fn test_extent_mixed_stream() {
        // In-order: 0,1,2,4,5,7,9,10. Extent 1: the late 6 and 8.
        // Extent 5: the late 3. The duplicate 5 is absorbed.
        let mut state = ReorderState::default();
        let dr = run(&[0, 1, 2, 4, 5, 7, 6, 5, 3, 9, 8, 10], &mut state, EXTENT_ONLY);

        assert_eq!(dr.extent_hist[0], 8);
        assert_eq!(dr.extent_hist[1], 2);
        assert_eq!(dr.extent_hist[5], 1);
        assert_eq!(dr.extent_hist.iter().sum::<u32>(), 11);
        assert_eq!(dr.extent_assumed_drops, 0);
    }

    #[test]
    fn test_extent_continuation_with_duplicates() {
        let mut state = ReorderState::default();
        let _ = run(&[0, 1, 2, 4, 5, 7, 6, 5, 3, 9, 8, 10], &mut state, EXTENT_ONLY);

        // Duplicates of 8 suppressed; 11 resolves with two later arrivals
        // (12 and 14) ahead of it; 9 is a stale duplicate; the jump to 30
        // records a contiguous missing run.
        let dr = run(&[7, 8, 8, 8, 10, 12, 14, 11, 9, 30], &mut state, EXTENT_ONLY);
        assert_eq!(dr.extent_hist[0], 3);
        assert_eq!(dr.extent_hist[2], 1);
        assert_eq!(dr.extent_hist[1], 0);
        assert_eq!(dr.extent_assumed_drops, 0);
        // Resolved records from both epochs plus 13 and the run 15..=29.
        assert_eq!(state.missing.len(), 20);
    }

    #[test]
    fn test_extent_in_order_across_wrap() {
        let mut state = ReorderState::default();
        let dr = run(&[u32::MAX - 1, u32::MAX, 0, 1], &mut state, EXTENT_ONLY);
        assert_eq!(dr.extent_hist[0], 4);
        assert_eq!(state.next_exp, 2);
    }

    #[test]
    fn test_extent_duplicate_does_not_inflate_histogram() {
        let mut state = ReorderState::default();
        // 1 goes missing at 2's arrival; its first late copy resolves it,
        // the second is suppressed.
        let dr = run(&[0, 2, 1, 1], &mut state, EXTENT_ONLY);
        assert_eq!(dr.extent_hist.iter().sum::<u32>(), 3);
        assert_eq!(state.num_arrivals, 3);
    }

    #[test]
    fn test_extent_prunes_stale_missing_records() {
        let mut state = ReorderState::default();
        let _ = run(&[0, 2], &mut state, EXTENT_ONLY);
        assert_eq!(state.missing.len(), 1);

        // Jump so that only the unresolved record for 1 crosses the
        // pruning horizon; it becomes an assumed drop.
        let far = MAX_HISTORY as u32 + 2;
        let dr = run(&[far], &mut state, EXTENT_ONLY);
        assert_eq!(dr.extent_assumed_drops, 1);
        assert!(!state.missing.contains_key(&1));
    }

    #[test]
    fn test_extent_caps_at_max() {
        let mut state = ReorderState::default();
        // 1 goes missing, then MAX_EXTENT + 10 packets arrive before it.
        let mut seqs: Vec<Seqno> = vec![0, 2];
        seqs.extend(3..3 + (MAX_EXTENT as u32) + 10);
        seqs.push(1);
        let dr = run(&seqs, &mut state, EXTENT_ONLY);
        assert_eq!(dr.extent_hist[MAX_EXTENT], 1);
    }

    #[test]
    fn test_density_in_order_stream() {
        let mut state = ReorderState::default();
        // Bootstrap completes after DT + 1 distinct arrivals; every
        // processed packet thereafter has displacement zero.
        let seqs: Vec<Seqno> = (0..=(DT as u32) + 6).collect();
        let dr = run(&seqs, &mut state, DENSITY_ONLY);

        assert_eq!(dr.fd[DT], 7);
        assert!(dr.fd.iter().enumerate().all(|(i, &c)| i == DT || c == 0));
    }

    #[test]
    fn test_density_late_arrival_shows_negative_distance() {
        let mut state = ReorderState::default();
        let mut seqs: Vec<Seqno> = (0..=8).collect();
        seqs.extend([10, 9]);
        seqs.extend(11..=18);
        let dr = run(&seqs, &mut state, DENSITY_ONLY);

        // 10 arrived one position early (D = -1), 9 one position late
        // (D = +1); everything else on time.
        assert_eq!(dr.fd[DT - 1], 1);
        assert_eq!(dr.fd[DT + 1], 1);
        assert!(dr.fd[DT] > 0);
        let total: u32 = dr.fd.iter().sum();
        assert!(total <= seqs.len() as u32);
    }

    #[test]
    fn test_density_survives_a_dropped_index() {
        let mut state = ReorderState::default();
        // Sequence 5 never arrives; the receive index skips over it once
        // the machine notices nothing can account it.
        let seqs: Vec<Seqno> = (0..=20).filter(|&s| s != 5).collect();
        let dr = run(&seqs, &mut state, DENSITY_ONLY);
        let total: u32 = dr.fd.iter().sum();
        assert!(total > 0);
        assert!(total <= seqs.len() as u32);
    }

    #[test]
    fn test_density_histogram_bounded_by_arrivals() {
        let mut state = ReorderState::default();
        let seqs: Vec<Seqno> = (0..100).collect();
        let dr = run(&seqs, &mut state, DENSITY_ONLY);
        assert!(dr.fd.iter().sum::<u32>() <= 100);
    }

    #[test]
    fn test_extent_and_density_share_arrival_replay() {
        let mut state = ReorderState::default();
        let seqs: Vec<Seqno> = (0..30).collect();
        let dr = run(&seqs, &mut state, BOTH);
        assert_eq!(dr.extent_hist[0], 30);
        assert!(dr.fd[DT] > 0);
    }

    #[test]
    fn test_accumulate_merges_histograms() {
        let mut a = ReorderReport::default();
        let mut b = ReorderReport::default();
        a.extent_hist[0] = 5;
        a.fd[DT] = 2;
        b.extent_hist[0] = 3;
        b.extent_hist[2] = 1;
        b.fd[DT] = 4;
        b.extent_assumed_drops = 2;

        accumulate_time(&mut a, &b, BOTH);
        assert_eq!(a.extent_hist[0], 8);
        assert_eq!(a.extent_hist[2], 1);
        assert_eq!(a.fd[DT], 6);
        assert_eq!(a.extent_assumed_drops, 2);
    }
}
