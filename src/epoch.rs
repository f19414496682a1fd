//! Epoch maps, tagged keys and allocation pools
//!
//! Each aggregation epoch owns one hash map keyed by tagged stream identity.
//! The tag participates in hashing, so stream-level and flow-level entries
//! coexist in one map without colliding. Emptied maps and emptied range
//! vectors are not freed but recycled through per-stage pools, cycling
//! aggregator to shared to reporter and back under the pipeline mutex.

use crate::stats::loss::LossArrivals;
use crate::stats::packet::PacketStats;
use crate::stats::reorder::ReorderArrivals;
use crate::{StreamTuple, KEY_SIZE};
use std::collections::HashMap;

/// Whether a key names a single stream or a whole flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum KeyKind {
    Stream,
    Flow,
}

/// Tagged map key: the kind tag is part of the hashed identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MapKey {
    kind: KeyKind,
    flow_key: [u8; KEY_SIZE],
    stream_id: u8,
}

impl MapKey {
    pub fn stream(tuple: &StreamTuple) -> Self {
        MapKey {
            kind: KeyKind::Stream,
            flow_key: tuple.flow_key,
            stream_id: tuple.stream_id,
        }
    }

    /// The flow key shared by every stream of this key's flow; stream ids
    /// all map to zero.
    pub fn to_flow(&self) -> Self {
        MapKey {
            kind: KeyKind::Flow,
            flow_key: self.flow_key,
            stream_id: 0,
        }
    }

    pub fn is_stream(&self) -> bool {
        self.kind == KeyKind::Stream
    }

    pub fn is_flow(&self) -> bool {
        self.kind == KeyKind::Flow
    }

    pub fn flow_key(&self) -> [u8; KEY_SIZE] {
        self.flow_key
    }
}

/// Everything the aggregator accumulates for one stream in one epoch
#[derive(Debug, Default)]
pub(crate) struct AggregatorData {
    pub packets: PacketStats,
    pub loss: LossArrivals,
    pub reorder: ReorderArrivals,
}

/// One epoch's worth of per-stream aggregator data
pub(crate) type EpochMap = HashMap<MapKey, AggregatorData>;

/// Recycled allocations, partitioned per pipeline stage
#[derive(Debug, Default)]
pub(crate) struct Pools {
    maps: Vec<EpochMap>,
    loss_ranges: Vec<Vec<crate::seqno::SeqnoRange>>,
    reorder_ranges: Vec<Vec<crate::seqno::SeqnoRange>>,
}

impl Pools {
    /// Take a recycled map, or allocate a fresh one
    pub fn take_map(&mut self) -> EpochMap {
        self.maps.pop().unwrap_or_default()
    }

    /// Move everything from `other` into this pool
    pub fn absorb(&mut self, other: &mut Pools) {
        self.maps.append(&mut other.maps);
        self.loss_ranges.append(&mut other.loss_ranges);
        self.reorder_ranges.append(&mut other.reorder_ranges);
    }

    fn take_loss_ranges(&mut self) -> Vec<crate::seqno::SeqnoRange> {
        self.loss_ranges.pop().unwrap_or_default()
    }

    fn take_reorder_ranges(&mut self) -> Vec<crate::seqno::SeqnoRange> {
        self.reorder_ranges.pop().unwrap_or_default()
    }
}

/// Look up the entry for `key`, creating it from pooled allocations on first
/// arrival
pub(crate) fn force_entry<'a>(
    map: &'a mut EpochMap,
    key: MapKey,
    pools: &mut Pools,
) -> &'a mut AggregatorData {
    map.entry(key).or_insert_with(|| AggregatorData {
        packets: PacketStats::default(),
        loss: LossArrivals {
            ranges: pools.take_loss_ranges(),
            flow_state: Default::default(),
        },
        reorder: ReorderArrivals {
            ranges: pools.take_reorder_ranges(),
        },
    })
}

/// Return a spent epoch's allocations to the pools
pub(crate) fn recycle_map(mut map: EpochMap, pools: &mut Pools) {
    for (_, mut data) in map.drain() {
        data.loss.ranges.clear();
        pools.loss_ranges.push(data.loss.ranges);
        data.reorder.ranges.clear();
        pools.reorder_ranges.push(data.reorder.ranges);
    }
    pools.maps.push(map);
}
