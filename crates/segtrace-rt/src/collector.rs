//! Result collection after the dispatch completes.

use segtrace_core::HitRecord;
use segtrace_gpu::GpuBuffer;

use crate::error::Result;

/// Hits returned by one query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOutcome {
    /// Populated records, at most `capacity` of them, in device append order.
    pub hits: Vec<HitRecord>,
    /// Value of the device counter: every intersection found, including dropped ones.
    pub reported_count: u32,
    /// Records the results buffer could hold.
    pub capacity: u32,
}

impl QueryOutcome {
    /// Outcome of a query that needed no device work.
    pub fn empty(capacity: u32) -> Self {
        Self {
            hits: Vec::new(),
            reported_count: 0,
            capacity,
        }
    }

    /// Whether intersections were found beyond the results capacity.
    pub fn overflowed(&self) -> bool {
        self.reported_count > self.capacity
    }

    /// Number of intersections counted but not stored.
    pub fn dropped(&self) -> u32 {
        self.reported_count.saturating_sub(self.capacity)
    }

    /// Sort hits by `(query, base)`; append order is not deterministic.
    pub fn sort_by_pair(&mut self) {
        self.hits.sort_by_key(HitRecord::pair);
    }
}

/// Number of records that were actually written for a counter value.
#[inline]
pub fn readable_count(reported: u32, capacity: u32) -> u32 {
    reported.min(capacity)
}

/// Read the counter and the populated prefix of the results.
///
/// Both buffers must be host-visible readbacks of a completed dispatch.
pub fn collect(
    results_readback: &GpuBuffer,
    counter_readback: &GpuBuffer,
    capacity: u32,
) -> Result<QueryOutcome> {
    let reported_count = counter_readback
        .read::<u32>(1)?
        .first()
        .copied()
        .unwrap_or_default();

    let count = readable_count(reported_count, capacity);
    let hits = results_readback.read::<HitRecord>(count as usize)?;

    if reported_count > capacity {
        tracing::warn!(
            "Results overflowed: {} intersections, capacity {} ({} dropped)",
            reported_count,
            capacity,
            reported_count - capacity
        );
    } else {
        tracing::debug!("Collected {} hits", reported_count);
    }

    Ok(QueryOutcome {
        hits,
        reported_count,
        capacity,
    })
}
