//! Per-frame metadata table.
//!
//! One record per physical frame, `blocks[0..=max_pfn]`. Only the frame
//! at a block's head PFN is authoritative; non-head frames mirror
//! `order`/`zone`/`is_free` for O(1) lookup but carry `is_head = false`.

use crate::pfn::Pfn;
use bitfield_struct::bitfield;
use kernel_sync::SpinLock;

/// The packed portion of a frame's metadata: 64 bits, one word per frame.
#[bitfield(u64)]
pub struct FrameMetadataBits {
    /// This frame is the head of its buddy block.
    pub is_head: bool,
    /// The block headed here is on a free list.
    pub is_free: bool,
    /// Reserved for future use (large/huge/slab page variants).
    #[bits(6, default = 0)]
    pub flags: u8,
    /// Buddy order of the block headed here, `0..MAX_ORDER`.
    #[bits(5)]
    pub order: u8,
    /// Owning zone identifier.
    #[bits(3)]
    pub zone: u8,
    /// Forward-looking VM mapping count; not read by the allocator.
    pub map_count: u16,
    /// Logical reference count; allocator sets to 1 on allocation,
    /// decrements on free, releases only at 0.
    pub ref_count: u32,
}

/// One frame's full record: the packed bitfield plus the index-based
/// free-list links this crate uses instead of embedded free-list nodes.
/// Keeping linkage in the metadata table rather than in the freed page's
/// own bytes avoids aliasing between list state and whatever a buggy
/// caller reads back from memory it no longer owns.
#[derive(Clone, Copy)]
pub struct FrameRecord {
    pub bits: FrameMetadataBits,
    /// Previous node in this frame's `(zone, order)` free list, if any.
    pub free_prev: Option<Pfn>,
    /// Next node in this frame's `(zone, order)` free list, if any.
    pub free_next: Option<Pfn>,
}

impl FrameRecord {
    const fn zeroed() -> Self {
        Self {
            bits: FrameMetadataBits::new(),
            free_prev: None,
            free_next: None,
        }
    }
}

impl Default for FrameRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Table contents, guarded by the table's own lock.
pub struct FrameMetadataInner {
    records: &'static mut [FrameRecord],
}

impl FrameMetadataInner {
    #[inline]
    #[must_use]
    pub fn get(&self, pfn: Pfn) -> &FrameRecord {
        &self.records[pfn.as_u64() as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, pfn: Pfn) -> &mut FrameRecord {
        &mut self.records[pfn.as_u64() as usize]
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `blocks[0..=max_pfn]`, cache-line padded around its lock to avoid
/// false sharing with whatever the allocator places right after it.
#[repr(align(64))]
pub struct FrameMetadataTable {
    inner: SpinLock<FrameMetadataInner>,
}

impl FrameMetadataTable {
    /// # Safety
    /// `records` must point at `frame_count` zero-initialized,
    /// exclusively-owned `FrameRecord`s for the remaining lifetime of the
    /// table (in practice: a region carved out of the linear map during
    /// bring-up and never reused for anything else).
    #[must_use]
    pub unsafe fn from_raw_parts(records_ptr: *mut FrameRecord, frame_count: usize) -> Self {
        for i in 0..frame_count {
            unsafe { records_ptr.add(i).write(FrameRecord::zeroed()) };
        }
        let records = unsafe { core::slice::from_raw_parts_mut(records_ptr, frame_count) };
        Self {
            inner: SpinLock::new(FrameMetadataInner { records }),
        }
    }

    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut FrameMetadataInner) -> R) -> R {
        self.inner.with_lock(f)
    }
}

/// Bytes required for a table covering `frame_count` frames, including
/// the fixed header accounted for by the caller (allocation sizing
/// happens in [`crate::init`]).
#[inline]
#[must_use]
pub const fn table_bytes(frame_count: u64) -> u64 {
    frame_count * core::mem::size_of::<FrameRecord>() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_round_trips_all_fields() {
        let bits = FrameMetadataBits::new()
            .with_is_head(true)
            .with_is_free(true)
            .with_order(7)
            .with_zone(2)
            .with_map_count(1234)
            .with_ref_count(0xDEAD_BEEF);

        assert!(bits.is_head());
        assert!(bits.is_free());
        assert_eq!(bits.order(), 7);
        assert_eq!(bits.zone(), 2);
        assert_eq!(bits.map_count(), 1234);
        assert_eq!(bits.ref_count(), 0xDEAD_BEEF);
    }

    #[test]
    fn zeroed_record_has_no_links() {
        let rec = FrameRecord::zeroed();
        assert!(rec.free_prev.is_none());
        assert!(rec.free_next.is_none());
        assert!(!rec.bits.is_head());
    }
}
