//! The buddy allocator itself.
//!
//! Order-based alloc/free with split, coalesce, and metadata
//! maintenance. Free lists are address-ordered and doubly-linked via
//! `free_prev`/`free_next` in the frame metadata table (index-based
//! linking) rather than nodes embedded in the freed page itself, which
//! would alias with whatever a buggy caller reads back after freeing it.
//!
//! Lock order, enforced structurally by nesting `with_lock` calls:
//! frame-metadata table outermost, a single zone lock inner. Never two
//! zone locks at once; never the metadata lock while holding a zone lock
//! without it already being the outer one.

use crate::constants::MAX_ORDER;
use crate::frame_metadata::{FrameMetadataInner, FrameMetadataTable};
use crate::pfn::Pfn;
use crate::zone::{Zone, ZoneId, ZoneInner};

/// The buddy allocator: a frame metadata table plus one zone per
/// [`ZoneId`] variant.
pub struct BuddyAllocator {
    metadata: FrameMetadataTable,
    zones: [Zone; 3],
}

impl BuddyAllocator {
    #[must_use]
    pub const fn new(metadata: FrameMetadataTable, zones: [Zone; 3]) -> Self {
        Self { metadata, zones }
    }

    fn zone(&self, id: ZoneId) -> &Zone {
        &self.zones[id.as_u8() as usize]
    }

    /// Seeds free lists from maximal free runs: within each run,
    /// repeatedly carve the largest aligned power-of-two block from the
    /// left edge.
    pub fn seed_free_lists(
        &self,
        zone_id: ZoneId,
        free_runs: impl Iterator<Item = (u64, u64)>,
    ) {
        let zone = self.zone(zone_id);
        for (run_start, run_len) in free_runs {
            let mut pfn = run_start;
            let mut remaining = run_len;
            while remaining > 0 {
                let mut order = (MAX_ORDER - 1) as u32;
                loop {
                    let block = 1u64 << order;
                    if block <= remaining && pfn.is_multiple_of(block) {
                        break;
                    }
                    if order == 0 {
                        break;
                    }
                    order -= 1;
                }
                let order = order as u8;
                let block = 1u64 << order;

                self.metadata.with_lock(|meta| {
                    zone.with_lock(|zi| {
                        Self::write_block_metadata(meta, Pfn::new(pfn), order, zone_id, true, 0);
                        Self::list_insert(meta, zi, zone_id, order, Pfn::new(pfn));
                    });
                });

                pfn += block;
                remaining -= block;
            }
        }
    }

    /// Marks each frame in `[pfn, pfn+count)` as its own allocated,
    /// order-0 block — used once during bring-up to reserve frames that
    /// the global bitmap marked used but that never go through
    /// `seed_free_lists` (bitmap/metadata-table/linear-map scratch).
    pub fn mark_reserved(&self, zone_id: ZoneId, pfn: Pfn, count: u64) {
        self.metadata.with_lock(|meta| {
            for i in 0..count {
                let p = pfn + i;
                let rec = meta.get_mut(p);
                rec.bits = rec
                    .bits
                    .with_is_head(true)
                    .with_is_free(false)
                    .with_order(0)
                    .with_zone(zone_id.as_u8());
            }
        });
    }

    fn write_block_metadata(
        meta: &mut FrameMetadataInner,
        head: Pfn,
        order: u8,
        zone_id: ZoneId,
        is_free: bool,
        ref_count: u32,
    ) {
        let count = 1u64 << order;
        for i in 0..count {
            let p = head + i;
            let rec = meta.get_mut(p);
            rec.bits = rec
                .bits
                .with_is_head(i == 0)
                .with_is_free(is_free)
                .with_order(order)
                .with_zone(zone_id.as_u8())
                .with_ref_count(if i == 0 { ref_count } else { 0 });
        }
    }

    fn list_insert(meta: &mut FrameMetadataInner, zi: &mut ZoneInner, _zone_id: ZoneId, order: u8, pfn: Pfn) {
        let head = zi.free_areas[order as usize];
        let mut prev: Option<Pfn> = None;
        let mut cursor = head;
        while let Some(c) = cursor {
            if c > pfn {
                break;
            }
            prev = Some(c);
            cursor = meta.get(c).free_next;
        }

        meta.get_mut(pfn).free_prev = prev;
        meta.get_mut(pfn).free_next = cursor;
        if let Some(c) = cursor {
            meta.get_mut(c).free_prev = Some(pfn);
        }
        match prev {
            Some(p) => meta.get_mut(p).free_next = Some(pfn),
            None => zi.free_areas[order as usize] = Some(pfn),
        }
    }

    fn list_remove(meta: &mut FrameMetadataInner, zi: &mut ZoneInner, order: u8, pfn: Pfn) {
        let prev = meta.get(pfn).free_prev;
        let next = meta.get(pfn).free_next;

        match prev {
            Some(p) => meta.get_mut(p).free_next = next,
            None => zi.free_areas[order as usize] = next,
        }
        if let Some(n) = next {
            meta.get_mut(n).free_prev = prev;
        }
        meta.get_mut(pfn).free_prev = None;
        meta.get_mut(pfn).free_next = None;
    }

    /// `alloc(order, zone) -> Option<Pfn>`.
    ///
    /// Does not fall back across zones; that policy belongs to
    /// [`crate::heap`] and only ever moves downward (`Normal -> Dma32 ->
    /// Dma`). This API has no cross-zone entry point at all, so upward
    /// fallback is not merely discouraged but unrepresentable.
    pub fn alloc_pages(&self, order: u8, zone_id: ZoneId) -> Option<Pfn> {
        if order >= MAX_ORDER {
            return None;
        }
        let zone = self.zone(zone_id);

        self.metadata.with_lock(|meta| {
            zone.with_lock(|zi| {
                let mut found: Option<(u8, Pfn)> = None;
                for current_order in order..MAX_ORDER {
                    if let Some(head) = zi.free_areas[current_order as usize] {
                        let rec = meta.get(head);
                        if rec.bits.is_free()
                            && rec.bits.order() == current_order
                            && rec.bits.zone() == zone_id.as_u8()
                        {
                            found = Some((current_order, head));
                            break;
                        }
                    }
                }

                let (mut current_order, pfn) = found?;
                Self::list_remove(meta, zi, current_order, pfn);

                // The left half always keeps `pfn`; only the buddy (right
                // half) goes back onto the free list at each step, since
                // we keep descending into the left half.
                while current_order > order {
                    let lower = current_order - 1;
                    let buddy = pfn.buddy(lower);
                    Self::write_block_metadata(meta, pfn, lower, zone_id, true, 0);
                    Self::write_block_metadata(meta, buddy, lower, zone_id, true, 0);
                    Self::list_insert(meta, zi, zone_id, lower, buddy);
                    current_order = lower;
                }

                Self::write_block_metadata(meta, pfn, order, zone_id, false, 1);
                Some(pfn)
            })
        })
    }

    /// `free(pfn)`. Silent no-op on misuse: interior
    /// frames and already-free blocks are ignored, never corrected.
    pub fn free_pages(&self, pfn: Pfn) {
        let zone_id = match self.zone_of(pfn) {
            Some(z) => z,
            None => {
                log::trace!("[buddy] free({pfn}): PFN not in any zone, ignoring");
                return;
            }
        };
        let zone = self.zone(zone_id);

        self.metadata.with_lock(|meta| {
            zone.with_lock(|zi| {
                let rec = meta.get(pfn);
                if !rec.bits.is_head() || rec.bits.is_free() {
                    log::trace!("[buddy] free({pfn}): not an allocated head, ignoring");
                    return;
                }

                let mut order = rec.bits.order();
                let count = 1u64 << order;
                let mut still_referenced = false;
                for i in 0..count {
                    let p = pfn + i;
                    let r = meta.get_mut(p);
                    let new_count = r.bits.ref_count().saturating_sub(1);
                    r.bits = r.bits.with_ref_count(new_count);
                    if i == 0 && new_count > 0 {
                        still_referenced = true;
                    }
                }
                if still_referenced {
                    return;
                }

                Self::write_block_metadata(meta, pfn, order, zone_id, true, 0);
                Self::list_insert(meta, zi, zone_id, order, pfn);
                let mut pfn = pfn;

                while order < MAX_ORDER - 1 {
                    let is_left = pfn.is_left_buddy(order);
                    let buddy = pfn.buddy(order);

                    let mergeable = if is_left {
                        meta.get(pfn).free_next == Some(buddy)
                    } else {
                        meta.get(pfn).free_prev == Some(buddy)
                    };
                    if !mergeable {
                        break;
                    }
                    let buddy_rec = meta.get(buddy);
                    if !(buddy_rec.bits.is_free()
                        && buddy_rec.bits.order() == order
                        && buddy_rec.bits.zone() == zone_id.as_u8())
                    {
                        break;
                    }

                    Self::list_remove(meta, zi, order, pfn);
                    Self::list_remove(meta, zi, order, buddy);
                    let merged = pfn.min(buddy);
                    let next_order = order + 1;
                    Self::write_block_metadata(meta, merged, next_order, zone_id, true, 0);
                    Self::list_insert(meta, zi, zone_id, next_order, merged);

                    pfn = merged;
                    order = next_order;
                }
            });
        });
    }

    fn zone_of(&self, pfn: Pfn) -> Option<ZoneId> {
        self.zones.iter().find(|z| z.contains(pfn)).map(|z| z.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_metadata::FrameRecord;

    /// Builds a single-zone (DMA) allocator over `frame_count` frames,
    /// all free, as one maximal run — a 64 MiB fixture (`max_pfn =
    /// 16383`) when called with `16384`.
    fn fixture(frame_count: u64) -> BuddyAllocator {
        let records: &'static mut [FrameRecord] =
            Box::leak(vec![FrameRecord::default(); frame_count as usize].into_boxed_slice());
        let table = unsafe {
            FrameMetadataTable::from_raw_parts(records.as_mut_ptr(), frame_count as usize)
        };

        let dma = Zone::new(ZoneId::Dma, Pfn::new(0), Pfn::new(frame_count));
        let dma32 = Zone::new(ZoneId::Dma32, Pfn::new(frame_count), Pfn::new(frame_count));
        let normal = Zone::new(ZoneId::Normal, Pfn::new(frame_count), Pfn::new(frame_count));

        let alloc = BuddyAllocator::new(table, [dma, dma32, normal]);
        alloc.seed_free_lists(ZoneId::Dma, core::iter::once((0, frame_count)));
        alloc
    }

    #[test]
    fn alloc_then_free_restores_metadata() {
        let alloc = fixture(16384);
        let pfn = alloc.alloc_pages(3, ZoneId::Dma).expect("alloc order 3");
        assert!(pfn.is_aligned(3));
        alloc.free_pages(pfn);

        let again = alloc.alloc_pages(MAX_ORDER - 1, ZoneId::Dma);
        assert!(again.is_some(), "region should have fully recoalesced");
    }

    #[test]
    fn scenario_four_buddies_coalesce_out_of_order() {
        // A 4-frame zone so the carved-up region has nowhere else to
        // hide: full recoalescence means exactly one order-2 block and
        // nothing left at any other order.
        let alloc = fixture(4);
        let p0 = alloc.alloc_pages(0, ZoneId::Dma).unwrap();
        let p1 = alloc.alloc_pages(0, ZoneId::Dma).unwrap();
        let p2 = alloc.alloc_pages(0, ZoneId::Dma).unwrap();
        let p3 = alloc.alloc_pages(0, ZoneId::Dma).unwrap();

        assert_eq!(p1, p0 + 1);
        assert_eq!(p2, p0 + 2);
        assert_eq!(p3, p0 + 3);

        alloc.free_pages(p1);
        alloc.free_pages(p3);
        alloc.free_pages(p0);
        alloc.free_pages(p2);

        let merged = alloc.alloc_pages(2, ZoneId::Dma);
        assert_eq!(merged, Some(p0));
        assert!(
            alloc.alloc_pages(0, ZoneId::Dma).is_none(),
            "zone should be fully exhausted after consuming the recoalesced block"
        );
    }

    #[test]
    fn exhaust_then_free_all_restores_top_order_block() {
        let alloc = fixture(16384);
        let mut allocated = Vec::new();
        while let Some(pfn) = alloc.alloc_pages(0, ZoneId::Dma) {
            allocated.push(pfn);
        }
        assert_eq!(allocated.len(), 16384, "a 16384-frame zone must yield exactly that many order-0 pages");

        for &pfn in allocated.iter().rev() {
            alloc.free_pages(pfn);
        }

        // Fully coalesced back to order MAX_ORDER-1 blocks (the cap);
        // all 16 of the original top-order blocks must be available.
        for _ in 0..16 {
            assert!(alloc.alloc_pages(MAX_ORDER - 1, ZoneId::Dma).is_some());
        }
        assert!(alloc.alloc_pages(MAX_ORDER - 1, ZoneId::Dma).is_none());
    }

    #[test]
    fn free_lists_stay_address_sorted() {
        let alloc = fixture(4096);
        let zone = alloc.zone(ZoneId::Dma);

        // Fragment order 0 by allocating and freeing out of address order.
        let pages: Vec<Pfn> = (0..4)
            .map(|_| alloc.alloc_pages(0, ZoneId::Dma).unwrap())
            .collect();
        for &pfn in [pages[2], pages[0], pages[3], pages[1]].iter() {
            alloc.free_pages(pfn);
        }

        alloc.metadata.with_lock(|meta| {
            zone.with_lock(|zi| {
                // Everything should have recoalesced, so there must be no
                // leftover order-0 entries to walk out of order.
                let mut cursor = zi.free_areas[0];
                let mut last: Option<Pfn> = None;
                while let Some(pfn) = cursor {
                    if let Some(l) = last {
                        assert!(l < pfn, "free list must be strictly ascending");
                    }
                    last = Some(pfn);
                    cursor = meta.get(pfn).free_next;
                }
            });
        });
    }

    #[test]
    fn double_free_is_a_silent_no_op() {
        let alloc = fixture(16384);
        let p = alloc.alloc_pages(0, ZoneId::Dma).unwrap();
        alloc.free_pages(p);
        alloc.free_pages(p); // must not panic or corrupt state

        let reused = alloc.alloc_pages(0, ZoneId::Dma);
        assert!(reused.is_some());
    }

    /// Tiny xorshift PRNG so this doesn't need to pull in a `rand` dependency
    /// just for one stress test.
    struct XorShift(u64);

    impl XorShift {
        fn next_order_below(&mut self, bound: u8) -> u8 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 % u64::from(bound)) as u8
        }
    }

    #[test]
    fn concurrent_workers_leave_allocator_fully_coalesced() {
        use std::sync::Arc;
        use std::thread;

        const WORKERS: u64 = 8;
        const ITERS: u64 = 10_000;

        let alloc = Arc::new(fixture(16384));

        let handles: Vec<_> = (0..WORKERS)
            .map(|worker_id| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15 ^ (worker_id + 1));
                    for _ in 0..ITERS {
                        let order = rng.next_order_below(4);
                        if let Some(pfn) = alloc.alloc_pages(order, ZoneId::Dma) {
                            assert!(pfn.is_aligned(order));
                            alloc.free_pages(pfn);
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        // Every alloc in this test is paired with an immediate free, so the
        // zone must be back to its pristine, fully-coalesced starting state:
        // exactly one order-(MAX_ORDER-1) block for every 2^(MAX_ORDER-1)
        // frames in the fixture.
        let top_order = MAX_ORDER - 1;
        let expected_top_blocks = 16384 / (1u64 << top_order);
        for _ in 0..expected_top_blocks {
            assert!(
                alloc.alloc_pages(top_order, ZoneId::Dma).is_some(),
                "allocator did not fully recoalesce after concurrent alloc/free churn"
            );
        }
        assert!(alloc.alloc_pages(top_order, ZoneId::Dma).is_none());
    }
}
