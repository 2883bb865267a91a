//! `memory_init()`: orchestrates the bring-up stages in order (linear
//! map, early bitmap, global bitmap, frame metadata table, zone layout,
//! free-list seeding), producing an owning handle rather than mutating
//! file-scope statics.

use crate::buddy::BuddyAllocator;
use crate::constants::{EARLY_BITMAP_BYTES, PAGE_SIZE, ZONE_DMA32_END_PFN, ZONE_DMA_END_PFN};
use crate::early_bitmap::EarlyBitmapAllocator;
use crate::error::BringUpError;
use crate::firmware::FirmwareMemoryMap;
use crate::frame_metadata::{FrameMetadataTable, FrameRecord, table_bytes};
use crate::global_bitmap::GlobalBitmap;
use crate::heap::{kheap_alloc, kheap_free};
use crate::linear_map::linear_map_setup;
use crate::pfn::Pfn;
use crate::zone::{Zone, ZoneId};

/// Owning handle to a fully initialized allocator, returned by
/// [`memory_init`]. A kernel parks this in a `kernel_sync::SyncOnceCell`
/// rather than reaching for a file-scope static.
pub struct PmmHandle {
    buddy: BuddyAllocator,
}

impl PmmHandle {
    #[must_use]
    pub fn alloc_pages(&self, order: u8, zone: ZoneId) -> Option<Pfn> {
        self.buddy.alloc_pages(order, zone)
    }

    pub fn free_pages(&self, pfn: Pfn) {
        self.buddy.free_pages(pfn);
    }

    #[must_use]
    pub fn kheap_alloc(&self, size: usize, zone: ZoneId) -> Option<Pfn> {
        kheap_alloc(&self.buddy, size, zone)
    }

    pub fn kheap_free(&self, pfn: Pfn) {
        kheap_free(&self.buddy, pfn);
    }
}

/// Runs the full bring-up pipeline: `linear_map_setup`, early bitmap
/// init, global bitmap build, frame metadata table allocation, zone
/// layout, and free-list seeding.
///
/// # Safety
/// Must run exactly once, single-threaded, very early in boot, at CPL0,
/// with `pml4_phys` naming the currently active PML4 and firmware's own
/// identity mapping of `[0, 16 GiB)` still active. `firmware_map` must
/// describe memory actually present and safe to write to for every
/// region it calls free.
pub unsafe fn memory_init(
    pml4_phys: u64,
    firmware_map: &FirmwareMemoryMap<'_>,
) -> Result<PmmHandle, BringUpError> {
    log::info!("[pmm] bringing up physical memory management");

    // Stage 1: linear map. Every scratch page it allocates is recorded
    // in the ledger so the early bitmap can mark it used.
    let setup = unsafe { linear_map_setup(pml4_phys, firmware_map) }?;
    log::info!(
        "[pmm] linear map established ({} scratch pages used)",
        setup.ledger.entries().len()
    );

    // Stage 2: early bitmap, covering [0, 1 GiB). Placed immediately
    // after the last ledger PFN, as its own first consumer.
    let early_bitmap_pages = (EARLY_BITMAP_BYTES as u64).div_ceil(PAGE_SIZE);
    let early_bitmap_base_pfn = setup
        .ledger
        .entries()
        .iter()
        .map(Pfn::as_u64)
        .max()
        .map_or(0, |p| p + 1);
    let early_bitmap_range = early_bitmap_base_pfn..(early_bitmap_base_pfn + early_bitmap_pages);

    // SAFETY: `early_bitmap_base_pfn` names frames immediately after the
    // linear-map scratch ledger, untouched by anything else at this
    // point in bring-up, and addressable through LMAP because
    // `linear_map_setup` just established it.
    let early_words = unsafe {
        EarlyBitmapAllocator::words_from_raw(
            Pfn::new(early_bitmap_base_pfn).to_lmap_va() as *mut u64
        )
    };
    let mut early_bitmap = EarlyBitmapAllocator::init(
        early_words,
        firmware_map,
        setup.ledger.entries(),
        early_bitmap_range.clone(),
    );
    log::info!("[pmm] early bitmap initialized over [0, 1 GiB)");

    // Stage 3: global bitmap over [0, max_pfn].
    let max_pfn = firmware_map.max_pfn().ok_or(BringUpError::NoFreeMemory)?;
    let frame_count = max_pfn + 1;
    let global_words_len = frame_count.div_ceil(64) as usize;
    let global_bytes = global_words_len as u64 * 8;
    let global_pages = global_bytes.div_ceil(PAGE_SIZE);
    let global_bitmap_va = early_bitmap
        .boot_alloc(global_pages)
        .ok_or(BringUpError::GlobalBitmapAllocFailed { pages: global_pages })?;

    // SAFETY: just allocated from the early bitmap, exclusively owned,
    // `global_words_len` `u64`s long, addressable through LMAP.
    let global_words: &'static mut [u64] =
        unsafe { core::slice::from_raw_parts_mut(global_bitmap_va as *mut u64, global_words_len) };
    let mut global_bitmap = unsafe {
        GlobalBitmap::build(global_words, frame_count, firmware_map, early_bitmap_range, |pfn| {
            early_bitmap.test_bit(pfn)
        })
    };
    log::info!("[pmm] global bitmap built for {frame_count} frames (max_pfn={max_pfn})");

    // Stage 4: frame metadata table, allocated via the global bitmap.
    let record_bytes = table_bytes(frame_count);
    let metadata_pages = record_bytes.div_ceil(PAGE_SIZE);
    let metadata_start_pfn = global_bitmap
        .alloc_pages(metadata_pages)
        .ok_or(BringUpError::FrameMetadataAllocFailed { frames: frame_count })?;
    let metadata_va = Pfn::new(metadata_start_pfn).to_lmap_va();

    // SAFETY: just allocated from the global bitmap, exclusively owned,
    // `frame_count` records long, never reused for anything else.
    let metadata = unsafe {
        FrameMetadataTable::from_raw_parts(metadata_va as *mut FrameRecord, frame_count as usize)
    };
    log::info!("[pmm] frame metadata table allocated ({metadata_pages} pages)");

    // Stage 5: zone layout.
    let dma_end = ZONE_DMA_END_PFN.min(frame_count);
    let dma32_end = ZONE_DMA32_END_PFN.min(frame_count);
    let dma = Zone::new(ZoneId::Dma, Pfn::new(0), Pfn::new(dma_end));
    let dma32 = Zone::new(ZoneId::Dma32, Pfn::new(dma_end), Pfn::new(dma32_end));
    let normal = Zone::new(ZoneId::Normal, Pfn::new(dma32_end), Pfn::new(frame_count));
    let buddy = BuddyAllocator::new(metadata, [dma, dma32, normal]);

    // Stage 6: free-list seeding, zone by zone, straight from the
    // global bitmap's occupancy.
    seed_zone(&buddy, &global_bitmap, ZoneId::Dma, 0, dma_end);
    seed_zone(&buddy, &global_bitmap, ZoneId::Dma32, dma_end, dma32_end);
    seed_zone(&buddy, &global_bitmap, ZoneId::Normal, dma32_end, frame_count);
    log::info!("[pmm] free lists seeded; bring-up complete");

    Ok(PmmHandle { buddy })
}

/// Seeds one zone's free lists from `bitmap`'s free runs within
/// `[start, end)`, then marks every allocated frame in the gaps between
/// those runs as its own reserved, order-0 block.
fn seed_zone(buddy: &BuddyAllocator, bitmap: &GlobalBitmap, zone_id: ZoneId, start: u64, end: u64) {
    if start >= end {
        return;
    }
    buddy.seed_free_lists(zone_id, bitmap.free_runs(start, end));

    let mut cursor = start;
    for (run_start, run_len) in bitmap.free_runs(start, end) {
        if run_start > cursor {
            buddy.mark_reserved(zone_id, Pfn::new(cursor), run_start - cursor);
        }
        cursor = run_start + run_len;
    }
    if cursor < end {
        buddy.mark_reserved(zone_id, Pfn::new(cursor), end - cursor);
    }
}
