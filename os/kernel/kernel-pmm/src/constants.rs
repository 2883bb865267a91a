//! Wire-level constants for the physical memory bring-up pipeline.

/// Size of a physical frame / page, in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Largest buddy order. Order `MAX_ORDER - 1` blocks are 4 MiB.
pub const MAX_ORDER: u8 = 11;

/// Base of the high-half linear map (LMAP). `LMAP_BASE + P` aliases
/// physical address `P` for any `P < LMAP_SIZE`.
pub const LMAP_BASE: u64 = 0xFFFF_8080_0000_0000;

/// Size of the linear map window.
pub const LMAP_SIZE: u64 = 8 * 1024 * 1024 * 1024 * 1024; // 8 TiB

/// Number of 1 GiB PDPT entries the linear map spans (`LMAP_SIZE / 1 GiB`).
pub const LMAP_GIB_PAGES: u64 = LMAP_SIZE / (1 << 30);

/// Number of top-level (PML4) entries the linear map spans.
pub const LMAP_PML4_ENTRIES: usize = 16;

/// Frontier between `ZoneId::Dma` and `ZoneId::Dma32`, in PFNs.
pub const ZONE_DMA_END_PFN: u64 = 4096; // 16 MiB / 4 KiB

/// Frontier between `ZoneId::Dma32` and `ZoneId::Normal`, in PFNs.
pub const ZONE_DMA32_END_PFN: u64 = 1_048_576; // 4 GiB / 4 KiB

/// Size, in bits, of the early bitmap's domain: the first 1 GiB.
pub const EARLY_BITMAP_DOMAIN_PAGES: u64 = (1 << 30) / PAGE_SIZE;

/// Size, in bytes, of the early bitmap (`EARLY_BITMAP_DOMAIN_PAGES / 8`).
pub const EARLY_BITMAP_BYTES: usize = (EARLY_BITMAP_DOMAIN_PAGES / 8) as usize;

/// Maximum number of scratch-page records the linear-map bootstrap ledger
/// can hold before bring-up is considered a failure.
pub const TEMP_RECORD_MAX: usize = 504;

/// Cache line size assumed for padding lock-guarded hot structures.
pub const CACHE_LINE_SIZE: usize = 64;

const _: () = {
    assert!(MAX_ORDER as u32 <= 63, "buddy order must fit a u64 block size");
    assert!(LMAP_BASE.is_multiple_of(1 << 30), "LMAP_BASE must be 1 GiB aligned");
    assert!(ZONE_DMA_END_PFN < ZONE_DMA32_END_PFN, "zone frontiers must be ascending");
    assert!(EARLY_BITMAP_BYTES as u64 * 8 == EARLY_BITMAP_DOMAIN_PAGES);
};
