//! Fatal bring-up errors.
//!
//! These are the only errors this crate defines: failures where the
//! machine has insufficient memory to even represent its own memory.
//! Expected OOM and misuse are not modeled as errors at all (see
//! [`crate::buddy`] and [`crate::heap`]); they are ordinary
//! `Option<Pfn>` returns or silent no-ops instead.

/// Fatal failure during one of the bring-up stages.
///
/// A kernel binary converts this to a panic; the pipeline itself never
/// halts directly, so it stays host-testable.
#[derive(Debug, thiserror::Error)]
pub enum BringUpError {
    #[error("no {size_mib} MiB physically-contiguous scratch region found below 16 GiB")]
    NoScratchRegion { size_mib: u64 },

    #[error("linear-map scratch region exhausted after {allocated_pages} pages")]
    ScratchExhausted { allocated_pages: usize },

    #[error("linear-map bootstrap ledger is full ({capacity} entries)")]
    LedgerFull { capacity: usize },

    #[error("early bitmap allocator could not satisfy a {pages}-page bring-up allocation")]
    EarlyAllocFailed { pages: u64 },

    #[error("global bitmap allocation exhausted while allocating {pages} pages")]
    GlobalBitmapAllocFailed { pages: u64 },

    #[error("frame metadata table allocation exhausted ({frames} frames needed)")]
    FrameMetadataAllocFailed { frames: u64 },

    #[error("firmware memory map reports no free region; max_pfn is undefined")]
    NoFreeMemory,
}
