//! # Physical Memory Management
//!
//! The physical-memory bring-up pipeline and buddy allocator for an
//! x86_64 kernel: a high-half linear map of all physical RAM, a
//! bootstrap bitmap allocator that serves the earliest boot-time
//! allocations, a whole-memory occupancy bitmap, and finally a zoned,
//! order-based buddy allocator with per-zone locking and per-frame
//! metadata.
//!
//! ## Pipeline
//!
//! ```text
//! firmware memory map
//!         |
//!         v
//! linear_map::linear_map_setup   -- LMAP covers [0, 8 TiB) via 1 GiB pages
//!         |
//!         v
//! early_bitmap::EarlyBitmapAllocator -- bump allocator over [0, 1 GiB)
//!         |
//!         v
//! global_bitmap::GlobalBitmap     -- occupancy oracle over [0, max_pfn]
//!         |
//!         v
//! frame_metadata::FrameMetadataTable + zone::Zone (DMA/DMA32/NORMAL)
//!         |
//!         v
//! buddy::BuddyAllocator            -- alloc_pages / free_pages
//! ```
//!
//! [`init::memory_init`] runs the whole pipeline once, single-threaded,
//! and returns an owning [`init::PmmHandle`]. After bring-up, only
//! [`buddy::BuddyAllocator`] and [`frame_metadata::FrameMetadataTable`]
//! remain in the hot path; the bitmaps are retired (the early bitmap) or
//! kept around only as an occupancy-inspection oracle (the global
//! bitmap).
//!
//! ## Concurrency
//!
//! All synchronization is via busy-wait spinlocks (see
//! [`kernel_sync::SpinLock`]). Lock order is fixed: the frame metadata
//! table's lock is always acquired before a zone's lock, and never more
//! than one zone's lock is held at a time. Bring-up itself runs
//! single-threaded before secondary cores start and needs no locking.
//!
//! ## Error handling
//!
//! Three classes of failure, matched to three different shapes:
//! - Bring-up failures ([`error::BringUpError`]) are fatal; a kernel
//!   binary converts them to a panic.
//! - Ordinary out-of-memory in a zone returns `None`; callers decide
//!   whether to retry in a lower zone ([`heap::kheap_alloc`] does) or
//!   propagate the failure.
//! - Misuse (double-free, freeing an interior frame) is a silent no-op;
//!   see [`buddy::BuddyAllocator::free_pages`].

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod buddy;
pub mod constants;
pub mod early_bitmap;
pub mod error;
pub mod firmware;
pub mod frame_metadata;
pub mod global_bitmap;
pub mod heap;
pub mod init;
pub mod linear_map;
pub mod pfn;
pub mod zone;

pub use buddy::BuddyAllocator;
pub use error::BringUpError;
pub use init::{PmmHandle, memory_init};
pub use pfn::Pfn;
pub use zone::ZoneId;
