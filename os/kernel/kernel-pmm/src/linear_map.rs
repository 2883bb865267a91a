//! Linear-map bootstrap.
//!
//! Builds the LMAP high-half identity window: for any physical address
//! `P < LMAP_SIZE`, `LMAP_BASE + P` is a valid supervisor RW virtual
//! address aliasing `P`. Single-threaded, no locking — this runs before
//! any other CPU is started.

use crate::constants::{LMAP_BASE, LMAP_PML4_ENTRIES, PAGE_SIZE, TEMP_RECORD_MAX};
use crate::error::BringUpError;
use crate::firmware::FirmwareMemoryMap;
use crate::pfn::Pfn;

const PAGE_TABLE_ENTRIES: usize = 512;
const PAGE_PRESENT: u64 = 1 << 0;
const PAGE_WRITABLE: u64 = 1 << 1;
const PAGE_SIZE_BIT: u64 = 1 << 7;
const PAGE_1GB_FLAGS: u64 = PAGE_PRESENT | PAGE_WRITABLE | PAGE_SIZE_BIT;
const SCRATCH_REGION_BYTES: u64 = 2 * 1024 * 1024;
const SCRATCH_SEARCH_CEILING: u64 = 16 * 1024 * 1024 * 1024;

/// Fixed-capacity ledger of PFNs allocated during bootstrap (page-table
/// pages). Handed to the early bitmap so it can mark them used.
pub struct ScratchLedger {
    pfns: [Pfn; TEMP_RECORD_MAX],
    count: usize,
}

impl ScratchLedger {
    const fn new() -> Self {
        Self {
            pfns: [Pfn::new(0); TEMP_RECORD_MAX],
            count: 0,
        }
    }

    fn record(&mut self, pfn: Pfn) -> Result<(), BringUpError> {
        if self.count >= TEMP_RECORD_MAX {
            return Err(BringUpError::LedgerFull {
                capacity: TEMP_RECORD_MAX,
            });
        }
        self.pfns[self.count] = pfn;
        self.count += 1;
        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> &[Pfn] {
        &self.pfns[..self.count]
    }
}

/// Bump allocator over the 2 MiB scratch region found below 16 GiB.
/// Every allocated page is zeroed and recorded in the ledger.
struct ScratchAlloc {
    base: u64,
    next: u64,
    end: u64,
}

impl ScratchAlloc {
    fn find(firmware_map: &FirmwareMemoryMap<'_>) -> Result<Self, BringUpError> {
        for entry in firmware_map.free_entries() {
            if entry.base >= SCRATCH_SEARCH_CEILING {
                continue;
            }
            if entry.length >= SCRATCH_REGION_BYTES {
                let base = entry.base;
                return Ok(Self {
                    base,
                    next: base,
                    end: base + SCRATCH_REGION_BYTES,
                });
            }
        }
        Err(BringUpError::NoScratchRegion { size_mib: 2 })
    }

    /// Allocates one zeroed 4 KiB page, recording its PFN in `ledger`.
    ///
    /// # Safety
    /// The scratch region must already be identity/linearly accessible
    /// at this point in bring-up (firmware maps 0..16 GiB).
    unsafe fn alloc_page(&mut self, ledger: &mut ScratchLedger) -> Result<Pfn, BringUpError> {
        if self.next + PAGE_SIZE > self.end {
            return Err(BringUpError::ScratchExhausted {
                allocated_pages: ((self.next - self.base) / PAGE_SIZE) as usize,
            });
        }
        let phys = self.next;
        self.next += PAGE_SIZE;
        let pfn = Pfn::new(phys / PAGE_SIZE);

        unsafe {
            let table = phys as *mut u64;
            for i in 0..PAGE_TABLE_ENTRIES {
                table.add(i).write(0);
            }
        }

        ledger.record(pfn)?;
        Ok(pfn)
    }
}

/// Result of a successful bootstrap: the ledger of scratch pages the
/// caller must feed to the early bitmap allocator.
pub struct LinearMapSetup {
    pub ledger: ScratchLedger,
}

/// Builds the LMAP window and flushes the TLB by reloading the
/// page-table base register.
///
/// # Safety
/// Must run at CPL0, single-threaded, with the current PML4 addressable
/// via `pml4_phys` and firmware's own identity mapping of `[0, 16 GiB)`
/// still active.
pub unsafe fn linear_map_setup(
    pml4_phys: u64,
    firmware_map: &FirmwareMemoryMap<'_>,
) -> Result<LinearMapSetup, BringUpError> {
    let mut scratch = ScratchAlloc::find(firmware_map)?;
    let mut ledger = ScratchLedger::new();

    let pml4 = pml4_phys as *mut u64;
    let pml4_index_base = (LMAP_BASE >> 39) & 0x1FF;

    for i in 0..LMAP_PML4_ENTRIES {
        let pml4_index = pml4_index_base as usize + i;
        let existing = unsafe { pml4.add(pml4_index).read() };

        let pdpt_phys = if existing & PAGE_PRESENT != 0 {
            existing & !0xFFF
        } else {
            let pdpt_pfn = unsafe { scratch.alloc_page(&mut ledger) }?;
            let pdpt_phys = pdpt_pfn.as_u64() * PAGE_SIZE;
            unsafe {
                pml4
                    .add(pml4_index)
                    .write(pdpt_phys | PAGE_PRESENT | PAGE_WRITABLE);
            }
            pdpt_phys
        };

        let pdpt = pdpt_phys as *mut u64;
        let gib_base = (i as u64) << 30;
        for j in 0..PAGE_TABLE_ENTRIES {
            let phys = gib_base + ((j as u64) << 30);
            unsafe {
                pdpt.add(j).write(phys | PAGE_1GB_FLAGS);
            }
        }
    }

    unsafe {
        reload_cr3(pml4_phys);
    }

    log::info!(
        "[linear_map] LMAP established: base=0x{LMAP_BASE:016X}, {} scratch pages used",
        ledger.entries().len()
    );

    Ok(LinearMapSetup { ledger })
}

/// Reloads CR3 with its own value to flush all non-global TLB entries,
/// the same idiom `kernel_alloc::vmm::Vmm::local_tlb_flush_all` uses for
/// the active address space.
///
/// # Safety
/// `pml4_phys` must be a valid, currently-active PML4 physical address.
#[cfg(target_arch = "x86_64")]
unsafe fn reload_cr3(pml4_phys: u64) {
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) pml4_phys, options(nostack, preserves_flags));
    }
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn reload_cr3(_pml4_phys: u64) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{FirmwareMemoryMapEntry, FirmwareMemoryMapHeader, FirmwareRegionKind};

    #[test]
    fn scratch_region_not_found_below_ceiling_is_fatal() {
        let header = FirmwareMemoryMapHeader {
            total_size: 0,
            entry_count: 1,
            entry_size: core::mem::size_of::<FirmwareMemoryMapEntry>() as u64,
            _reserved: [0; 13],
        };
        // Only a tiny free region, well under 2 MiB.
        let entries = [FirmwareMemoryMapEntry {
            base: 0,
            length: 4096,
            kind: FirmwareRegionKind::Free as u32,
            _pad: 0,
        }];
        let map = FirmwareMemoryMap::from_entries(&header, &entries);
        assert!(matches!(
            ScratchAlloc::find(&map),
            Err(BringUpError::NoScratchRegion { size_mib: 2 })
        ));
    }

    #[test]
    fn ledger_rejects_overflow() {
        let mut ledger = ScratchLedger::new();
        for i in 0..TEMP_RECORD_MAX {
            ledger.record(Pfn::new(i as u64)).unwrap();
        }
        assert!(matches!(
            ledger.record(Pfn::new(9999)),
            Err(BringUpError::LedgerFull { .. })
        ));
    }
}
