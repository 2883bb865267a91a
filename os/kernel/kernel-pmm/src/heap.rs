//! Kernel heap shim: byte-size to buddy-order translation, plus the only
//! zone-fallback policy in this crate.

use crate::buddy::BuddyAllocator;
use crate::constants::{MAX_ORDER, PAGE_SIZE};
use crate::pfn::Pfn;
use crate::zone::ZoneId;

/// `order = ceil(log2(ceil(size / PAGE_SIZE)))`.
///
/// Computed by decrementing the page count *before* counting leading
/// zeros, which is what keeps an exact power-of-two page count from
/// rounding up to the next order.
#[must_use]
pub const fn size_to_order(size: usize) -> u8 {
    let page_count = (size as u64).div_ceil(PAGE_SIZE);
    if page_count <= 1 {
        return 0;
    }
    let mut remaining = page_count - 1;
    let mut order = 0u8;
    while remaining > 0 {
        remaining >>= 1;
        order += 1;
    }
    order
}

/// Allocates `size` bytes' worth of pages, starting at `zone` and
/// retrying strictly downward (`Normal -> Dma32 -> Dma`) on failure.
/// This is the only place in the crate that crosses zones; the buddy
/// allocator's own API has no such entry point.
#[must_use]
pub fn kheap_alloc(buddy: &BuddyAllocator, size: usize, zone: ZoneId) -> Option<Pfn> {
    if size == 0 {
        return None;
    }
    let order = size_to_order(size);
    if order >= MAX_ORDER {
        return None;
    }

    let mut current = Some(zone);
    while let Some(z) = current {
        if let Some(pfn) = buddy.alloc_pages(order, z) {
            return Some(pfn);
        }
        current = z.fallback();
    }
    None
}

/// Delegates directly to the buddy allocator's free.
pub fn kheap_free(buddy: &BuddyAllocator, pfn: Pfn) {
    buddy.free_pages(pfn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_power_of_two_does_not_over_round() {
        assert_eq!(size_to_order(4096), 0); // 1 page
        assert_eq!(size_to_order(8192), 1); // 2 pages, exact -> order 1 not 2
        assert_eq!(size_to_order(16384), 2); // 4 pages, exact -> order 2
        assert_eq!(size_to_order(4097), 1); // just over 1 page -> needs 2 pages
    }

    #[test]
    fn zero_size_has_order_zero_but_caller_filters_it() {
        assert_eq!(size_to_order(0), 0);
    }
}
