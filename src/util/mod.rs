use core::alloc::Layout;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::alloc::ffi;

/// Rounds `addr` down to the start of its containing page.
#[inline]
pub fn page_align(addr: usize) -> usize {
    page_align_to(addr, ffi::page_size())
}

/// Size of the page-backed block needed to hold `layout`.
///
/// Zero-sized layouts still take one page, so every allocation has an
/// address that can be watched.
#[inline]
pub fn aligned_layout_size(layout: &Layout) -> usize {
    aligned_size_to(layout.size(), ffi::page_size())
}

/// Addresses of every page spanned by `[addr, addr + len)`.
pub fn pages_of(addr: usize, len: usize) -> impl Iterator<Item = usize> {
    let page_size = ffi::page_size();
    let first = page_align_to(addr, page_size);
    let end = addr.saturating_add(len.max(1));

    (first..end).step_by(page_size)
}

/// Locks `mutex`, recovering the guard if a panicking thread poisoned it.
///
/// Every structure guarded this way stays consistent across a panic (plain
/// counters and sets), so the poison flag carries no information.
#[inline]
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
pub(crate) const fn page_align_to(addr: usize, page_size: usize) -> usize {
    addr & !(page_size - 1)
}

#[inline]
pub(crate) const fn aligned_size_to(size: usize, page_size: usize) -> usize {
    match size {
        0 => page_size,
        size => (size + page_size - 1) & !(page_size - 1),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_page_align_known_values() {
        assert_eq!(page_align_to(0x1fff, 0x1000), 0x1000);
        assert_eq!(page_align_to(0x2000, 0x1000), 0x2000);
        assert_eq!(page_align_to(0x0fff, 0x1000), 0);
    }

    #[test]
    fn test_aligned_size_zero_takes_one_page() {
        assert_eq!(aligned_size_to(0, 0x1000), 0x1000);
        assert_eq!(aligned_size_to(10, 0x1000), 0x1000);
        assert_eq!(aligned_size_to(0x1001, 0x1000), 0x2000);
    }

    #[test]
    fn test_pages_of_spans_boundaries() {
        let page = ffi::page_size();
        let base = page * 16;

        assert_eq!(pages_of(base, 1).collect::<Vec<_>>(), vec![base]);
        assert_eq!(pages_of(base, page).collect::<Vec<_>>(), vec![base]);
        assert_eq!(
            pages_of(base + page - 1, 2).collect::<Vec<_>>(),
            vec![base, base + page]
        );
        assert_eq!(pages_of(base, 0).collect::<Vec<_>>(), vec![base]);
    }

    proptest! {
        #[test]
        fn prop_page_align_is_page_start(addr in 0usize..usize::MAX / 2, shift in 12u32..17) {
            let page_size = 1usize << shift;
            let aligned = page_align_to(addr, page_size);

            prop_assert_eq!(aligned % page_size, 0);
            prop_assert!(aligned <= addr);
            prop_assert!(addr - aligned < page_size);
        }

        #[test]
        fn prop_aligned_size_covers_request(size in 0usize..(1 << 24), shift in 12u32..17) {
            let page_size = 1usize << shift;
            let aligned = aligned_size_to(size, page_size);

            prop_assert_eq!(aligned % page_size, 0);
            prop_assert!(aligned >= size.max(1));
            prop_assert!(aligned - size.max(1) < page_size);
        }
    }
}
