use core::{
    alloc::Layout,
    ptr::{self, NonNull},
};
use std::io;

use windows_sys::Win32::{
    Foundation::ERROR_NOT_LOCKED,
    System::Memory::{MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE, PAGE_READWRITE},
};
use zeroize::Zeroize;

use super::{ffi::windows as ffi, PageAllocator, Protection};
use crate::util;

/// Provides an implementation of the `PageAllocator` trait for Windows systems.
///
/// Blocks come from `VirtualAlloc`. Residency is driven with
/// `VirtualLock`/`VirtualUnlock`: unlocking a page that is not locked
/// removes it from the working set.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPageAllocator(());

impl WindowsPageAllocator {
    pub const fn new() -> Self {
        Self(())
    }
}

impl PageAllocator for WindowsPageAllocator {
    fn alloc(&self, layout: Layout, protection: Protection) -> io::Result<NonNull<u8>> {
        let size = util::aligned_layout_size(&layout);
        let prot = match protection {
            Protection::ReadWrite => PAGE_READWRITE,
            Protection::ReadWriteExecute => PAGE_EXECUTE_READWRITE,
        };

        let ptr = ffi::virtual_alloc(size, prot, MEM_COMMIT | MEM_RESERVE)?;
        Ok(ptr.cast::<u8>())
    }

    fn lock(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        ffi::virtual_lock(ptr, util::aligned_layout_size(&layout))
    }

    fn unlock(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        ffi::virtual_unlock(ptr, util::aligned_layout_size(&layout))
    }

    fn evict(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        // On pages that are not locked, VirtualUnlock evicts them and then
        // fails with ERROR_NOT_LOCKED. That failure is the expected outcome.
        match ffi::virtual_unlock(ptr, util::aligned_layout_size(&layout)) {
            Err(err) if err.raw_os_error() == Some(ERROR_NOT_LOCKED as i32) => Ok(()),
            result => result,
        }
    }

    fn is_resident(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<bool> {
        let pages = ffi::query_working_set(ptr, util::aligned_layout_size(&layout))?;
        Ok(pages.into_iter().any(|resident| resident))
    }

    fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        let size = util::aligned_layout_size(&layout);

        Zeroize::zeroize({
            let bytes_slice = ptr::slice_from_raw_parts_mut(ptr.as_ptr(), size);
            unsafe { &mut *bytes_slice }
        });

        // May fail (unchecked)
        let _ = ffi::virtual_unlock(ptr, size);

        ffi::virtual_free(ptr)
    }
}
