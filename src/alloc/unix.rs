use core::{
    alloc::Layout,
    ptr::{self, NonNull},
};
use std::io;

use libc::{PROT_EXEC, PROT_READ, PROT_WRITE};
use zeroize::Zeroize;

use super::{ffi::unix as ffi, PageAllocator, Protection};
use crate::util;

/// Provides an implementation of the `PageAllocator` trait for Unix-based systems.
///
/// Blocks are private anonymous mappings. Eviction relies on
/// `madvise(MADV_PAGEOUT)`, so it only has an effect on Linux 5.4+ with swap
/// available; elsewhere pages stay resident and the call reports an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPageAllocator(());

impl UnixPageAllocator {
    pub const fn new() -> Self {
        Self(())
    }
}

impl PageAllocator for UnixPageAllocator {
    fn alloc(&self, layout: Layout, protection: Protection) -> io::Result<NonNull<u8>> {
        let size = util::aligned_layout_size(&layout);
        let prot = match protection {
            Protection::ReadWrite => PROT_READ | PROT_WRITE,
            Protection::ReadWriteExecute => PROT_READ | PROT_WRITE | PROT_EXEC,
        };

        let ptr = ffi::mmap_anonymous(size, prot)?.cast::<u8>();

        // May fail (unchecked)
        #[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
        let _ = ffi::madvise(ptr, size, libc::MADV_NOCORE);
        #[cfg(target_os = "linux")]
        let _ = ffi::madvise(ptr, size, libc::MADV_DONTDUMP);

        Ok(ptr)
    }

    fn lock(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        ffi::mlock(ptr, util::aligned_layout_size(&layout))
    }

    fn unlock(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        ffi::munlock(ptr, util::aligned_layout_size(&layout))
    }

    fn evict(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        let size = util::aligned_layout_size(&layout);

        // MADV_DONTNEED would drop the contents of a private mapping.
        #[cfg(target_os = "linux")]
        {
            ffi::madvise(ptr, size, libc::MADV_PAGEOUT)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (ptr, size);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "page eviction is only available on Linux",
            ))
        }
    }

    fn is_resident(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<bool> {
        let pages = ffi::mincore(ptr, util::aligned_layout_size(&layout))?;
        Ok(pages.into_iter().any(|resident| resident))
    }

    fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        let size = util::aligned_layout_size(&layout);

        Zeroize::zeroize({
            let bytes_slice = ptr::slice_from_raw_parts_mut(ptr.as_ptr(), size);
            unsafe { &mut *bytes_slice }
        });

        // May fail (unchecked)
        let _ = ffi::munlock(ptr, size);
        #[cfg(target_os = "linux")]
        let _ = ffi::madvise(ptr, size, libc::MADV_DODUMP);

        ffi::munmap(ptr, size)
    }
}
