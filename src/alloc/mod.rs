use core::{alloc::Layout, ptr::NonNull};
use std::io;

pub mod ffi;
#[cfg(target_family = "unix")]
pub mod unix;
#[cfg(target_family = "windows")]
pub mod windows;

#[cfg(target_family = "unix")]
pub use self::unix::UnixPageAllocator as SystemPageAllocator;
#[cfg(target_family = "windows")]
pub use self::windows::WindowsPageAllocator as SystemPageAllocator;

/// Page protection requested for a new allocation.
///
/// Defaults to [`ReadWriteExecute`](Self::ReadWriteExecute), the access a
/// [`PagedBox`](crate::PagedBox) requests unless told otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protection {
    ReadWrite,
    #[default]
    ReadWriteExecute,
}

/// Host memory operations backing a [`PagedBox`](crate::PagedBox).
///
/// Every method works on whole pages: `layout` is rounded up to the page
/// size, so a block always covers at least one full page.
///
/// Only [`alloc`](Self::alloc) failures are fatal to callers. Residency
/// operations are best-effort and callers are expected to tolerate errors
/// from them.
pub trait PageAllocator {
    /// Reserves and commits page-backed memory for `layout`.
    fn alloc(&self, layout: Layout, protection: Protection) -> io::Result<NonNull<u8>>;

    /// Forces the pages into the working set and keeps them there.
    fn lock(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()>;

    /// Ends an explicit [`lock`](Self::lock), the pages may be evicted again.
    fn unlock(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()>;

    /// Removes the pages from the working set, preserving their contents.
    fn evict(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()>;

    /// Whether any page of the block is currently resident.
    fn is_resident(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<bool>;

    /// Zeroes and releases memory obtained from [`alloc`](Self::alloc).
    fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()>;
}
