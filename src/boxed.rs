use core::{
    alloc::Layout,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
};
use std::{io, sync::Mutex};

use crate::{
    alloc::{ffi, PageAllocator, Protection, SystemPageAllocator},
    util,
    watch::Monitor,
    Error, Result,
};

/// A value kept out of the process's working set while it is not in use.
///
/// The value lives alone on its own pages. Those pages are evicted right
/// after construction and every time the last access handle is released,
/// and they are watched by a [`Monitor`] that reports other processes
/// paging them back in.
///
/// Access goes through [`lock`](Self::lock) (shared, clonable handles) or
/// [`lock_mut`](Self::lock_mut) (exclusive handle). Handles borrow the box,
/// so they cannot outlive it.
///
/// Residency control is best-effort: the host may refuse to lock or evict a
/// page, and such failures are only logged. Nothing here encrypts the
/// value.
pub struct PagedBox<T, A: PageAllocator = SystemPageAllocator> {
    ptr: Option<NonNull<T>>,
    allocator: A,
    /// Live handles across every checkout. The pages stay locked while it
    /// is non-zero.
    checkouts: Mutex<usize>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send, A: PageAllocator + Send> Send for PagedBox<T, A> {}
unsafe impl<T: Sync, A: PageAllocator + Sync> Sync for PagedBox<T, A> {}

impl<T> PagedBox<T> {
    /// Moves `value` onto fresh pages watched by the global monitor.
    ///
    /// Starts the global monitor on first use, see [`Monitor::global`].
    pub fn new(value: T) -> Result<Self> {
        Self::new_in(value, Monitor::global()?)
    }

    /// Moves `value` onto fresh read/write/execute pages watched by `monitor`.
    pub fn new_in(value: T, monitor: &Monitor) -> Result<Self> {
        Self::new_in_with(
            value,
            monitor,
            SystemPageAllocator::default(),
            Protection::default(),
        )
    }
}

impl<T, A: PageAllocator> PagedBox<T, A> {
    const LAYOUT: Layout = Layout::new::<T>();

    /// Moves `value` onto fresh pages from `allocator`, evicts them and
    /// registers every page with `monitor`.
    ///
    /// # Errors
    /// [`Error::Allocation`] if the host refuses the pages or `T` needs an
    /// alignment larger than a page.
    pub fn new_in_with(
        value: T,
        monitor: &Monitor,
        allocator: A,
        protection: Protection,
    ) -> Result<Self> {
        if Self::LAYOUT.align() > ffi::page_size() {
            return Err(Error::Allocation(io::Error::new(
                io::ErrorKind::InvalidInput,
                "alignment exceeds the page size",
            )));
        }

        let ptr = allocator
            .alloc(Self::LAYOUT, protection)
            .map_err(Error::Allocation)?
            .cast::<T>();
        unsafe { ptr.as_ptr().write(value) };

        let this = Self {
            ptr: Some(ptr),
            allocator,
            checkouts: Mutex::new(0),
            _marker: PhantomData,
        };

        // Writing the value just paged the block in.
        this.force_evict(ptr);

        for page in util::pages_of(ptr.as_ptr() as usize, this.block_size()) {
            monitor.add(page);
        }

        Ok(this)
    }

    /// Checks the value out for shared access.
    ///
    /// The pages are locked into the working set until the last handle,
    /// from this or any other checkout, is dropped. Returns `None` if the
    /// box was emptied by [`take`](Self::take).
    pub fn lock(&self) -> Option<PagedRef<'_, T, A>> {
        let ptr = self.ptr?;
        self.begin_checkout(ptr);

        Some(PagedRef { owner: self, ptr })
    }

    /// Checks the value out for exclusive access.
    pub fn lock_mut(&mut self) -> Option<PagedMut<'_, T, A>> {
        let ptr = self.ptr?;
        self.begin_checkout(ptr);

        Some(PagedMut {
            owner: self,
            ptr,
            _marker: PhantomData,
        })
    }

    /// Whether the box still owns its pages.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.ptr.is_some()
    }

    /// Whether at least one access handle is alive.
    pub fn is_locked(&self) -> bool {
        *util::lock(&self.checkouts) > 0
    }

    /// Asks the host whether any page of the block is in the working set.
    ///
    /// An emptied box reports `false`.
    pub fn is_resident(&self) -> io::Result<bool> {
        match self.ptr {
            Some(ptr) => self.allocator.is_resident(ptr.cast(), Self::LAYOUT),
            None => Ok(false),
        }
    }

    /// Address of the value, null for an emptied box.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.map_or(ptr::null(), |ptr| ptr.as_ptr() as *const T)
    }

    /// First page of the block, the one a monitor reports.
    #[inline]
    pub fn page(&self) -> Option<usize> {
        self.ptr.map(|ptr| ptr.as_ptr() as usize)
    }

    /// Size of the backing block in bytes, always whole pages.
    #[inline]
    pub fn block_size(&self) -> usize {
        util::aligned_layout_size(&Self::LAYOUT)
    }

    fn begin_checkout(&self, ptr: NonNull<T>) {
        let mut checkouts = util::lock(&self.checkouts);

        if *checkouts == 0 {
            if let Err(err) = self.allocator.lock(ptr.cast(), Self::LAYOUT) {
                log::debug!("failed to lock page {:p}: {err}", ptr);
            }
        }

        *checkouts += 1;
    }

    #[inline]
    fn retain_checkout(&self) {
        *util::lock(&self.checkouts) += 1;
    }

    fn release_checkout(&self, ptr: NonNull<T>) {
        let mut checkouts = util::lock(&self.checkouts);
        *checkouts -= 1;

        if *checkouts == 0 {
            self.end_checkout(ptr);
            self.force_evict(ptr);
        }
    }

    /// Drops the lock taken by the first checkout.
    fn end_checkout(&self, ptr: NonNull<T>) {
        if let Err(err) = self.allocator.unlock(ptr.cast(), Self::LAYOUT) {
            log::debug!("failed to unlock page {:p}: {err}", ptr);
        }
    }

    /// Pushes the pages out of the working set.
    ///
    /// Windows keeps a page that was touched while locked in the working
    /// set after `VirtualUnlock`; only a second unlock on the now unlocked
    /// page evicts it. This is host behavior and the reason this step is
    /// separate from [`end_checkout`](Self::end_checkout).
    fn force_evict(&self, ptr: NonNull<T>) {
        if let Err(err) = self.allocator.evict(ptr.cast(), Self::LAYOUT) {
            log::debug!("failed to evict page {:p}: {err}", ptr);
        }
    }
}

impl<T, A: PageAllocator + Clone> PagedBox<T, A> {
    /// Moves the pages into a new box, leaving `self` empty.
    ///
    /// The emptied box cannot be locked and frees nothing on drop.
    pub fn take(&mut self) -> Self {
        Self {
            ptr: self.ptr.take(),
            allocator: self.allocator.clone(),
            checkouts: Mutex::new(0),
            _marker: PhantomData,
        }
    }
}

impl<T, A: PageAllocator> Drop for PagedBox<T, A> {
    fn drop(&mut self) {
        let Some(ptr) = self.ptr.take() else {
            return;
        };

        // Page the block back in before it is wiped and released.
        if let Err(err) = self.allocator.lock(ptr.cast(), Self::LAYOUT) {
            log::debug!("failed to lock page {:p} before release: {err}", ptr);
        }

        unsafe { ptr::drop_in_place(ptr.as_ptr()) };

        if let Err(err) = self.allocator.dealloc(ptr.cast(), Self::LAYOUT) {
            log::warn!("failed to release protected page {:p}: {err}", ptr);
        }
    }
}

impl<T, A: PageAllocator> fmt::Debug for PagedBox<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedBox")
            .field("ptr", &self.as_ptr())
            .field("block_size", &self.block_size())
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Shared access to the value of a [`PagedBox`].
///
/// Cloning shares the checkout; the pages are evicted again once every
/// handle of the box is gone.
pub struct PagedRef<'a, T, A: PageAllocator = SystemPageAllocator> {
    owner: &'a PagedBox<T, A>,
    ptr: NonNull<T>,
}

unsafe impl<T: Sync, A: PageAllocator + Sync> Send for PagedRef<'_, T, A> {}
unsafe impl<T: Sync, A: PageAllocator + Sync> Sync for PagedRef<'_, T, A> {}

impl<T, A: PageAllocator> Clone for PagedRef<'_, T, A> {
    fn clone(&self) -> Self {
        self.owner.retain_checkout();
        Self {
            owner: self.owner,
            ptr: self.ptr,
        }
    }
}

impl<T, A: PageAllocator> Deref for PagedRef<'_, T, A> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, A: PageAllocator> Drop for PagedRef<'_, T, A> {
    fn drop(&mut self) {
        self.owner.release_checkout(self.ptr);
    }
}

/// Exclusive access to the value of a [`PagedBox`].
pub struct PagedMut<'a, T, A: PageAllocator = SystemPageAllocator> {
    owner: &'a PagedBox<T, A>,
    ptr: NonNull<T>,
    _marker: PhantomData<&'a mut T>,
}

unsafe impl<T: Send + Sync, A: PageAllocator + Sync> Send for PagedMut<'_, T, A> {}
unsafe impl<T: Sync, A: PageAllocator + Sync> Sync for PagedMut<'_, T, A> {}

impl<T, A: PageAllocator> Deref for PagedMut<'_, T, A> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, A: PageAllocator> DerefMut for PagedMut<'_, T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T, A: PageAllocator> Drop for PagedMut<'_, T, A> {
    fn drop(&mut self) {
        self.owner.release_checkout(self.ptr);
    }
}
