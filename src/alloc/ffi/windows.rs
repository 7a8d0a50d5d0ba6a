use core::{
    ffi::c_void,
    mem::{self, MaybeUninit},
    ptr::{self, NonNull},
};
use std::io;

use windows_sys::Win32::System::{
    Memory as win, ProcessStatus as win_psapi, SystemInformation as win_info,
    Threading as win_thread,
};

/// Maps a memory region into the process's address space.
///
/// Wraps the `VirtualAlloc` system call.
///
/// # Arguments
///
/// * `len` - The length of the memory region.
/// * `prot` - Memory protection flags.
/// * `flags` - Allocation flags.
///
/// # Returns
///
/// * A result containing a non-null pointer to the memory region on success,
///   or an I/O error on failure.
pub fn virtual_alloc(len: usize, prot: u32, flags: u32) -> io::Result<NonNull<[u8]>> {
    match unsafe { win::VirtualAlloc(ptr::null(), len, flags, prot) } {
        ptr if ptr.is_null() => Err(io::Error::last_os_error()),
        ptr => {
            let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
            Ok(NonNull::slice_from_raw_parts(ptr, len))
        }
    }
}

/// Locks a memory region into the working set, faulting its pages in.
///
/// Wraps the `VirtualLock` system call.
///
/// # Arguments
///
/// * `ptr` - A non-null pointer to the memory region.
/// * `len` - The length of the memory region.
///
/// # Returns
///
/// * A result indicating success or an I/O error on failure.
pub fn virtual_lock(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    match unsafe { win::VirtualLock(ptr.as_ptr() as _, len) } {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Unlocks a memory region. Calling it on pages that are not locked
/// removes them from the working set instead (and reports
/// `ERROR_NOT_LOCKED`).
///
/// Wraps the `VirtualUnlock` system call.
///
/// # Arguments
///
/// * `ptr` - A non-null pointer to the memory region.
/// * `len` - The length of the memory region.
///
/// # Returns
///
/// * A result indicating success or an I/O error on failure.
pub fn virtual_unlock(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    match unsafe { win::VirtualUnlock(ptr.as_ptr() as _, len) } {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Releases a region of pages reserved by [`virtual_alloc`].
///
/// Wraps the `VirtualFree` system call. `MEM_RELEASE` requires a size of
/// zero, the whole reservation is always released.
///
/// # Arguments
///
/// * `ptr` - The base pointer returned by [`virtual_alloc`].
///
/// # Returns
///
/// * A result indicating success or an I/O error on failure.
pub fn virtual_free(ptr: NonNull<u8>) -> io::Result<()> {
    match unsafe { win::VirtualFree(ptr.as_ptr() as _, 0, win::MEM_RELEASE) } {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Reports which pages of a region are part of the current process's
/// working set.
///
/// Wraps the `QueryWorkingSetEx` system call.
///
/// # Arguments
///
/// * `ptr` - A non-null pointer to the memory region.
/// * `len` - The length of the memory region.
///
/// # Returns
///
/// * One flag per page, `true` when the page is valid (resident),
///   or an I/O error on failure.
pub fn query_working_set(ptr: NonNull<u8>, len: usize) -> io::Result<Vec<bool>> {
    let page_size = self::page_size();
    let base = ptr.as_ptr() as usize;

    let mut entries = (0..(len + page_size - 1) / page_size)
        .map(|index| {
            let mut entry: win_psapi::PSAPI_WORKING_SET_EX_INFORMATION =
                unsafe { mem::zeroed() };
            entry.VirtualAddress = (base + index * page_size) as *mut c_void;
            entry
        })
        .collect::<Vec<_>>();

    let cb = (entries.len() * mem::size_of::<win_psapi::PSAPI_WORKING_SET_EX_INFORMATION>()) as u32;
    let process = unsafe { win_thread::GetCurrentProcess() };

    match unsafe { win_psapi::QueryWorkingSetEx(process, entries.as_mut_ptr() as _, cb) } {
        0 => Err(io::Error::last_os_error()),
        // Bit 0 of the attribute block is `Valid`.
        _ => Ok(entries
            .iter()
            .map(|entry| unsafe { entry.VirtualAttributes.Flags } & 1 == 1)
            .collect()),
    }
}

/// Retrieves the system's page size.
///
/// Wraps the `GetSystemInfo` system call.
///
/// # Returns
///
/// * The size of a memory page in bytes.
#[inline]
pub(super) fn page_size() -> usize {
    let sys_info = {
        let mut sys_info = MaybeUninit::<win_info::SYSTEM_INFO>::uninit();
        unsafe {
            win_info::GetSystemInfo(sys_info.as_mut_ptr());
            sys_info.assume_init()
        }
    };

    sys_info.dwPageSize as usize
}
