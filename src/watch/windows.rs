use core::{ffi::c_void, mem};
use std::{
    ffi::OsString,
    io,
    os::windows::ffi::OsStringExt,
    path::PathBuf,
};

use windows_sys::Win32::{
    Foundation::{CloseHandle, ERROR_INSUFFICIENT_BUFFER, ERROR_NO_MORE_ITEMS, HANDLE},
    System::{
        ProcessStatus::{GetWsChangesEx, InitializeProcessForWsWatch, PSAPI_WS_WATCH_INFORMATION_EX},
        Threading::{
            GetCurrentProcess, GetCurrentProcessId, GetProcessIdOfThread, OpenProcess, OpenThread,
            QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
            THREAD_QUERY_INFORMATION,
        },
    },
};

use super::session::{Poll, WatchRecord, WatchSession};
use crate::{Error, Result};

const RECORD_SIZE: usize = mem::size_of::<PSAPI_WS_WATCH_INFORMATION_EX>();
const IMAGE_PATH_CAPACITY: usize = 1024;

/// Working set watch backed by the PSAPI change log
/// (`InitializeProcessForWsWatch` / `GetWsChangesEx`).
pub struct WindowsWatchSession {
    process: HANDLE,
    buffer: Vec<PSAPI_WS_WATCH_INFORMATION_EX>,
}

// The handle is the current-process pseudo handle, valid on every thread.
unsafe impl Send for WindowsWatchSession {}

impl WindowsWatchSession {
    /// Starts recording working set changes for the current process.
    pub fn open() -> Result<Self> {
        let process = unsafe { GetCurrentProcess() };

        if unsafe { InitializeProcessForWsWatch(process) } == 0 {
            return Err(Error::Initialization(io::Error::last_os_error()));
        }

        Ok(Self {
            process,
            buffer: Vec::new(),
        })
    }
}

impl WatchSession for WindowsWatchSession {
    fn poll(&mut self, records: &mut Vec<WatchRecord>, capacity: usize) -> io::Result<Poll> {
        records.clear();
        self.buffer.clear();
        self.buffer
            .resize_with(capacity, || unsafe { mem::zeroed() });

        let mut cb = (capacity * RECORD_SIZE) as u32;
        if unsafe { GetWsChangesEx(self.process, self.buffer.as_mut_ptr(), &mut cb) } == 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(code) if code == ERROR_NO_MORE_ITEMS as i32 => Ok(Poll::Empty),
                Some(code) if code == ERROR_INSUFFICIENT_BUFFER as i32 => Ok(Poll::TooSmall {
                    required: (cb as usize / RECORD_SIZE).max(capacity + 1),
                }),
                _ => Err(err),
            };
        }

        let written = (cb as usize / RECORD_SIZE).min(capacity);
        records.extend(
            self.buffer[..written]
                .iter()
                // Unused tail entries stay zeroed.
                .filter(|entry| !entry.BasicInfo.FaultingVa.is_null())
                .map(|entry| WatchRecord {
                    faulting_va: entry.BasicInfo.FaultingVa as usize,
                    faulting_pc: non_null(entry.BasicInfo.FaultingPc),
                    thread_id: entry.FaultingThreadId,
                }),
        );

        Ok(Poll::Ready)
    }

    fn process_of_thread(&self, thread_id: usize) -> io::Result<u32> {
        let thread = unsafe { OpenThread(THREAD_QUERY_INFORMATION, 0, thread_id as u32) };
        if thread.is_null() {
            return Err(io::Error::last_os_error());
        }

        let result = match unsafe { GetProcessIdOfThread(thread) } {
            0 => Err(io::Error::last_os_error()),
            pid => Ok(pid),
        };

        unsafe { CloseHandle(thread) };
        result
    }

    fn process_image(&self, process_id: u32) -> io::Result<PathBuf> {
        let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, process_id) };
        if process.is_null() {
            return Err(io::Error::last_os_error());
        }

        let mut path = vec![0u16; IMAGE_PATH_CAPACITY];
        let mut len = path.len() as u32;
        let result = match unsafe {
            QueryFullProcessImageNameW(process, PROCESS_NAME_WIN32, path.as_mut_ptr(), &mut len)
        } {
            0 => Err(io::Error::last_os_error()),
            _ => Ok(PathBuf::from(OsString::from_wide(&path[..len as usize]))),
        };

        unsafe { CloseHandle(process) };
        result
    }

    fn current_process_id(&self) -> u32 {
        unsafe { GetCurrentProcessId() }
    }
}

#[inline]
fn non_null(ptr: *mut c_void) -> Option<usize> {
    (!ptr.is_null()).then_some(ptr as usize)
}

#[cfg(test)]
mod tests {
    use windows_sys::Win32::System::Threading::GetCurrentThreadId;

    use super::*;

    #[test]
    fn test_resolves_own_thread_and_image() {
        let session = WindowsWatchSession::open().expect("Failed to open ws watch session");

        let tid = unsafe { GetCurrentThreadId() } as usize;
        let pid = session
            .process_of_thread(tid)
            .expect("Failed to resolve thread owner");
        assert_eq!(pid, session.current_process_id());

        let image = session
            .process_image(pid)
            .expect("Failed to resolve process image");
        assert_eq!(
            image.extension().and_then(|ext| ext.to_str()),
            Some("exe")
        );
    }

    #[test]
    fn test_poll_reports_an_outcome() {
        let mut session = WindowsWatchSession::open().expect("Failed to open ws watch session");
        let mut records = Vec::new();

        let touched = vec![0u8; 64 * 1024];
        assert_eq!(touched.iter().map(|&b| b as usize).sum::<usize>(), 0);

        match session.poll(&mut records, 4).expect("Failed to poll") {
            Poll::Ready => assert!(records.len() <= 4),
            Poll::Empty => assert!(records.is_empty()),
            Poll::TooSmall { required } => assert!(required > 4),
        }
    }
}
