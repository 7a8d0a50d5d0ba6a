use std::{io, path::PathBuf};

/// One entry of the host's working set change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchRecord {
    /// Virtual address whose page was brought into the working set.
    pub faulting_va: usize,
    /// Instruction that caused the fault, `None` for faults that were not
    /// triggered by executing code (prefetch, kernel reads, ...).
    pub faulting_pc: Option<usize>,
    /// Thread that caused the fault. It may belong to another process.
    pub thread_id: usize,
}

/// Outcome of a successful [`WatchSession::poll`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// The records buffer was filled with new changes.
    Ready,
    /// Nothing changed since the previous poll.
    Empty,
    /// More changes are pending than `capacity` records can hold.
    TooSmall { required: usize },
}

/// A working set watch session opened on the current process.
///
/// The monitor worker owns the session and is its only caller.
pub trait WatchSession: Send {
    /// Fetches at most `capacity` pending change records into `records`,
    /// replacing its previous content.
    ///
    /// An `Err` is treated as fatal by the monitor.
    fn poll(&mut self, records: &mut Vec<WatchRecord>, capacity: usize) -> io::Result<Poll>;

    /// Resolves the id of the process owning `thread_id`.
    fn process_of_thread(&self, thread_id: usize) -> io::Result<u32>;

    /// Resolves the executable path of `process_id`.
    fn process_image(&self, process_id: u32) -> io::Result<PathBuf>;

    fn current_process_id(&self) -> u32;
}

impl<S: WatchSession + ?Sized> WatchSession for Box<S> {
    #[inline]
    fn poll(&mut self, records: &mut Vec<WatchRecord>, capacity: usize) -> io::Result<Poll> {
        (**self).poll(records, capacity)
    }

    #[inline]
    fn process_of_thread(&self, thread_id: usize) -> io::Result<u32> {
        (**self).process_of_thread(thread_id)
    }

    #[inline]
    fn process_image(&self, process_id: u32) -> io::Result<PathBuf> {
        (**self).process_image(process_id)
    }

    #[inline]
    fn current_process_id(&self) -> u32 {
        (**self).current_process_id()
    }
}

/// Opens the host's working set watch session for the current process.
#[cfg(target_family = "windows")]
pub fn open_platform_session() -> crate::Result<Box<dyn WatchSession>> {
    let session = super::windows::WindowsWatchSession::open()?;
    Ok(Box::new(session))
}

/// Opens the host's working set watch session for the current process.
///
/// Only Windows keeps a per-process working set change log, every other
/// host fails with [`io::ErrorKind::Unsupported`].
#[cfg(not(target_family = "windows"))]
pub fn open_platform_session() -> crate::Result<Box<dyn WatchSession>> {
    Err(crate::Error::Initialization(io::Error::new(
        io::ErrorKind::Unsupported,
        "working set watch is not available on this platform",
    )))
}
