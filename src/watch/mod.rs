//! Working set monitor.
//!
//! A background thread polls the host's working set change log and reports
//! every fault on a watched page that was caused by a thread of another
//! process.

mod config;
mod report;
mod session;
#[cfg(target_family = "windows")]
mod windows;
mod worker;

use std::{
    collections::BTreeSet,
    io,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, OnceLock,
    },
    thread::{self, JoinHandle},
};

pub use self::{
    config::MonitorConfig,
    report::Violation,
    session::{open_platform_session, Poll, WatchRecord, WatchSession},
};
#[cfg(target_family = "windows")]
pub use self::windows::WindowsWatchSession;
use crate::{alloc::ffi, util, Error, Result};

static GLOBAL: OnceLock<Monitor> = OnceLock::new();
/// Config for the first [`Monitor::global`] call. Holding this lock also
/// serializes global initialization.
static GLOBAL_CONFIG: Mutex<Option<MonitorConfig>> = Mutex::new(None);

/// Lifecycle of a [`Monitor`].
///
/// A started monitor begins in `Running`. `Uninitialized` is only reported
/// by [`Monitor::global_state`] before the process-wide monitor started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    Uninitialized = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
    /// The worker hit a fatal host error, see [`Monitor::health`].
    Failed = 4,
}

impl MonitorState {
    #[inline]
    fn from_u8(state: u8) -> Self {
        match state {
            0 => Self::Uninitialized,
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Failed,
        }
    }
}

/// State shared between a [`Monitor`] handle and its worker thread.
struct Shared {
    watch_list: Mutex<BTreeSet<usize>>,
    subscribers: Mutex<Vec<Sender<Violation>>>,
    last_error: Mutex<Option<Arc<io::Error>>>,
    stop: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    fn new() -> Self {
        Self {
            watch_list: Mutex::new(BTreeSet::new()),
            subscribers: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
            stop: AtomicBool::new(false),
            state: AtomicU8::new(MonitorState::Running as u8),
        }
    }

    #[inline]
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn fail(&self, err: io::Error) {
        *util::lock(&self.last_error) = Some(Arc::new(err));
        self.state.store(MonitorState::Failed as u8, Ordering::Release);
    }

    fn report(&self, violation: Violation) {
        log::warn!("{violation}");

        util::lock(&self.subscribers).retain(|tx| tx.send(violation.clone()).is_ok());
    }

    fn transition(&self, from: MonitorState, to: MonitorState) {
        let _ = self.state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Working set monitor.
///
/// Owns the watch list and the worker thread polling a [`WatchSession`].
/// Most programs use the lazily started process-wide instance from
/// [`Monitor::global`]; [`Monitor::start`] runs one over any session.
///
/// A monitor cannot be restarted once stopped.
pub struct Monitor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Returns the process-wide monitor, opening the platform session and
    /// starting its worker on first use.
    ///
    /// A failed start leaves the global uninitialized, so a later call tries
    /// again.
    pub fn global() -> Result<&'static Monitor> {
        if let Some(monitor) = GLOBAL.get() {
            return Ok(monitor);
        }

        let mut pending = util::lock(&GLOBAL_CONFIG);
        if let Some(monitor) = GLOBAL.get() {
            return Ok(monitor);
        }

        let config = pending.clone().unwrap_or_default();
        let monitor = Self::start(open_platform_session()?, config)?;
        pending.take();

        Ok(GLOBAL.get_or_init(|| monitor))
    }

    /// Sets the config used when [`Monitor::global`] starts the process-wide
    /// monitor.
    pub fn configure_global(config: MonitorConfig) -> Result<()> {
        let mut pending = util::lock(&GLOBAL_CONFIG);
        if GLOBAL.get().is_some() {
            return Err(Error::AlreadyInitialized);
        }

        *pending = Some(config);
        Ok(())
    }

    /// State of the process-wide monitor, `Uninitialized` until
    /// [`Monitor::global`] succeeds.
    pub fn global_state() -> MonitorState {
        GLOBAL
            .get()
            .map_or(MonitorState::Uninitialized, Monitor::state)
    }

    /// Starts a worker polling `session`.
    pub fn start<S: WatchSession + 'static>(session: S, config: MonitorConfig) -> Result<Self> {
        let shared = Arc::new(Shared::new());

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || worker::run(session, shared, config))
                .map_err(Error::Initialization)?
        };

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Adds the page containing `addr` to the watch list.
    ///
    /// Returns `false` if the page was already watched. Polls starting after
    /// this call see the page.
    pub fn add(&self, addr: usize) -> bool {
        let page = util::page_align(addr);
        let inserted = util::lock(&self.shared.watch_list).insert(page);

        if inserted {
            log::info!("watching page {page:#x}");
        }

        inserted
    }

    pub fn is_watched(&self, addr: usize) -> bool {
        util::lock(&self.shared.watch_list).contains(&util::page_align(addr))
    }

    /// Snapshot of the watched pages, in address order.
    pub fn watched(&self) -> Vec<usize> {
        util::lock(&self.shared.watch_list).iter().copied().collect()
    }

    /// Returns a channel receiving every violation reported from now on.
    pub fn subscribe(&self) -> Receiver<Violation> {
        let (tx, rx) = mpsc::channel();
        util::lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Granularity of the watch list, the host page size.
    #[inline]
    pub fn page_size(&self) -> usize {
        ffi::page_size()
    }

    #[inline]
    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Fails with [`Error::MonitorFatal`] once the worker terminated on a
    /// host error. Violations are no longer detected from that point on.
    pub fn health(&self) -> Result<()> {
        match &*util::lock(&self.shared.last_error) {
            Some(err) => Err(Error::MonitorFatal(Arc::clone(err))),
            None => Ok(()),
        }
    }

    /// Signals the worker to exit and waits for it.
    ///
    /// The worker notices the request before its next poll; a host call in
    /// flight completes first. Calls after the first one do nothing.
    pub fn stop(&self) -> Result<()> {
        let Some(worker) = util::lock(&self.worker).take() else {
            return Ok(());
        };

        self.shared
            .transition(MonitorState::Running, MonitorState::Stopping);
        self.shared.stop.store(true, Ordering::Release);
        worker.thread().unpark();

        let joined = worker.join();
        self.shared
            .transition(MonitorState::Stopping, MonitorState::Stopped);

        joined.map_err(|_| Error::WorkerPanicked)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("{err}");
        }
    }
}
