//! Test doubles for the host seams.

use core::{alloc::Layout, ptr::NonNull};
use std::{
    collections::{HashMap, VecDeque},
    io,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{
    alloc::{PageAllocator, Protection, SystemPageAllocator},
    util,
    watch::{Monitor, MonitorConfig, Poll, WatchRecord, WatchSession},
};

pub const OWN_PID: u32 = 1000;

#[derive(Default)]
struct ScriptState {
    batches: VecDeque<io::Result<Vec<WatchRecord>>>,
    capacities: Vec<usize>,
    threads: HashMap<usize, u32>,
    images: HashMap<u32, PathBuf>,
    dropped: bool,
}

/// Handle used by a test to drive a [`ScriptedSession`] from the outside.
#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<ScriptState>>);

impl Script {
    pub fn push_batch(&self, records: Vec<WatchRecord>) {
        self.state().batches.push_back(Ok(records));
    }

    pub fn push_error(&self, err: io::Error) {
        self.state().batches.push_back(Err(err));
    }

    pub fn thread(&self, thread_id: usize, process_id: u32) {
        self.state().threads.insert(thread_id, process_id);
    }

    pub fn image(&self, process_id: u32, path: &str) {
        self.state().images.insert(process_id, PathBuf::from(path));
    }

    /// Capacity passed to every poll so far.
    pub fn capacities(&self) -> Vec<usize> {
        self.state().capacities.clone()
    }

    pub fn is_drained(&self) -> bool {
        self.state().batches.is_empty()
    }

    pub fn session_dropped(&self) -> bool {
        self.state().dropped
    }

    pub fn session(&self) -> ScriptedSession {
        ScriptedSession(self.clone())
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        util::lock(&*self.0)
    }
}

/// A [`WatchSession`] replaying batches queued through its [`Script`].
pub struct ScriptedSession(Script);

impl WatchSession for ScriptedSession {
    fn poll(&mut self, records: &mut Vec<WatchRecord>, capacity: usize) -> io::Result<Poll> {
        let mut state = self.0.state();
        state.capacities.push(capacity);
        records.clear();

        let required = match state.batches.front() {
            None => return Ok(Poll::Empty),
            Some(Ok(batch)) if batch.len() > capacity => Some(batch.len()),
            Some(_) => None,
        };
        if let Some(required) = required {
            return Ok(Poll::TooSmall { required });
        }

        match state.batches.pop_front() {
            Some(Ok(batch)) => {
                records.extend(batch);
                Ok(Poll::Ready)
            }
            Some(Err(err)) => Err(err),
            None => Ok(Poll::Empty),
        }
    }

    fn process_of_thread(&self, thread_id: usize) -> io::Result<u32> {
        self.0.state()
            .threads
            .get(&thread_id)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such thread"))
    }

    fn process_image(&self, process_id: u32) -> io::Result<PathBuf> {
        self.0.state()
            .images
            .get(&process_id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::PermissionDenied, "access denied"))
    }

    fn current_process_id(&self) -> u32 {
        OWN_PID
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.0.state().dropped = true;
    }
}

pub fn fast_config() -> MonitorConfig {
    MonitorConfig::default().with_poll_interval(Duration::from_millis(20))
}

pub fn scripted_monitor(config: MonitorConfig) -> (Monitor, Script) {
    let script = Script::default();
    let monitor = Monitor::start(script.session(), config).expect("Failed to start monitor");
    (monitor, script)
}

pub fn record(faulting_va: usize, faulting_pc: Option<usize>, thread_id: usize) -> WatchRecord {
    WatchRecord {
        faulting_va,
        faulting_pc,
        thread_id,
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Alloc,
    Lock,
    Unlock,
    Evict,
    Dealloc,
}

/// System allocator that records the residency operations it receives.
#[derive(Clone, Default)]
pub struct RecordingAllocator {
    inner: SystemPageAllocator,
    ops: Arc<Mutex<Vec<Op>>>,
    protections: Arc<Mutex<Vec<Protection>>>,
}

impl RecordingAllocator {
    pub fn ops(&self) -> Vec<Op> {
        util::lock(&*self.ops).clone()
    }

    /// Protection passed to every `alloc` so far.
    pub fn protections(&self) -> Vec<Protection> {
        util::lock(&*self.protections).clone()
    }

    pub fn count(&self, op: Op) -> usize {
        util::lock(&*self.ops).iter().filter(|&&seen| seen == op).count()
    }

    fn push(&self, op: Op) {
        util::lock(&*self.ops).push(op);
    }
}

impl PageAllocator for RecordingAllocator {
    fn alloc(&self, layout: Layout, protection: Protection) -> io::Result<NonNull<u8>> {
        self.push(Op::Alloc);
        util::lock(&*self.protections).push(protection);
        self.inner.alloc(layout, protection)
    }

    fn lock(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        self.push(Op::Lock);
        self.inner.lock(ptr, layout)
    }

    fn unlock(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        self.push(Op::Unlock);
        self.inner.unlock(ptr, layout)
    }

    fn evict(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        self.push(Op::Evict);
        self.inner.evict(ptr, layout)
    }

    fn is_resident(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<bool> {
        self.inner.is_resident(ptr, layout)
    }

    fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        self.push(Op::Dealloc);
        self.inner.dealloc(ptr, layout)
    }
}

fn refused(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, format!("{op} refused"))
}

/// Allocator whose host never hands out pages.
#[derive(Clone, Copy, Default)]
pub struct RefusingAllocator;

impl PageAllocator for RefusingAllocator {
    fn alloc(&self, _layout: Layout, _protection: Protection) -> io::Result<NonNull<u8>> {
        Err(io::Error::new(io::ErrorKind::OutOfMemory, "commit limit reached"))
    }

    fn lock(&self, _ptr: NonNull<u8>, _layout: Layout) -> io::Result<()> {
        Err(refused("lock"))
    }

    fn unlock(&self, _ptr: NonNull<u8>, _layout: Layout) -> io::Result<()> {
        Err(refused("unlock"))
    }

    fn evict(&self, _ptr: NonNull<u8>, _layout: Layout) -> io::Result<()> {
        Err(refused("evict"))
    }

    fn is_resident(&self, _ptr: NonNull<u8>, _layout: Layout) -> io::Result<bool> {
        Err(refused("residency query"))
    }

    fn dealloc(&self, _ptr: NonNull<u8>, _layout: Layout) -> io::Result<()> {
        Err(refused("release"))
    }
}

/// System allocator whose residency operations all fail.
#[derive(Clone, Default)]
pub struct UnreliableAllocator {
    inner: SystemPageAllocator,
}

impl PageAllocator for UnreliableAllocator {
    fn alloc(&self, layout: Layout, protection: Protection) -> io::Result<NonNull<u8>> {
        self.inner.alloc(layout, protection)
    }

    fn lock(&self, _ptr: NonNull<u8>, _layout: Layout) -> io::Result<()> {
        Err(refused("lock"))
    }

    fn unlock(&self, _ptr: NonNull<u8>, _layout: Layout) -> io::Result<()> {
        Err(refused("unlock"))
    }

    fn evict(&self, _ptr: NonNull<u8>, _layout: Layout) -> io::Result<()> {
        Err(refused("evict"))
    }

    fn is_resident(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<bool> {
        self.inner.is_resident(ptr, layout)
    }

    fn dealloc(&self, ptr: NonNull<u8>, layout: Layout) -> io::Result<()> {
        self.inner.dealloc(ptr, layout)
    }
}
