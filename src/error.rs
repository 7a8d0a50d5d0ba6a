use std::{io, sync::Arc};

/// Errors returned by protected allocations and the working set monitor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The host refused to reserve or commit the backing pages, or the value
    /// cannot be placed on a page (alignment larger than the page size).
    #[error("failed to allocate protected memory: {0}")]
    Allocation(#[source] io::Error),

    /// The host refused to start a working set watch session (missing
    /// privilege, unsupported platform) or the worker could not be spawned.
    #[error("failed to initialize working set watch: {0}")]
    Initialization(#[source] io::Error),

    /// The polling loop hit a non-recoverable host error and terminated.
    /// Protection monitoring is lost from that point on.
    #[error("working set monitor terminated: {0}")]
    MonitorFatal(#[source] Arc<io::Error>),

    #[error("working set monitor is already initialized")]
    AlreadyInitialized,

    #[error("working set monitor thread panicked")]
    WorkerPanicked,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
