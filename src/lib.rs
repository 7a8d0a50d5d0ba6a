//! Keeps sensitive values out of the process's working set and reports
//! other processes that page them back in.
//!
//! A [`PagedBox`] stores one value on its own pages. The pages are evicted
//! from the working set whenever the value is not checked out, so reading
//! them from outside forces the host to fault them back in. The
//! [`Monitor`] polls the host's working set change log and reports such
//! faults, together with the offending thread and process, through the
//! [`log`] facade and to subscribers.
//!
//! The working set change log is a Windows facility. On other hosts
//! [`Monitor::global`] fails with [`Error::Initialization`], and a monitor
//! has to be started over a custom [`WatchSession`].
//!
//! ```no_run
//! use paged_mem::{Monitor, PagedBox};
//!
//! let monitor = Monitor::global()?;
//! let mut secret = PagedBox::new([0u8; 10])?;
//!
//! if let Some(mut bytes) = secret.lock_mut() {
//!     bytes[0] = 0xff;
//!     bytes[2] = 0xff;
//! }
//!
//! monitor.stop()?;
//! # Ok::<(), paged_mem::Error>(())
//! ```

mod alloc;
mod boxed;
mod error;
#[cfg(test)]
mod testing;
mod util;
pub mod watch;

#[cfg(target_family = "unix")]
pub use alloc::unix::UnixPageAllocator;
#[cfg(target_family = "windows")]
pub use alloc::windows::WindowsPageAllocator;
pub use alloc::{PageAllocator, Protection, SystemPageAllocator};
pub use boxed::{PagedBox, PagedMut, PagedRef};
pub use error::{Error, Result};
pub use watch::{Monitor, MonitorConfig, MonitorState, Violation, WatchSession};
