use std::{fmt, path::PathBuf};

use super::session::{WatchRecord, WatchSession};

/// A watched page brought into the working set by another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Watched page that became resident.
    pub page: usize,
    /// Exact faulting address inside `page`.
    pub address: usize,
    pub thread_id: usize,
    pub instruction_pointer: usize,
    pub process_id: u32,
    /// Executable of the offending process, `None` when it could not be
    /// queried (process gone, access denied).
    pub process_path: Option<PathBuf>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x} ({:#x}) was mapped by (TID: {}) @ {:#x} --> ",
            self.page, self.address, self.thread_id, self.instruction_pointer
        )?;

        match &self.process_path {
            Some(path) => write!(f, "{} (PID: {})", path.display(), self.process_id),
            None => write!(f, "<unknown> (PID: {})", self.process_id),
        }
    }
}

/// Attributes a fault on a watched `page` to the process that caused it.
///
/// Returns `None` for faults raised by the current process, and for faults
/// whose thread can no longer be resolved.
pub(super) fn attribute<S: WatchSession + ?Sized>(
    session: &S,
    page: usize,
    record: &WatchRecord,
) -> Option<Violation> {
    let instruction_pointer = record.faulting_pc?;

    let process_id = match session.process_of_thread(record.thread_id) {
        Ok(process_id) => process_id,
        Err(err) => {
            log::debug!(
                "cannot attribute fault on {page:#x} to thread {}: {err}",
                record.thread_id
            );
            return None;
        }
    };

    if process_id == session.current_process_id() {
        return None;
    }

    let process_path = session
        .process_image(process_id)
        .map_err(|err| log::debug!("cannot query image of process {process_id}: {err}"))
        .ok();

    Some(Violation {
        page,
        address: record.faulting_va,
        thread_id: record.thread_id,
        instruction_pointer,
        process_id,
        process_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display() {
        let violation = Violation {
            page: 0x7ff0_0000,
            address: 0x7ff0_0010,
            thread_id: 42,
            instruction_pointer: 0x1234,
            process_id: 7,
            process_path: Some(PathBuf::from("reader.exe")),
        };

        assert_eq!(
            violation.to_string(),
            "0x7ff00000 (0x7ff00010) was mapped by (TID: 42) @ 0x1234 --> reader.exe (PID: 7)"
        );

        let violation = Violation {
            process_path: None,
            ..violation
        };
        assert!(violation.to_string().ends_with("<unknown> (PID: 7)"));
    }
}
