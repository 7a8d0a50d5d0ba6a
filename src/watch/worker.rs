use std::{sync::Arc, thread, time::Duration};

use super::{
    report,
    session::{Poll, WatchRecord, WatchSession},
    MonitorConfig, Shared,
};
use crate::util;

/// Body of the monitor thread. Returns once a stop was requested or the
/// session failed.
pub(super) fn run<S: WatchSession>(mut session: S, shared: Arc<Shared>, config: MonitorConfig) {
    let mut capacity = config.initial_capacity.max(1);
    let mut records = Vec::with_capacity(capacity);

    while !shared.stop_requested() {
        match session.poll(&mut records, capacity) {
            Ok(Poll::Ready) => scan(&session, &shared, &records),
            Ok(Poll::Empty) => {
                pause(config.poll_interval);
                continue;
            }
            Ok(Poll::TooSmall { required }) => {
                capacity = required.max(capacity + 1);
                log::debug!("growing working set change buffer to {capacity} records");
                continue;
            }
            Err(err) => {
                log::error!("working set watch failed, monitoring stopped: {err}");
                shared.fail(err);
                return;
            }
        }

        pause(config.poll_interval);
    }
}

fn scan<S: WatchSession>(session: &S, shared: &Shared, records: &[WatchRecord]) {
    // Attribution opens thread and process handles, keep it out of the lock.
    let hits = {
        let watch_list = util::lock(&shared.watch_list);
        records
            .iter()
            .filter(|record| record.faulting_pc.is_some())
            .filter_map(|record| {
                let page = util::page_align(record.faulting_va);
                watch_list.contains(&page).then_some((page, record))
            })
            .collect::<Vec<_>>()
    };

    hits.into_iter()
        .filter_map(|(page, record)| report::attribute(session, page, record))
        .for_each(|violation| shared.report(violation));
}

/// Sleeps for `interval` unless [`Monitor::stop`](super::Monitor::stop)
/// unparks the thread first.
#[inline]
fn pause(interval: Duration) {
    thread::park_timeout(interval);
}
