//! The driving loop.
//!
//! One thread drains the session, applies every notification in delivery
//! order, then decides whether to flush. All on-demand persist requests raised
//! during a drain collapse into a single flush at the end of it; otherwise the
//! periodic schedule decides.

use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::ingest::{EventIngestor, Persist};
use crate::persist::{FlushSchedule, SnapshotPersister};
use crate::session::SessionClient;

/// Wait between iterations; bounds CPU use while idle.
pub const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub handled: usize,
    pub flushed: bool,
}

pub struct Runner<C> {
    client: C,
    ingestor: EventIngestor,
    persister: SnapshotPersister,
    schedule: FlushSchedule,
}

impl<C: SessionClient> Runner<C> {
    pub fn new(
        client: C,
        ingestor: EventIngestor,
        persister: SnapshotPersister,
        flush_interval: Duration,
    ) -> Self {
        Self {
            client,
            ingestor,
            persister,
            schedule: FlushSchedule::new(flush_interval, Instant::now()),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn run_iteration(&mut self) -> IterationReport {
        let notifications = self.client.poll();
        let handled = notifications.len();

        let mut persist_now = false;
        for notification in notifications {
            debug!(kind = notification.kind(), "Handling notification");
            if self.ingestor.handle(&mut self.client, notification) == Persist::Now {
                persist_now = true;
            }
        }

        let flushed = persist_now || self.schedule.is_due(Instant::now());
        if flushed {
            self.persister.flush();
            self.schedule.mark(Instant::now());
        }

        IterationReport { handled, flushed }
    }

    /// Runs until the process is terminated.
    pub fn run(&mut self) -> ! {
        loop {
            self.run_iteration();
            thread::sleep(IDLE_WAIT);
        }
    }
}
