use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::admission::AdmissionPool;

/// Lifecycle of a running dispatcher; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    Running = 0,
    Draining = 1,
    Done = 2,
}

impl Phase {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Done,
        }
    }
}

/// Outcome of a graceful shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every in-flight command finished within the grace period
    pub drained: bool,
    /// Commands still running when the grace period ran out
    pub outstanding: usize,
    pub elapsed: Duration,
}

struct Shared {
    phase: AtomicU8,
    root: CancellationToken,
    admission: CancellationToken,
    admission_finished: CancellationToken,
    pool: AdmissionPool,
    tracker: TaskTracker,
    report: OnceCell<ShutdownReport>,
}

/// Control handle for a started [`Dispatcher`](crate::Dispatcher)
///
/// Cheap to clone; all clones drive the same shutdown.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    pub(crate) fn new(
        root: CancellationToken,
        admission: CancellationToken,
        admission_finished: CancellationToken,
        pool: AdmissionPool,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                phase: AtomicU8::new(Phase::Running as u8),
                root,
                admission,
                admission_finished,
                pool,
                tracker,
                report: OnceCell::new(),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.shared.phase.load(Ordering::Acquire))
    }

    /// `true` once shutdown has begun
    pub fn is_draining(&self) -> bool {
        self.phase() >= Phase::Draining
    }

    /// Commands currently holding an admission slot
    pub fn in_flight(&self) -> usize {
        self.shared.pool.in_use()
    }

    /// Resolves when the admission loop has exited, either because the
    /// inbound source ran dry or because shutdown stopped it
    pub async fn closed(&self) {
        self.shared.admission_finished.cancelled().await;
    }

    /// Stop admitting, cancel in-flight work and wait up to `grace` for it
    ///
    /// Safe to call any number of times from any clone. Later and
    /// concurrent callers wait for and receive the first call's report.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        *self.shared.report.get_or_init(|| self.drain(grace)).await
    }

    async fn drain(&self, grace: Duration) -> ShutdownReport {
        let shared = &self.shared;
        let started = Instant::now();
        let deadline = started + grace;

        self.advance(Phase::Draining);
        tracing::info!(in_flight = self.in_flight(), grace = ?grace, "shutting down dispatcher");

        shared.admission.cancel();
        shared.root.cancel();

        if tokio::time::timeout_at(deadline, shared.admission_finished.cancelled())
            .await
            .is_err()
        {
            tracing::warn!("admission loop did not stop within the grace period");
        }

        shared.tracker.close();
        let drained = tokio::time::timeout_at(deadline, shared.tracker.wait()).await.is_ok();
        let outstanding = shared.tracker.len();

        shared.pool.close();
        self.advance(Phase::Done);

        let report = ShutdownReport {
            drained,
            outstanding,
            elapsed: started.elapsed(),
        };

        if drained {
            tracing::info!(elapsed = ?report.elapsed, "dispatcher drained");
        } else {
            tracing::warn!(outstanding, elapsed = ?report.elapsed, "grace period expired with commands still running");
        }

        report
    }

    fn advance(&self, phase: Phase) {
        self.shared.phase.fetch_max(phase as u8, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("phase", &self.phase())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
