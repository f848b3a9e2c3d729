//! Backup run executor - sequences one snapshot from start to retention.
//!
//! The run is linear with a single abort point:
//!
//! ```text
//! Start → ManifestFetched → DirectoryPrepared → TransferDecided
//!       → Transferred → PointerAdvanced → Swept → Done
//! ```
//!
//! Any failure up to and including the pointer update aborts the run.
//! Retention failures are reported in the result but never fail the run.

pub mod pointer;
pub mod resolver;
pub mod retention;

use crate::remote::ManifestFetcher;
use crate::snapshot::{snapshot_name, CompletionMarker, SnapshotStore};
use crate::transfer::{TransferOutcome, TransferRequest, TreeTransferer};
use crate::{BackupError, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use resolver::resolve_reference;
use retention::SweepReport;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use crate::snapshot::BackupKind;

/// Backup run configuration
#[derive(Debug, Clone)]
pub struct BackupJob {
    /// Host being backed up, as recorded in the completion marker.
    pub host: String,
    /// Transfer source handed to the engine.
    pub source: String,
    pub retention_days: u32,
    pub excludes: Vec<String>,
}

/// Backup execution result
#[derive(Debug)]
pub struct BackupResult {
    pub snapshot: String,
    pub date: NaiveDate,
    pub path: PathBuf,
    pub kind: BackupKind,
    pub reference: Option<PathBuf>,
    pub transfer: TransferOutcome,
    pub sweep: SweepReport,
    pub duration: Duration,
}

/// Phases of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunPhase {
    Start,
    ManifestFetched,
    DirectoryPrepared,
    TransferDecided,
    Transferred,
    PointerAdvanced,
    Swept,
    Done,
}

/// Main backup executor
pub struct BackupExecutor<S, F, T> {
    store: S,
    fetcher: F,
    transferer: T,
    cancel_token: CancellationToken,
    phase: RunPhase,
}

impl<S, F, T> BackupExecutor<S, F, T>
where
    S: SnapshotStore,
    F: ManifestFetcher,
    T: TreeTransferer,
{
    /// Create a new backup executor (no cancellation support)
    pub fn new(store: S, fetcher: F, transferer: T) -> Self {
        Self::with_cancel(store, fetcher, transferer, CancellationToken::new())
    }

    /// Create a new backup executor with cancellation support
    pub fn with_cancel(
        store: S,
        fetcher: F,
        transferer: T,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            fetcher,
            transferer,
            cancel_token,
            phase: RunPhase::Start,
        }
    }

    /// Last phase the most recent run reached.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn transferer(&self) -> &T {
        &self.transferer
    }

    /// Execute one backup run dated `now`.
    pub async fn execute(&mut self, job: &BackupJob, now: NaiveDateTime) -> Result<BackupResult> {
        let start_time = Instant::now();
        self.phase = RunPhase::Start;

        let name = snapshot_name(now.date());
        info!(snapshot = %name, host = %job.host, "Starting backup");

        let result = self.run_phases(job, now, &name).await;
        match &result {
            Ok(_) => self.enter(RunPhase::Done),
            Err(BackupError::Cancelled) => {
                warn!(snapshot = %name, phase = ?self.phase, "Backup cancelled");
            }
            Err(e) => {
                error!(snapshot = %name, phase = ?self.phase, "Backup failed: {}", e);
            }
        }

        result.map(|mut r| {
            r.duration = start_time.elapsed();
            info!(
                snapshot = %r.snapshot,
                kind = r.kind.as_str(),
                duration_secs = r.duration.as_secs(),
                expired = r.sweep.deleted.len(),
                sweep_errors = r.sweep.errors.len(),
                "Backup completed"
            );
            r
        })
    }

    async fn run_phases(
        &mut self,
        job: &BackupJob,
        now: NaiveDateTime,
        name: &str,
    ) -> Result<BackupResult> {
        self.check_cancelled()?;

        let manifest = self.fetcher.fetch(&self.cancel_token).await?;
        self.enter(RunPhase::ManifestFetched);

        let path = self.prepare_directory(name, &manifest)?;
        self.enter(RunPhase::DirectoryPrepared);

        let mode = resolve_reference(&self.store);
        if mode.reference() == Some(path.as_path()) {
            // Rewriting the snapshot `latest` targets: a failure must not
            // leave the pointer on a half-updated tree.
            pointer::retract(&mut self.store)?;
        }
        self.enter(RunPhase::TransferDecided);

        self.check_cancelled()?;
        let request = TransferRequest::for_snapshot(&job.source, &path, &mode, &job.excludes);
        let transfer = self.transferer.transfer(&request, &self.cancel_token).await?;
        self.mark_complete(name, now.date(), job, &request)?;
        self.enter(RunPhase::Transferred);

        pointer::advance(&mut self.store, name)?;
        self.enter(RunPhase::PointerAdvanced);

        let sweep = retention::sweep(&mut self.store, job.retention_days, now);
        for e in &sweep.errors {
            warn!("Retention: {}", e);
        }
        self.enter(RunPhase::Swept);

        Ok(BackupResult {
            snapshot: name.to_string(),
            date: now.date(),
            path,
            kind: request.kind(),
            reference: request.reference,
            transfer,
            sweep,
            duration: Duration::ZERO,
        })
    }

    /// Create (or reuse) the snapshot directory and store the manifest.
    /// A reused directory loses its completion marker until the new transfer
    /// succeeds.
    fn prepare_directory(&mut self, name: &str, manifest: &str) -> Result<PathBuf> {
        let prepare_error = |path: PathBuf| {
            move |source| BackupError::Prepare { path, source }
        };

        let path = self
            .store
            .create_snapshot_dir(name)
            .map_err(prepare_error(self.store.snapshot_path(name)))?;
        self.store
            .clear_completion_marker(name)
            .map_err(prepare_error(path.clone()))?;
        self.store
            .write_manifest(name, manifest)
            .map_err(prepare_error(path.clone()))?;

        info!(snapshot = %path.display(), manifest_bytes = manifest.len(), "Snapshot directory prepared");
        Ok(path)
    }

    fn mark_complete(
        &mut self,
        name: &str,
        date: NaiveDate,
        job: &BackupJob,
        request: &TransferRequest,
    ) -> Result<()> {
        let marker = CompletionMarker {
            date,
            kind: request.kind(),
            reference: request
                .reference
                .as_deref()
                .and_then(|r| r.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
            host: job.host.clone(),
            finished_at: Local::now(),
        };
        self.store
            .write_completion_marker(name, &marker)
            .map_err(|source| BackupError::Prepare {
                path: self.store.snapshot_path(name),
                source,
            })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        Ok(())
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(?phase, "Backup phase reached");
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeFetcher {
        fail: bool,
    }

    impl ManifestFetcher for FakeFetcher {
        fn host(&self) -> &str {
            "root@web1"
        }

        async fn fetch(&self, _cancel: &CancellationToken) -> Result<String> {
            if self.fail {
                return Err(BackupError::RemoteFetch {
                    host: "root@web1".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok("bash\tinstall\ncoreutils\tinstall\n".to_string())
        }
    }

    #[derive(Default)]
    struct FakeTransferer {
        fail: AtomicBool,
        requests: Mutex<Vec<TransferRequest>>,
    }

    impl FakeTransferer {
        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn last_request(&self) -> TransferRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl TreeTransferer for FakeTransferer {
        async fn transfer(
            &self,
            request: &TransferRequest,
            _cancel: &CancellationToken,
        ) -> Result<TransferOutcome> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackupError::Transfer {
                    destination: request.destination.clone(),
                    reason: "rsync exit status: 12".to_string(),
                });
            }
            Ok(TransferOutcome {
                summary: "ok".to_string(),
            })
        }
    }

    /// Simulates a shutdown signal arriving while the copy is running.
    struct InterruptedTransferer {
        shutdown: CancellationToken,
    }

    impl TreeTransferer for InterruptedTransferer {
        async fn transfer(
            &self,
            _request: &TransferRequest,
            cancel: &CancellationToken,
        ) -> Result<TransferOutcome> {
            self.shutdown.cancel();
            cancel.cancelled().await;
            Err(BackupError::Cancelled)
        }
    }

    fn job() -> BackupJob {
        BackupJob {
            host: "root@web1".to_string(),
            source: "root@web1:/".to_string(),
            retention_days: 7,
            excludes: vec!["/proc/*".to_string()],
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn executor() -> BackupExecutor<MemoryStore, FakeFetcher, FakeTransferer> {
        BackupExecutor::new(
            MemoryStore::new(),
            FakeFetcher { fail: false },
            FakeTransferer::default(),
        )
    }

    #[tokio::test]
    async fn test_first_run_is_full_and_creates_pointer() {
        let mut executor = executor();

        let result = executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap();

        assert_eq!(result.kind, BackupKind::Full);
        assert_eq!(result.snapshot, "2025-09-10");
        assert_eq!(result.path, PathBuf::from("/backups/2025-09-10"));
        assert_eq!(executor.phase(), RunPhase::Done);

        let store = executor.store();
        assert_eq!(store.pointer_target(), Some("2025-09-10"));
        assert!(store.is_complete("2025-09-10"));
        assert_eq!(
            store.manifest("2025-09-10"),
            Some("bash\tinstall\ncoreutils\tinstall\n")
        );
        assert_eq!(executor.transferer().last_request().reference, None);
    }

    #[tokio::test]
    async fn test_same_day_then_next_day() {
        let mut executor = executor();

        executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap();

        let second = executor.execute(&job(), at(2025, 9, 10, 14)).await.unwrap();
        assert_eq!(second.snapshot, "2025-09-10");
        assert_eq!(executor.store().pointer_target(), Some("2025-09-10"));
        assert_eq!(executor.store().list_snapshots().unwrap().len(), 1);
        // In-place update: no link reference to itself, recorded as full.
        assert_eq!(executor.transferer().last_request().reference, None);
        assert_eq!(second.kind, BackupKind::Full);
        assert_eq!(second.reference, None);
        let marker = executor
            .store()
            .read_completion_marker("2025-09-10")
            .unwrap()
            .unwrap();
        assert_eq!(marker.kind, BackupKind::Full);
        assert_eq!(marker.reference, None);

        let third = executor.execute(&job(), at(2025, 9, 11, 2)).await.unwrap();
        assert_eq!(third.kind, BackupKind::Incremental);
        assert_eq!(third.reference, Some(PathBuf::from("/backups/2025-09-10")));
        assert_eq!(
            executor.transferer().last_request().reference,
            Some(PathBuf::from("/backups/2025-09-10"))
        );
        assert_eq!(executor.store().pointer_target(), Some("2025-09-11"));
    }

    #[tokio::test]
    async fn test_pointer_tracks_every_successful_run() {
        let mut executor = executor();

        for day in 1..=12 {
            let result = executor.execute(&job(), at(2025, 9, day, 3)).await.unwrap();
            assert_eq!(executor.store().pointer_target(), Some(result.snapshot.as_str()));
        }

        // 7-day window on 2025-09-12 keeps 09-05 .. 09-12.
        let names: Vec<_> = executor
            .store()
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names.first().map(String::as_str), Some("2025-09-05"));
        assert_eq!(names.len(), 8);
    }

    #[tokio::test]
    async fn test_failed_transfer_leaves_pointer_unchanged() {
        let mut executor = executor();
        executor.execute(&job(), at(2025, 9, 9, 2)).await.unwrap();

        executor.transferer().set_failing(true);
        let err = executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap_err();

        assert!(matches!(err, BackupError::Transfer { .. }));
        assert_eq!(executor.phase(), RunPhase::TransferDecided);
        let store = executor.store();
        assert_eq!(store.pointer_target(), Some("2025-09-09"));
        // The partial snapshot stays on disk, unmarked.
        assert!(store.contains("2025-09-10"));
        assert!(!store.is_complete("2025-09-10"));
    }

    #[tokio::test]
    async fn test_failed_first_transfer_leaves_no_pointer() {
        let mut executor = executor();
        executor.transferer().set_failing(true);

        assert!(executor.execute(&job(), at(2025, 9, 10, 2)).await.is_err());
        assert_eq!(executor.store().pointer_target(), None);
    }

    #[tokio::test]
    async fn test_failed_same_day_rerun_retracts_pointer() {
        let mut executor = executor();
        executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap();

        executor.transferer().set_failing(true);
        assert!(executor.execute(&job(), at(2025, 9, 10, 14)).await.is_err());

        assert_eq!(executor.store().pointer_target(), None);
        assert!(!executor.store().is_complete("2025-09-10"));
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_before_directory() {
        let mut executor = BackupExecutor::new(
            MemoryStore::new(),
            FakeFetcher { fail: true },
            FakeTransferer::default(),
        );

        let err = executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap_err();

        assert!(matches!(err, BackupError::RemoteFetch { .. }));
        assert_eq!(executor.phase(), RunPhase::Start);
        assert!(!executor.store().contains("2025-09-10"));
        assert!(executor.transferer().requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pointer_failure_fails_run_and_skips_sweep() {
        let mut store = MemoryStore::new();
        store.add_directory("2025-08-01");
        store.fail_pointer_writes(true);
        let mut executor =
            BackupExecutor::new(store, FakeFetcher { fail: false }, FakeTransferer::default());

        let err = executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap_err();

        assert!(matches!(err, BackupError::Pointer { .. }));
        assert_eq!(executor.phase(), RunPhase::Transferred);
        // Data is complete on disk, just not "latest"; nothing was swept.
        assert!(executor.store().is_complete("2025-09-10"));
        assert!(executor.store().contains("2025-08-01"));
    }

    #[tokio::test]
    async fn test_sweep_errors_do_not_fail_the_run() {
        let mut store = MemoryStore::new();
        store.add_directory("2025-08-01");
        store.add_directory("2025-08-02");
        store.fail_delete("2025-08-01");
        let mut executor =
            BackupExecutor::new(store, FakeFetcher { fail: false }, FakeTransferer::default());

        let result = executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap();

        assert_eq!(result.sweep.deleted, vec!["2025-08-02"]);
        assert_eq!(result.sweep.errors.len(), 1);
        assert_eq!(executor.store().pointer_target(), Some("2025-09-10"));
    }

    #[tokio::test]
    async fn test_deleted_pointer_means_full_backup() {
        let mut executor = executor();
        executor.execute(&job(), at(2025, 9, 9, 2)).await.unwrap();

        executor.store_mut().remove_pointer().unwrap();
        let result = executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap();

        assert_eq!(result.kind, BackupKind::Full);
        assert_eq!(executor.transferer().last_request().reference, None);
        assert!(executor.store().contains("2025-09-09"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut executor = BackupExecutor::with_cancel(
            MemoryStore::new(),
            FakeFetcher { fail: false },
            FakeTransferer::default(),
            cancel,
        );

        let err = executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap_err();
        assert!(matches!(err, BackupError::Cancelled));
        assert!(!executor.store().contains("2025-09-10"));
    }

    #[tokio::test]
    async fn test_cancel_during_transfer_keeps_pointer() {
        let mut store = MemoryStore::new();
        store.add_directory("2025-09-09");
        store.set_pointer("2025-09-09");
        let shutdown = CancellationToken::new();
        let mut executor = BackupExecutor::with_cancel(
            store,
            FakeFetcher { fail: false },
            InterruptedTransferer {
                shutdown: shutdown.clone(),
            },
            shutdown,
        );

        let err = executor.execute(&job(), at(2025, 9, 10, 2)).await.unwrap_err();

        assert!(matches!(err, BackupError::Cancelled));
        assert_eq!(executor.phase(), RunPhase::TransferDecided);
        let store = executor.store();
        assert_eq!(store.pointer_target(), Some("2025-09-09"));
        assert!(store.contains("2025-09-10"));
        assert!(!store.is_complete("2025-09-10"));
        assert!(store.contains("2025-09-09"));
    }
}
