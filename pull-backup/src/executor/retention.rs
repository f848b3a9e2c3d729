//! Age-based snapshot retention.

use crate::snapshot::SnapshotStore;
use crate::SweepError;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Names of the snapshots deleted, oldest first.
    pub deleted: Vec<String>,
    /// Snapshots inside the window.
    pub kept: usize,
    pub errors: Vec<SweepError>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Age of a snapshot in whole days at `now`.
///
/// A snapshot is dated at midnight, so the floored day count is the
/// difference between the calendar dates.
pub fn snapshot_age_days(date: NaiveDate, now: NaiveDateTime) -> i64 {
    now.date().signed_duration_since(date).num_days()
}

/// Strictly older than the window: a snapshot exactly `retention_days` old
/// is kept.
pub fn is_expired(date: NaiveDate, now: NaiveDateTime, retention_days: u32) -> bool {
    snapshot_age_days(date, now) > i64::from(retention_days)
}

/// Delete every snapshot older than the retention window.
///
/// Best effort: a failed deletion is recorded and the sweep moves on.
/// Entries whose names are not snapshot dates are never looked at.
pub fn sweep<S: SnapshotStore + ?Sized>(
    store: &mut S,
    retention_days: u32,
    now: NaiveDateTime,
) -> SweepReport {
    let mut report = SweepReport::default();

    info!(retention_days, "Removing snapshots older than the retention window");

    let snapshots = match store.list_snapshots() {
        Ok(snapshots) => snapshots,
        Err(e) => {
            warn!(root = %store.root().display(), "Cannot list snapshots for retention: {}", e);
            report.errors.push(SweepError {
                name: store.root().display().to_string(),
                source: e,
            });
            return report;
        }
    };

    for snapshot in snapshots {
        let age_days = snapshot_age_days(snapshot.date, now);
        if !is_expired(snapshot.date, now, retention_days) {
            report.kept += 1;
            continue;
        }

        info!(
            snapshot = %snapshot.name,
            age_days,
            complete = snapshot.complete,
            "Deleting expired snapshot"
        );
        match store.delete_snapshot(&snapshot.name) {
            Ok(()) => report.deleted.push(snapshot.name),
            Err(e) => {
                warn!(snapshot = %snapshot.name, "Failed to delete expired snapshot: {}", e);
                report.errors.push(SweepError {
                    name: snapshot.name,
                    source: e,
                });
            }
        }
    }

    info!(
        deleted = report.deleted.len(),
        kept = report.kept,
        failed = report.errors.len(),
        "Retention sweep finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemoryStore;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 30, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_age_is_floored_to_whole_days() {
        assert_eq!(snapshot_age_days(date(2025, 9, 3), at(2025, 9, 10, 0)), 7);
        assert_eq!(snapshot_age_days(date(2025, 9, 3), at(2025, 9, 10, 23)), 7);
        assert_eq!(snapshot_age_days(date(2025, 9, 10), at(2025, 9, 10, 12)), 0);
        assert_eq!(snapshot_age_days(date(2025, 9, 11), at(2025, 9, 10, 12)), -1);
    }

    #[test]
    fn test_window_boundary_is_strict() {
        let now = at(2025, 9, 10, 8);
        assert!(!is_expired(date(2025, 9, 3), now, 7));
        assert!(is_expired(date(2025, 9, 2), now, 7));
    }

    #[test]
    fn test_sweep_deletes_only_expired_snapshots() {
        let mut store = MemoryStore::new();
        for name in ["2025-09-01", "2025-09-02", "2025-09-03", "2025-09-10"] {
            store.add_directory(name);
        }
        store.add_directory("notes");
        store.set_pointer("2025-09-10");

        let report = sweep(&mut store, 7, at(2025, 9, 10, 8));

        assert_eq!(report.deleted, vec!["2025-09-01", "2025-09-02"]);
        assert_eq!(report.kept, 2);
        assert!(report.is_clean());
        assert!(store.contains("2025-09-03"));
        assert!(store.contains("notes"));
        assert_eq!(store.pointer_target(), Some("2025-09-10"));
    }

    #[test]
    fn test_sweep_continues_after_failed_deletion() {
        let mut store = MemoryStore::new();
        for name in ["2025-08-01", "2025-08-02", "2025-08-03"] {
            store.add_directory(name);
        }
        store.fail_delete("2025-08-02");

        let report = sweep(&mut store, 7, at(2025, 9, 10, 8));

        assert_eq!(report.deleted, vec!["2025-08-01", "2025-08-03"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].name, "2025-08-02");
        assert!(store.contains("2025-08-02"));
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let mut store = MemoryStore::new();
        for name in ["2025-08-01", "2025-09-09"] {
            store.add_directory(name);
        }
        let now = at(2025, 9, 10, 8);

        let first = sweep(&mut store, 7, now);
        assert_eq!(first.deleted.len(), 1);

        let second = sweep(&mut store, 7, now);
        assert!(second.deleted.is_empty());
        assert_eq!(second.kept, 1);
    }
}
