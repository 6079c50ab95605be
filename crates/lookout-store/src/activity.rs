//! Telemetry history: one `activities` row per report plus deduplicated
//! browser history.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use lookout_core::{BroadcasterId, InstallationId, TelemetryReport};

use crate::database::Database;
use crate::error::StoreError;

/// One stored browser visit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserHistoryRow {
    /// Browser name.
    pub browser: Option<String>,
    /// Visited URL.
    pub url: String,
    /// Page title.
    pub title: Option<String>,
    /// Client-reported visit time.
    pub visit_time: String,
}

/// What a `record` call wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    /// New browser history rows (duplicates excluded).
    pub history_inserted: usize,
    /// History entries skipped as already stored.
    pub history_duplicates: usize,
}

/// Fixed-width UTC timestamp so text comparison matches time order.
fn sortable(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Access to `activities` and `browser_history`.
pub struct ActivityRepo {
    db: Database,
}

impl ActivityRepo {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist one telemetry report.
    #[instrument(skip(self, report), fields(broadcaster_id = %broadcaster))]
    pub fn record(
        &self,
        broadcaster: &BroadcasterId,
        installation: Option<&InstallationId>,
        report: &TelemetryReport,
        received_at: DateTime<Utc>,
    ) -> Result<RecordOutcome, StoreError> {
        let mut summary = report.clone();
        summary.browser_history.clear();
        let payload = serde_json::to_string(&summary)?;
        let reported_at = sortable(received_at);

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let _ = tx.execute(
                "INSERT INTO activities
                 (broadcaster_id, installation_id, host, active_url, idle_seconds, is_idle, payload, reported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    broadcaster.as_str(),
                    installation.map(InstallationId::as_str),
                    report.host,
                    report.active_url,
                    report.idle_seconds,
                    report.idle(),
                    payload,
                    reported_at,
                ],
            )?;

            let mut outcome = RecordOutcome::default();
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO browser_history
                     (broadcaster_id, browser, url, title, visit_time, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (broadcaster_id, visit_time, url) DO NOTHING",
                )?;
                for visit in &report.browser_history {
                    let visit_time = visit.visit_time.clone().unwrap_or_else(|| reported_at.clone());
                    let n = stmt.execute(rusqlite::params![
                        broadcaster.as_str(),
                        visit.browser,
                        visit.url,
                        visit.title,
                        visit_time,
                        reported_at,
                    ])?;
                    if n > 0 {
                        outcome.history_inserted += 1;
                    } else {
                        outcome.history_duplicates += 1;
                    }
                }
            }
            tx.commit()?;
            debug!(
                inserted = outcome.history_inserted,
                duplicates = outcome.history_duplicates,
                "telemetry stored"
            );
            Ok(outcome)
        })
    }

    /// Delete activities and history older than `days`.
    ///
    /// Returns the number of rows removed.
    #[instrument(skip(self))]
    pub fn prune_older_than(&self, days: u32, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = sortable(now - Duration::days(i64::from(days)));
        self.db.with_conn(|conn| {
            let a = conn.execute("DELETE FROM activities WHERE reported_at < ?1", [&cutoff])?;
            let h = conn.execute("DELETE FROM browser_history WHERE recorded_at < ?1", [&cutoff])?;
            Ok(a + h)
        })
    }

    /// Number of stored activity rows for a broadcaster.
    pub fn activity_count(&self, broadcaster: &BroadcasterId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM activities WHERE broadcaster_id = ?1",
                [broadcaster.as_str()],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
    }

    /// Most recent browser history for a broadcaster.
    pub fn history(
        &self,
        broadcaster: &BroadcasterId,
        limit: usize,
    ) -> Result<Vec<BrowserHistoryRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT browser, url, title, visit_time FROM browser_history
                 WHERE broadcaster_id = ?1 ORDER BY visit_time DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![broadcaster.as_str(), i64::try_from(limit).unwrap_or(i64::MAX)],
                    |row| {
                        Ok(BrowserHistoryRow {
                            browser: row.get(0)?,
                            url: row.get(1)?,
                            title: row.get(2)?,
                            visit_time: row.get(3)?,
                        })
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
