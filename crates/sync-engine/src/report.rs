//! Productivity and activity reports.
//!
//! Both reports cover a [`ReportPeriod`]. Ticket productivity is computed
//! from the snapshot alone; the activity report reads `activity_logs` by date
//! range, since the store only keeps the newest entries.
//!
//! Days are calendar days in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, SecondsFormat, Utc};
use mecanica_core::{ActivityLogEntry, Collection, Identity, Normalize, Query, Ticket, TicketStatus};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::store::{annotate_log, Snapshot, SyncStore};

/// Most log entries an activity report returns.
pub const ACTIVITY_REPORT_LIMIT: usize = 1000;

/// Time window of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    /// From the start of the day `n` days ago until now.
    LastDays(u32),
    /// Whole days from `start` through `end`. Unbounded when either is
    /// missing.
    Custom {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl Default for ReportPeriod {
    fn default() -> Self {
        ReportPeriod::LastDays(7)
    }
}

impl ReportPeriod {
    /// Concrete bounds as of `now`.
    pub fn range(&self, now: DateTime<Utc>) -> DateRange {
        match *self {
            ReportPeriod::LastDays(days) => DateRange {
                start: now
                    .date_naive()
                    .checked_sub_days(Days::new(u64::from(days)))
                    .map(start_of_day),
                end: now,
            },
            ReportPeriod::Custom {
                start: Some(start),
                end: Some(end),
            } => DateRange {
                start: Some(start_of_day(start)),
                end: end_of_day(end).unwrap_or(now),
            },
            ReportPeriod::Custom { .. } => DateRange { start: None, end: now },
        }
    }
}

impl FromStr for ReportPeriod {
    type Err = SyncError;

    /// `last-7`, `last-15`, `last-30` or `custom`. A custom period starts
    /// without dates; set them on the returned value.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "last-7" => Ok(ReportPeriod::LastDays(7)),
            "last-15" => Ok(ReportPeriod::LastDays(15)),
            "last-30" => Ok(ReportPeriod::LastDays(30)),
            "custom" => Ok(ReportPeriod::Custom {
                start: None,
                end: None,
            }),
            other => Err(SyncError::Validation(format!("Período inválido: {other}"))),
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportPeriod::LastDays(days) => write!(f, "Últimos {days} dias"),
            ReportPeriod::Custom {
                start: Some(start),
                end: Some(end),
            } => write!(f, "{} até {}", start.format("%d/%m/%Y"), end.format("%d/%m/%Y")),
            ReportPeriod::Custom { .. } => f.write_str("Todo o período"),
        }
    }
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_milli_opt(23, 59, 59, 999).map(|t| t.and_utc())
}

/// Inclusive time bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    /// `None` reaches back to the beginning.
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && at <= self.end
    }

    /// Add the bounds to a query on `field`.
    pub fn apply(&self, query: Query, field: &str) -> Query {
        let query = match self.start {
            Some(start) => query.gte(field, start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => query,
        };
        query.lte(field, self.end.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// One mechanic's share of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MechanicStats {
    pub id: String,
    pub name: String,
    /// Tickets in the period the mechanic holds or has worked on.
    pub tickets: usize,
    pub completed: usize,
    /// Seconds worked across those tickets.
    pub total_time_spent: u64,
    /// `total_time_spent` per completed ticket; `None` without completions.
    pub average_secs: Option<u64>,
}

/// Ticket counts for a period, overall and per mechanic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityReport {
    pub range: DateRange,
    /// Mechanic the report was narrowed to, if any.
    pub mechanic: Option<String>,
    /// Tickets opened in the period.
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub paused: usize,
    /// Active mechanics, most completions first.
    pub mechanics: Vec<MechanicStats>,
}

/// Whether a role names the mechanic role, in either spelling.
pub fn is_mechanic_role(role: &str) -> bool {
    matches!(role.trim().to_lowercase().as_str(), "mecanico" | "mecânico")
}

fn count(tickets: &[&Ticket], status: TicketStatus) -> usize {
    tickets.iter().filter(|t| t.status == status).count()
}

fn mechanic_stats(mechanic: &Identity, tickets: &[&Ticket]) -> MechanicStats {
    let theirs: Vec<&Ticket> = tickets
        .iter()
        .copied()
        .filter(|t| t.involves(&mechanic.id))
        .collect();
    let completed = count(&theirs, TicketStatus::Completed);
    let total_time_spent = theirs
        .iter()
        .fold(0u64, |acc, t| acc.saturating_add(t.total_time_spent));
    MechanicStats {
        id: mechanic.id.clone(),
        name: mechanic.name.clone(),
        tickets: theirs.len(),
        completed,
        total_time_spent,
        average_secs: (completed > 0).then(|| total_time_spent / completed as u64),
    }
}

impl Snapshot {
    /// Ticket productivity for tickets opened within `period`.
    ///
    /// With `mechanic` set, only tickets that mechanic holds or has worked
    /// on are counted. Tickets without a creation time fall outside every
    /// period.
    pub fn productivity(
        &self,
        period: ReportPeriod,
        mechanic: Option<&str>,
        now: DateTime<Utc>,
    ) -> ProductivityReport {
        let range = period.range(now);
        let tickets: Vec<&Ticket> = self
            .tickets
            .iter()
            .filter(|t| t.created_at.is_some_and(|at| range.contains(at)))
            .filter(|t| mechanic.map_or(true, |id| t.involves(id)))
            .collect();

        let mut mechanics: Vec<MechanicStats> = self
            .users
            .iter()
            .filter(|u| u.active && is_mechanic_role(&u.role))
            .map(|u| mechanic_stats(u, &tickets))
            .collect();
        mechanics.sort_by(|a, b| b.completed.cmp(&a.completed).then_with(|| a.name.cmp(&b.name)));

        ProductivityReport {
            range,
            mechanic: mechanic.map(str::to_string),
            total: tickets.len(),
            completed: count(&tickets, TicketStatus::Completed),
            in_progress: count(&tickets, TicketStatus::InProgress),
            paused: count(&tickets, TicketStatus::Paused),
            mechanics,
        }
    }
}

impl SyncStore {
    /// Activity-log entries within `range`, newest first, optionally for
    /// one user only.
    ///
    /// Actor names and roles come from the roster when the user is known.
    /// The store itself is not modified.
    pub async fn activity_report(
        &self,
        range: &DateRange,
        user_id: Option<&str>,
    ) -> Result<Vec<ActivityLogEntry>> {
        let result = async {
            self.require_identity()?;
            let mut query = range
                .apply(Query::new(), "timestamp")
                .order_by("timestamp", true)
                .limit(ACTIVITY_REPORT_LIMIT);
            if let Some(user_id) = user_id {
                query = query.eq("user_id", user_id);
            }

            let rows = self
                .backend()
                .fetch_collection(Collection::ActivityLogs, &query)
                .await?;
            let mut entries = ActivityLogEntry::normalize_all(&rows);
            self.read(|s| {
                let roster = s.roster();
                for entry in &mut entries {
                    annotate_log(entry, &roster);
                }
            });
            debug!(entries = entries.len(), "Activity report loaded");
            Ok::<_, SyncError>(entries)
        }
        .await;
        self.report_failure(result, "carregar relatório")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::session::AuthState;
    use chrono::TimeZone;
    use mock_backend::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_last_days_starts_at_midnight() {
        let now = at(2024, 5, 10, 15, 30, 0);
        let range = ReportPeriod::LastDays(7).range(now);
        assert_eq!(range.start, Some(at(2024, 5, 3, 0, 0, 0)));
        assert_eq!(range.end, now);

        assert!(range.contains(at(2024, 5, 3, 0, 0, 0)));
        assert!(!range.contains(at(2024, 5, 2, 23, 59, 59)));
        assert!(range.contains(now));
        assert!(!range.contains(at(2024, 5, 10, 15, 30, 1)));
    }

    #[test]
    fn test_custom_range_covers_whole_days() {
        let now = at(2024, 6, 1, 0, 0, 0);
        let range = ReportPeriod::Custom {
            start: Some(day(2024, 5, 1)),
            end: Some(day(2024, 5, 7)),
        }
        .range(now);
        assert!(range.contains(at(2024, 5, 1, 0, 0, 0)));
        assert!(range.contains(at(2024, 5, 7, 23, 59, 59)));
        assert!(!range.contains(at(2024, 5, 8, 0, 0, 0)));

        // Half a custom range means everything up to now.
        let open = ReportPeriod::Custom {
            start: Some(day(2024, 5, 1)),
            end: None,
        }
        .range(now);
        assert_eq!(open.start, None);
        assert!(open.contains(at(1999, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("last-15".parse::<ReportPeriod>().unwrap(), ReportPeriod::LastDays(15));
        assert!(matches!(
            "custom".parse::<ReportPeriod>().unwrap(),
            ReportPeriod::Custom { start: None, end: None }
        ));
        assert!("ontem".parse::<ReportPeriod>().is_err());
        assert_eq!(ReportPeriod::default().to_string(), "Últimos 7 dias");
    }

    #[test]
    fn test_range_query_bounds() {
        let range = ReportPeriod::Custom {
            start: Some(day(2024, 5, 1)),
            end: Some(day(2024, 5, 7)),
        }
        .range(Utc::now());
        let query = range.apply(Query::new(), "timestamp");
        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.filters[0].value, json!("2024-05-01T00:00:00.000Z"));
        assert_eq!(query.filters[1].value, json!("2024-05-07T23:59:59.999Z"));
    }

    fn snapshot() -> Snapshot {
        let users = vec![
            json!({ "id": "m1", "name": "Ana", "role": "mecanico", "active": true }),
            json!({ "id": "m2", "name": "Bruno", "role": "Mecânico", "active": true }),
            json!({ "id": "m3", "name": "Caio", "role": "mecanico", "active": false }),
            json!({ "id": "s1", "name": "Sara", "role": "Supervisor", "active": true }),
        ];
        let tickets = vec![
            // Bruno took over from Ana and finished it.
            json!({ "id": "t1", "status": "Concluído", "mecanico_id": "m2",
                    "mechanic_ids": ["m1", "m2"], "total_time_spent": 3600,
                    "created_at": "2024-05-08T09:00:00Z" }),
            json!({ "id": "t2", "status": "Concluído", "mecanico_id": "m1",
                    "mechanic_ids": ["m1"], "total_time_spent": 1800,
                    "created_at": "2024-05-09T09:00:00Z" }),
            json!({ "id": "t3", "status": "Pausado", "mecanico_id": "m1",
                    "total_time_spent": 600, "created_at": "2024-05-09T10:00:00Z" }),
            json!({ "id": "t4", "status": "Atendimento", "mecanico_id": "m2",
                    "created_at": "2024-05-10T08:00:00Z" }),
            json!({ "id": "t5", "status": "Em Aberto", "created_at": "2024-05-10T09:00:00Z" }),
            // Outside the last 7 days.
            json!({ "id": "t6", "status": "Concluído", "mecanico_id": "m1",
                    "total_time_spent": 99, "created_at": "2024-04-01T09:00:00Z" }),
            json!({ "id": "t7", "status": "Concluído", "mecanico_id": "m1" }),
        ];
        let to_records = |values: Vec<serde_json::Value>| -> Vec<_> {
            values.into_iter().map(mock_backend::record).collect()
        };
        let mut snapshot = Snapshot::default();
        snapshot.users = Identity::normalize_all(&to_records(users));
        snapshot.tickets = Ticket::normalize_all(&to_records(tickets));
        snapshot
    }

    #[test]
    fn test_productivity_totals() {
        let report = snapshot().productivity(
            ReportPeriod::LastDays(7),
            None,
            at(2024, 5, 10, 12, 0, 0),
        );
        assert_eq!(report.total, 5);
        assert_eq!(report.completed, 2);
        assert_eq!(report.in_progress, 1);
        assert_eq!(report.paused, 1);

        let names: Vec<&str> = report.mechanics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Bruno"]);

        // Ana worked on t1 with Bruno, so both are credited with it.
        let ana = &report.mechanics[0];
        assert_eq!((ana.tickets, ana.completed), (3, 2));
        assert_eq!(ana.total_time_spent, 6000);
        assert_eq!(ana.average_secs, Some(3000));

        let bruno = &report.mechanics[1];
        assert_eq!((bruno.tickets, bruno.completed), (2, 1));
        assert_eq!(bruno.average_secs, Some(3600));
    }

    #[test]
    fn test_productivity_for_one_mechanic() {
        let report = snapshot().productivity(
            ReportPeriod::LastDays(7),
            Some("m2"),
            at(2024, 5, 10, 12, 0, 0),
        );
        assert_eq!(report.mechanic.as_deref(), Some("m2"));
        assert_eq!(report.total, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.in_progress, 1);

        // Only the shared ticket counts for Ana here.
        let ana = report.mechanics.iter().find(|m| m.id == "m1").unwrap();
        assert_eq!((ana.tickets, ana.completed), (1, 1));
    }

    #[test]
    fn test_mechanic_without_completions_has_no_average() {
        let report = snapshot().productivity(
            ReportPeriod::Custom {
                start: Some(day(2024, 5, 10)),
                end: Some(day(2024, 5, 10)),
            },
            None,
            at(2024, 5, 10, 12, 0, 0),
        );
        let bruno = report.mechanics.iter().find(|m| m.id == "m2").unwrap();
        assert_eq!(bruno.tickets, 1);
        assert_eq!(bruno.average_secs, None);
    }

    #[tokio::test]
    async fn test_activity_report_by_range_and_user() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed(Collection::Profiles, [json!({ "id": "u2", "name": "Bruno", "role": "mecanico" })])
            .await;
        backend
            .seed(
                Collection::ActivityLogs,
                [
                    json!({ "id": "l1", "user_id": "u2", "user_name": "B.", "action": "a",
                            "timestamp": "2024-05-02T10:00:00Z" }),
                    json!({ "id": "l2", "user_id": "u3", "user_name": "Carla", "action": "b",
                            "timestamp": "2024-05-03T10:00:00Z" }),
                    json!({ "id": "l3", "user_id": "u2", "action": "c",
                            "timestamp": "2024-05-09T10:00:00Z" }),
                ],
            )
            .await;
        let me = Identity::placeholder("u1", Some("sara@fabrica.com"));
        let (_tx, rx) = watch::channel(AuthState::Authenticated {
            identity: me,
            enriched: true,
        });
        let store = SyncStore::new(backend, rx, SyncConfig::default());
        store.refresh().await;

        let range = ReportPeriod::Custom {
            start: Some(day(2024, 5, 1)),
            end: Some(day(2024, 5, 7)),
        }
        .range(Utc::now());

        let all = store.activity_report(&range, None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["l2", "l1"]);
        assert_eq!(all[0].user_name, "Carla");
        assert_eq!(all[1].user_name, "Bruno");

        let bruno = store.activity_report(&range, Some("u2")).await.unwrap();
        assert_eq!(bruno.len(), 1);
        assert_eq!(bruno[0].id, "l1");
    }
}
