//! The synchronized store.
//!
//! All collections live in one [`Snapshot`] behind a watch channel. The
//! snapshot changes in exactly three ways, each a single `send_modify`:
//!
//! * [`SyncStore::refresh`] replaces every collection that fetched
//!   successfully, together with the connection state.
//! * Mutation helpers (see `actions`) patch entities after a confirmed write.
//! * [`SyncStore::apply_change`] merges one realtime event.
//!
//! Readers therefore never observe a half-applied refresh. When two refreshes
//! overlap, the one that commits last wins as a whole, except that a ticket
//! patched after a refresh started its reads keeps the patch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use mecanica_core::{
    resolve_roles, ActivityLogEntry, Backend, BackendError, BlobStore, ChatMessage, Collection,
    ConnectionState, ConnectionStatus, DataStats, Identity, JobRole, Machine, Normalize, Query,
    Record, Roster, SectorGroup, Ticket, TicketStatus, Warehouse, DEFAULT_ROLE,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::merge::{self, Change, MergeOrder};
use crate::notify::{Notification, Notifier};
use crate::session::AuthState;

/// Display name used when the caller's own profile row is not visible.
const SELF_FALLBACK_NAME: &str = "Eu";

/// Everything the client currently knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tickets: Vec<Ticket>,
    pub users: Vec<Identity>,
    pub messages: Vec<ChatMessage>,
    pub machines: Vec<Machine>,
    /// Newest first, capped.
    pub activity_logs: Vec<ActivityLogEntry>,
    pub warehouses: Vec<Warehouse>,
    pub groups: Vec<SectorGroup>,
    pub job_roles: Vec<JobRole>,
    pub connection: ConnectionState,
    /// Tickets carrying a local patch not yet confirmed by a refresh or a
    /// realtime event.
    pub pending: HashSet<String>,
    /// Write sequence number of each pending patch.
    #[serde(skip)]
    patched: HashMap<String, u64>,
}

impl Snapshot {
    pub fn ticket(&self, id: &str) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.id == id)
    }

    pub fn user(&self, id: &str) -> Option<&Identity> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn roster(&self) -> Roster<'_> {
        Roster::new(&self.users)
    }

    pub fn is_pending(&self, ticket_id: &str) -> bool {
        self.pending.contains(ticket_id)
    }

    /// Messages exchanged between two users, oldest first.
    pub fn conversation(&self, a: &str, b: &str) -> Vec<&ChatMessage> {
        let mut messages: Vec<&ChatMessage> = self
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
            })
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    pub fn unread_count(&self, user_id: &str) -> usize {
        self.messages.iter().filter(|m| m.is_unread_for(user_id)).count()
    }

    pub fn open_ticket_count(&self) -> usize {
        self.tickets
            .iter()
            .filter(|t| t.status == TicketStatus::Open)
            .count()
    }

    /// A ticket the user is currently working on, if any.
    pub fn active_ticket_for(&self, user_id: &str) -> Option<&Ticket> {
        self.tickets
            .iter()
            .find(|t| t.status == TicketStatus::InProgress && t.involves(user_id))
    }

    fn stats(&self) -> DataStats {
        DataStats {
            tickets: self.tickets.len(),
            users: self.users.len(),
            messages: self.messages.len(),
            machines: self.machines.len(),
            activity_logs: self.activity_logs.len(),
        }
    }

    /// Recompute the fields derived from the roster.
    fn annotate(&mut self) {
        let roster = Roster::new(&self.users);
        for ticket in &mut self.tickets {
            annotate_ticket(ticket, &roster);
        }
        for entry in &mut self.activity_logs {
            annotate_log(entry, &roster);
        }
    }
}

/// Fill a ticket's mechanic name from the roster.
pub(crate) fn annotate_ticket(ticket: &mut Ticket, roster: &Roster<'_>) {
    if let Some(name) = ticket.mechanic_id.as_deref().and_then(|id| roster.name_of(id)) {
        ticket.mechanic_name = Some(name.to_string());
    }
}

/// Take a log entry's actor name and role from the roster when known.
///
/// Returns false when the actor is not in the roster.
pub(crate) fn annotate_log(entry: &mut ActivityLogEntry, roster: &Roster<'_>) -> bool {
    match roster.get(&entry.user_id) {
        Some(user) => {
            entry.user_name = user.name.clone();
            entry.user_role = user.role.clone();
            true
        }
        None => false,
    }
}

fn fallback_entry(identity: &Identity) -> Identity {
    let mut entry = identity.clone();
    if entry.role.trim().is_empty() {
        entry.role = DEFAULT_ROLE.to_string();
    }
    if entry.name.trim().is_empty() {
        entry.name = SELF_FALLBACK_NAME.to_string();
    }
    entry
}

/// One change to merge into the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Ticket(Change<Ticket>),
    Message(Change<ChatMessage>),
    ActivityLog(Change<ActivityLogEntry>),
}

/// Outcome of a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub committed: Vec<Collection>,
    pub failed: Vec<Collection>,
    /// The caller's own profile was missing and a fallback entry was added.
    pub synthesized_self: bool,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Settle one fetch: `Some(rows)` on success, otherwise record the failure.
fn settle(
    collection: Collection,
    result: std::result::Result<Vec<Record>, BackendError>,
    failed: &mut Vec<Collection>,
) -> Option<Vec<Record>> {
    match result {
        Ok(rows) => {
            debug!(collection = %collection, rows = rows.len(), "Fetched");
            Some(rows)
        }
        Err(e) => {
            if e.is_cancelled() {
                debug!(collection = %collection, "Fetch cancelled");
            } else {
                error!(collection = %collection, "Fetch failed: {}", e);
            }
            failed.push(collection);
            None
        }
    }
}

/// The client-side cache of every collection.
pub struct SyncStore {
    backend: Arc<dyn Backend>,
    blobs: Option<Arc<dyn BlobStore>>,
    auth: watch::Receiver<AuthState>,
    config: SyncConfig,
    snapshot: watch::Sender<Snapshot>,
    notifier: Notifier,
    /// Count of local ticket patches, used to order them against refreshes.
    writes: AtomicU64,
}

impl SyncStore {
    /// Create an empty store. `auth` is the session tracker's state channel.
    pub fn new(
        backend: Arc<dyn Backend>,
        auth: watch::Receiver<AuthState>,
        config: SyncConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(Snapshot::default());
        let notifier = Notifier::new(config.notification_ttl);
        Self {
            backend,
            blobs: None,
            auth,
            config,
            snapshot,
            notifier,
            writes: AtomicU64::new(0),
        }
    }

    /// Enable attachment uploads.
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Read the current snapshot without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        f(&self.snapshot.borrow())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) fn blobs(&self) -> Option<&dyn BlobStore> {
        self.blobs.as_deref()
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub(crate) fn modify(&self, f: impl FnOnce(&mut Snapshot)) {
        self.snapshot.send_modify(|snapshot| {
            f(snapshot);
            snapshot.connection.counts = snapshot.stats();
        });
    }

    /// The signed-in identity, if any.
    pub fn identity(&self) -> Option<Identity> {
        self.auth.borrow().identity().cloned()
    }

    pub(crate) fn require_identity(&self) -> Result<Identity> {
        self.identity().ok_or(SyncError::NotAuthenticated)
    }

    /// Fetch every collection concurrently and commit what succeeded.
    ///
    /// Failed collections keep their previous contents and are listed in one
    /// error notification. When everything fails nothing is committed.
    pub async fn refresh(&self) -> RefreshReport {
        self.snapshot
            .send_modify(|s| s.connection.status = ConnectionStatus::Loading);
        debug!("Refreshing all collections");

        let started = self.writes.load(Ordering::SeqCst);
        let backend = self.backend.as_ref();
        let all = Query::new();
        let by_time = Query::new().order_by("timestamp", false);
        let newest_logs = Query::new()
            .order_by("timestamp", true)
            .limit(self.config.activity_log_limit);

        let (tickets, profiles, messages, machines, logs, warehouses, groups, job_roles) = futures::join!(
            backend.fetch_collection(Collection::Tickets, &all),
            backend.fetch_collection(Collection::Profiles, &all),
            backend.fetch_collection(Collection::Messages, &by_time),
            backend.fetch_collection(Collection::Machines, &all),
            backend.fetch_collection(Collection::ActivityLogs, &newest_logs),
            backend.fetch_collection(Collection::Warehouses, &all),
            backend.fetch_collection(Collection::SectorGroups, &all),
            backend.fetch_collection(Collection::JobRoles, &all),
        );

        let mut failed = Vec::new();
        let tickets = settle(Collection::Tickets, tickets, &mut failed)
            .map(|rows| Ticket::normalize_all(&rows));
        let users = settle(Collection::Profiles, profiles, &mut failed)
            .map(|rows| Identity::normalize_all(&rows));
        let messages = settle(Collection::Messages, messages, &mut failed)
            .map(|rows| ChatMessage::normalize_all(&rows));
        let machines = settle(Collection::Machines, machines, &mut failed)
            .map(|rows| Machine::normalize_all(&rows));
        let logs = settle(Collection::ActivityLogs, logs, &mut failed)
            .map(|rows| ActivityLogEntry::normalize_all(&rows));
        let warehouses = settle(Collection::Warehouses, warehouses, &mut failed)
            .map(|rows| Warehouse::normalize_all(&rows));
        let groups = settle(Collection::SectorGroups, groups, &mut failed)
            .map(|rows| SectorGroup::normalize_all(&rows));
        let job_roles = settle(Collection::JobRoles, job_roles, &mut failed)
            .map(|rows| JobRole::normalize_all(&rows));

        let committed: Vec<Collection> = Collection::ALL
            .into_iter()
            .filter(|c| !failed.contains(c))
            .collect();
        let mut report = RefreshReport {
            committed,
            failed,
            synthesized_self: false,
        };

        if report.committed.is_empty() {
            error!("Refresh failed for every collection, keeping previous state");
            let failed = report.failed.clone();
            self.snapshot.send_modify(|s| {
                s.connection.status = ConnectionStatus::Error;
                s.connection.failed = failed;
            });
            self.notifier
                .error("Erro crítico de conexão: nenhum dado pôde ser carregado.");
            return report;
        }

        let identity = self.identity();
        let failed = report.failed.clone();
        let log_cap = self.config.activity_log_limit;
        let mut synthesized_self = false;

        self.snapshot.send_modify(|s| {
            if let Some(job_roles) = job_roles {
                s.job_roles = job_roles;
            }
            if let Some(users) = users {
                s.users = users;
                if let Some(identity) = &identity {
                    if !s.users.iter().any(|u| u.id == identity.id) {
                        s.users.push(fallback_entry(identity));
                        synthesized_self = true;
                    }
                }
            }
            resolve_roles(&mut s.users, &s.job_roles);

            if let Some(mut tickets) = tickets {
                // Patches confirmed after the reads began are newer than them.
                let newer: Vec<Ticket> = s
                    .tickets
                    .iter()
                    .filter(|t| s.patched.get(&t.id).is_some_and(|seq| *seq > started))
                    .cloned()
                    .collect();
                s.patched.retain(|_, seq| *seq > started);
                s.pending.retain(|id| s.patched.contains_key(id));
                for ticket in newer {
                    match tickets.iter_mut().find(|t| t.id == ticket.id) {
                        Some(slot) => *slot = ticket,
                        None => tickets.push(ticket),
                    }
                }
                s.tickets = tickets;
            }
            if let Some(messages) = messages {
                s.messages = messages;
            }
            if let Some(machines) = machines {
                s.machines = machines;
            }
            if let Some(mut logs) = logs {
                logs.truncate(log_cap);
                s.activity_logs = logs;
            }
            if let Some(warehouses) = warehouses {
                s.warehouses = warehouses;
            }
            if let Some(groups) = groups {
                s.groups = groups;
            }
            s.annotate();

            s.connection = ConnectionState {
                status: if failed.is_empty() {
                    ConnectionStatus::Online
                } else {
                    ConnectionStatus::Error
                },
                last_sync: Some(Utc::now()),
                counts: s.stats(),
                failed,
            };
        });
        report.synthesized_self = synthesized_self;

        if synthesized_self {
            warn!(
                "Own profile missing from roster, row-level authorization is probably filtering profiles"
            );
        }
        if report.failed.is_empty() {
            info!(collections = report.committed.len(), "Refresh complete");
        } else {
            let labels: Vec<&str> = report.failed.iter().map(Collection::label).collect();
            self.notifier
                .error(format!("Erro ao carregar dados: {}", labels.join(", ")));
        }

        report
    }

    /// Merge one change into the store.
    ///
    /// A ticket change also confirms any pending local patch for that ticket.
    pub fn apply_change(&self, change: StoreChange) {
        let log_cap = self.config.activity_log_limit;
        self.modify(|s| match change {
            StoreChange::Ticket(change) => {
                let change = match change {
                    Change::Insert(mut ticket) => {
                        annotate_ticket(&mut ticket, &s.roster());
                        Change::Insert(ticket)
                    }
                    Change::Update(mut ticket) => {
                        annotate_ticket(&mut ticket, &s.roster());
                        Change::Update(ticket)
                    }
                    delete => delete,
                };
                s.pending.remove(change.key());
                s.patched.remove(change.key());
                let tickets = std::mem::take(&mut s.tickets);
                s.tickets = merge::apply(tickets, change, MergeOrder::Append);
            }
            StoreChange::Message(change) => {
                let messages = std::mem::take(&mut s.messages);
                s.messages = merge::apply(messages, change, MergeOrder::Append);
            }
            StoreChange::ActivityLog(change) => {
                let logs = std::mem::take(&mut s.activity_logs);
                s.activity_logs = merge::apply(
                    logs,
                    change,
                    MergeOrder::NewestFirst { cap: Some(log_cap) },
                );
            }
        });
    }

    /// Apply a confirmed local patch to a ticket and mark it pending.
    pub(crate) fn patch_ticket(&self, id: &str, patch: impl FnOnce(&mut Ticket)) {
        let seq = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.modify(|s| {
            let Snapshot {
                tickets,
                users,
                pending,
                patched,
                ..
            } = s;
            if let Some(ticket) = tickets.iter_mut().find(|t| t.id == id) {
                patch(ticket);
                annotate_ticket(ticket, &Roster::new(users));
                pending.insert(id.to_string());
                patched.insert(id.to_string(), seq);
            }
        });
    }
}
