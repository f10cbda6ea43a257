//! Mutation helpers.
//!
//! Every helper writes remotely first. On failure it publishes a notification
//! and leaves the store untouched. On success it either patches the store
//! from the confirmed row or runs a full refresh. Ticket lifecycle changes
//! also append one activity-log row.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mecanica_core::attachment::{self, classify};
use mecanica_core::{
    record_id, ActivityLogEntry, Attachment, BackendError, ChatMessage, Collection, Identity,
    JobRole, Machine, MessageKind, Normalize, Query, Record, SectorGroup, Ticket, TicketPriority,
    TicketStatus, Warehouse,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity::{log_row, TicketAction};
use crate::error::{Result, SyncError};
use crate::merge::Change;
use crate::store::{StoreChange, SyncStore};

/// Prefix of identifiers minted locally for config entities not yet stored.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Fields of a ticket being opened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTicket {
    pub title: String,
    pub requester: String,
    pub warehouse: Option<String>,
    pub group: Option<String>,
    pub handled_by: Option<String>,
    pub sector: String,
    pub machine_id: Option<String>,
    pub priority: TicketPriority,
    pub description: String,
    pub machine_category: Option<String>,
    pub operator: Option<String>,
}

impl NewTicket {
    fn into_row(self, id: &str, created_by: &str, now: DateTime<Utc>) -> Record {
        let mut row = Record::new();
        row.insert("id".into(), json!(id));
        row.insert("title".into(), json!(self.title));
        row.insert("requester".into(), json!(self.requester));
        row.insert("galpao".into(), json!(self.warehouse));
        row.insert("grupo".into(), json!(self.group));
        row.insert("manuseado_por".into(), json!(self.handled_by));
        row.insert("sector".into(), json!(self.sector));
        row.insert("machine_id".into(), json!(self.machine_id));
        row.insert("status".into(), json!(TicketStatus::Open.as_str()));
        row.insert("priority".into(), json!(self.priority.as_str()));
        row.insert("description".into(), json!(self.description));
        row.insert("machine_category".into(), json!(self.machine_category));
        row.insert("operator".into(), json!(self.operator));
        row.insert("created_at".into(), json!(now.to_rfc3339()));
        row.insert("created_by".into(), json!(created_by));
        row
    }
}

/// Changes to an existing ticket. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TicketPriority>,
    pub sector: Option<String>,
    pub machine_id: Option<String>,
    /// Administrative status override, not checked against the lifecycle.
    pub status: Option<TicketStatus>,
}

impl TicketEdit {
    /// Patch of the fields that differ from `ticket`, and the action to log.
    fn diff(&self, ticket: &Ticket) -> (Record, Option<TicketAction>) {
        let mut row = Record::new();
        if let Some(title) = self.title.as_ref().filter(|t| **t != ticket.title) {
            row.insert("title".into(), json!(title));
        }
        if let Some(description) = self.description.as_ref().filter(|d| **d != ticket.description) {
            row.insert("description".into(), json!(description));
        }
        if let Some(priority) = self.priority.filter(|p| *p != ticket.priority) {
            row.insert("priority".into(), json!(priority.as_str()));
        }
        if let Some(sector) = self.sector.as_ref().filter(|s| **s != ticket.sector) {
            row.insert("sector".into(), json!(sector));
        }
        if let Some(machine_id) = self
            .machine_id
            .as_ref()
            .filter(|m| ticket.machine_id.as_ref() != Some(*m))
        {
            row.insert("machine_id".into(), json!(machine_id));
        }

        let status_change = self.status.filter(|to| *to != ticket.status);
        if let Some(to) = status_change {
            row.insert("status".into(), json!(to.as_str()));
        }

        let action = match status_change {
            Some(to) => Some(TicketAction::StatusChange {
                from: ticket.status,
                to,
            }),
            None if !row.is_empty() => Some(TicketAction::Edit),
            None => None,
        };
        (row, action)
    }
}

/// A chat message to send: text or one attachment, never both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachment: None,
        }
    }

    pub fn attachment(attachment: Attachment) -> Self {
        Self {
            text: None,
            attachment: Some(attachment),
        }
    }
}

fn patch(fields: Value) -> Record {
    match fields {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

/// Map a filtered single-row write onto the store's permission error.
fn single_row_error(e: BackendError, collection: Collection, id: &str) -> SyncError {
    match e {
        BackendError::PermissionDenied(_) => SyncError::PermissionDenied {
            collection,
            id: id.to_string(),
        },
        other => SyncError::Backend(other),
    }
}

fn is_config(collection: Collection) -> bool {
    matches!(
        collection,
        Collection::Machines
            | Collection::SectorGroups
            | Collection::Warehouses
            | Collection::JobRoles
    )
}

impl SyncStore {
    /// Publish the outcome of an operation and pass it through.
    fn report<T>(&self, result: Result<T>, context: &str, success: &str) -> Result<T> {
        let result = self.report_failure(result, context);
        if result.is_ok() {
            self.notifier().success(success);
        }
        result
    }

    /// Like [`report`](Self::report) for operations without a success toast.
    pub(crate) fn report_failure<T>(&self, result: Result<T>, context: &str) -> Result<T> {
        match &result {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => debug!("{} cancelled", context),
            Err(e) => {
                error!("Failed to {}: {}", context, e);
                self.notifier().failure(e, context);
            }
        }
        result
    }

    /// Append one activity-log row and merge it locally.
    ///
    /// The primary write already succeeded, so a failure here is logged only.
    async fn log_activity(
        &self,
        actor: &Identity,
        action: &TicketAction,
        ticket_id: &str,
        details: Option<String>,
        at: DateTime<Utc>,
    ) {
        let row = log_row(actor, action, ticket_id, details, at);
        match self.backend().insert(Collection::ActivityLogs, row).await {
            Ok(stored) => {
                let entry = ActivityLogEntry::normalize(&stored);
                self.apply_change(StoreChange::ActivityLog(Change::Insert(entry)));
            }
            Err(e) => warn!(
                ticket = %ticket_id,
                action = action.kind(),
                "Activity log write failed: {}",
                e
            ),
        }
    }

    /// Validate a transition, write the patch, log the action and patch the
    /// store from the confirmed row.
    async fn transition(
        &self,
        id: &str,
        to: TicketStatus,
        build: impl FnOnce(&Ticket, &Identity, DateTime<Utc>) -> (Record, TicketAction, Option<String>),
    ) -> Result<Ticket> {
        let actor = self.require_identity()?;
        let ticket = self
            .read(|s| s.ticket(id).cloned())
            .ok_or_else(|| SyncError::NotFound {
                entity: "ticket",
                id: id.to_string(),
            })?;
        if !ticket.status.can_transition_to(to) {
            return Err(SyncError::InvalidTransition {
                from: ticket.status,
                to,
            });
        }

        let now = Utc::now();
        let (fields, action, details) = build(&ticket, &actor, now);
        let row = self
            .backend()
            .update(Collection::Tickets, id, fields)
            .await
            .map_err(|e| single_row_error(e, Collection::Tickets, id))?;

        let confirmed = Ticket::normalize(&row);
        info!(ticket = %id, status = %confirmed.status, "Ticket updated");
        let patched = confirmed.clone();
        self.patch_ticket(id, move |t| *t = patched);
        self.log_activity(&actor, &action, id, details, now).await;
        Ok(confirmed)
    }

    /// Take a ticket: status to in progress, assigned to the caller.
    pub async fn accept_ticket(&self, id: &str) -> Result<Ticket> {
        let result = self
            .transition(id, TicketStatus::InProgress, |ticket, actor, now| {
                let mut mechanic_ids = ticket.mechanic_ids.clone();
                if !mechanic_ids.contains(&actor.id) {
                    mechanic_ids.push(actor.id.clone());
                }
                let started_at = ticket.started_at.unwrap_or(now);
                let fields = patch(json!({
                    "status": TicketStatus::InProgress.as_str(),
                    "mecanico_id": actor.id,
                    "mechanic_ids": mechanic_ids,
                    "started_at": started_at.to_rfc3339(),
                }));
                (fields, TicketAction::Assign, None)
            })
            .await;
        self.report(result, "aceitar chamado", "Chamado aceito com sucesso!")
    }

    /// Pause a ticket, adding `session_secs` to its total time.
    pub async fn pause_ticket(&self, id: &str, reason: &str, session_secs: u64) -> Result<Ticket> {
        let result = self
            .transition(id, TicketStatus::Paused, |ticket, actor, _| {
                let total = ticket.total_time_spent.saturating_add(session_secs);
                let fields = patch(json!({
                    "status": TicketStatus::Paused.as_str(),
                    "paused_by_user_id": actor.id,
                    "total_time_spent": total,
                    "notes": reason,
                }));
                let details = format!("Motivo: {reason} | Tempo nesta sessão: {session_secs}s");
                (fields, TicketAction::Pause, Some(details))
            })
            .await;
        self.report(result, "pausar chamado", "Chamado pausado")
    }

    /// Finish a ticket, adding `session_secs` to its total time.
    pub async fn complete_ticket(
        &self,
        id: &str,
        notes: &str,
        session_secs: u64,
    ) -> Result<Ticket> {
        let result = self
            .transition(id, TicketStatus::Completed, |ticket, _, now| {
                let total = ticket.total_time_spent.saturating_add(session_secs);
                let fields = patch(json!({
                    "status": TicketStatus::Completed.as_str(),
                    "completed_at": now.to_rfc3339(),
                    "total_time_spent": total,
                    "notes": notes,
                }));
                let details = format!("Obs: {notes} | Tempo total: {total}s");
                (fields, TicketAction::Finish, Some(details))
            })
            .await;
        self.report(result, "finalizar chamado", "Chamado finalizado com sucesso!")
    }

    /// Change a ticket's details. A status change is logged as such, anything
    /// else as an edit. Nothing is written when no field differs.
    pub async fn edit_ticket(&self, id: &str, edit: &TicketEdit) -> Result<Ticket> {
        let result: Result<Ticket> = async {
            let actor = self.require_identity()?;
            let ticket = self
                .read(|s| s.ticket(id).cloned())
                .ok_or_else(|| SyncError::NotFound {
                    entity: "ticket",
                    id: id.to_string(),
                })?;
            let (fields, action) = edit.diff(&ticket);
            let Some(action) = action else {
                return Err(SyncError::Validation(
                    "Nenhuma alteração informada.".to_string(),
                ));
            };
            if edit.title.as_ref().is_some_and(|t| t.trim().is_empty()) {
                return Err(SyncError::Validation(
                    "Informe um título para o chamado.".to_string(),
                ));
            }

            let now = Utc::now();
            let row = self
                .backend()
                .update(Collection::Tickets, id, fields)
                .await
                .map_err(|e| single_row_error(e, Collection::Tickets, id))?;
            let confirmed = Ticket::normalize(&row);
            info!(ticket = %id, action = action.kind(), "Ticket edited");
            let patched = confirmed.clone();
            self.patch_ticket(id, move |t| *t = patched);
            self.log_activity(&actor, &action, id, None, now).await;
            Ok(confirmed)
        }
        .await;
        self.report(result, "editar chamado", "Chamado atualizado")
    }

    /// Hand a ticket over to another sector. Only the log is written.
    pub async fn transfer_ticket(&self, id: &str, reason: &str) -> Result<()> {
        let result: Result<()> = async {
            let actor = self.require_identity()?;
            if self.read(|s| s.ticket(id).is_none()) {
                return Err(SyncError::NotFound {
                    entity: "ticket",
                    id: id.to_string(),
                });
            }
            let row = log_row(
                &actor,
                &TicketAction::Transfer,
                id,
                Some(reason.to_string()),
                Utc::now(),
            );
            let stored = self.backend().insert(Collection::ActivityLogs, row).await?;
            self.apply_change(StoreChange::ActivityLog(Change::Insert(
                ActivityLogEntry::normalize(&stored),
            )));
            Ok(())
        }
        .await;

        let result = self.report(result, "setorizar chamado", "Chamado setorizado");
        if result.is_ok() {
            self.refresh().await;
        }
        result
    }

    /// Open a ticket, then refresh everything.
    pub async fn create_ticket(&self, new_ticket: NewTicket) -> Result<Ticket> {
        let result: Result<Ticket> = async {
            let actor = self.require_identity()?;
            if new_ticket.title.trim().is_empty() {
                return Err(SyncError::Validation(
                    "Informe um título para o chamado.".to_string(),
                ));
            }
            let now = Utc::now();
            let id = Uuid::new_v4().to_string();
            let requester = Some(new_ticket.requester.clone());
            let stored = self
                .backend()
                .insert(Collection::Tickets, new_ticket.into_row(&id, &actor.id, now))
                .await?;
            let ticket = Ticket::normalize(&stored);
            info!(ticket = %ticket.id, "Ticket created");
            self.log_activity(&actor, &TicketAction::Create { requester }, &ticket.id, None, now)
                .await;
            Ok(ticket)
        }
        .await;

        let result = self.report(result, "criar chamado", "Chamado criado com sucesso!");
        if result.is_ok() {
            self.refresh().await;
        }
        result
    }

    /// Delete a ticket. Zero affected rows is a permission failure and the
    /// local list is left alone.
    pub async fn delete_ticket(&self, id: &str) -> Result<()> {
        let result = self.delete_row(Collection::Tickets, id).await;
        if result.is_ok() {
            self.apply_change(StoreChange::Ticket(Change::Delete(id.to_string())));
        }
        self.report(result, "excluir chamado", "Chamado excluído")
    }

    async fn delete_row(&self, collection: Collection, id: &str) -> Result<()> {
        let affected = self
            .backend()
            .delete(collection, id)
            .await
            .map_err(|e| single_row_error(e, collection, id))?;
        if affected == 0 {
            warn!(collection = %collection, id = %id, "Delete affected no rows");
            return Err(SyncError::PermissionDenied {
                collection,
                id: id.to_string(),
            });
        }
        info!(collection = %collection, id = %id, "Deleted");
        Ok(())
    }

    /// Send a chat message and merge the stored row.
    pub async fn send_message(
        &self,
        receiver_id: &str,
        message: OutgoingMessage,
    ) -> Result<ChatMessage> {
        let result: Result<ChatMessage> = async {
            let actor = self.require_identity()?;
            let text = message.text.filter(|t| !t.trim().is_empty());
            let kind = match (&text, &message.attachment) {
                (Some(_), None) => MessageKind::Text,
                (None, Some(attachment)) => attachment
                    .mime_type
                    .as_deref()
                    .and_then(classify)
                    .unwrap_or(MessageKind::Document),
                (None, None) => {
                    return Err(SyncError::Validation("A mensagem está vazia.".to_string()))
                }
                (Some(_), Some(_)) => {
                    return Err(SyncError::Validation(
                        "Envie texto ou anexo, não ambos na mesma mensagem.".to_string(),
                    ))
                }
            };

            let outgoing = ChatMessage {
                id: Uuid::new_v4().to_string(),
                sender_id: actor.id,
                receiver_id: receiver_id.to_string(),
                text,
                timestamp: Utc::now(),
                read: false,
                kind,
                attachment: message.attachment,
                delivered_at: None,
            };
            let stored = self
                .backend()
                .insert(Collection::Messages, outgoing.to_row())
                .await?;
            let confirmed = ChatMessage::normalize(&stored);
            self.apply_change(StoreChange::Message(Change::Insert(confirmed.clone())));
            Ok(confirmed)
        }
        .await;
        self.report(result, "enviar mensagem", "Mensagem enviada")
    }

    /// Mark every unread message from `other_id` to the caller as read.
    /// Returns how many the backend flipped; only those change locally.
    pub async fn mark_conversation_read(&self, other_id: &str) -> Result<u64> {
        let result: Result<u64> = async {
            let actor = self.require_identity()?;
            let query = Query::new()
                .eq("sender_id", other_id)
                .eq("receiver_id", actor.id.as_str())
                .eq("read", false);
            let updated = self
                .backend()
                .update_where(Collection::Messages, &query, patch(json!({ "read": true })))
                .await?;

            let confirmed: HashSet<String> = updated.iter().filter_map(record_id).collect();
            debug!(from = %other_id, affected = confirmed.len(), "Marked conversation read");
            if !confirmed.is_empty() {
                self.modify(|s| {
                    for message in s.messages.iter_mut().filter(|m| confirmed.contains(&m.id)) {
                        message.read = true;
                    }
                });
            }
            Ok(updated.len() as u64)
        }
        .await;
        self.report_failure(result, "marcar mensagens como lidas")
    }

    /// Validate and upload a chat attachment.
    pub async fn upload_attachment(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<Attachment> {
        let result: Result<Attachment> = async {
            let actor = self.require_identity()?;
            let size = bytes.len() as u64;
            attachment::validate(size, mime_type)?;
            let blobs = self.blobs().ok_or_else(|| {
                SyncError::Validation("Envio de anexos indisponível.".to_string())
            })?;

            let path = format!("{}/{}", actor.id, attachment::storage_name(filename));
            let url = blobs
                .upload_blob(&self.config().attachment_bucket, &path, bytes, mime_type)
                .await?;
            info!(path = %path, size, "Attachment uploaded");
            Ok(Attachment {
                url,
                name: Some(filename.to_string()),
                size: Some(size),
                mime_type: Some(mime_type.to_string()),
            })
        }
        .await;
        self.report_failure(result, "enviar anexo")
    }

    /// Insert or update a config row, then refresh.
    async fn save_config(
        &self,
        collection: Collection,
        mut row: Record,
        id: &str,
        context: &str,
        success: &str,
    ) -> Result<()> {
        let result: Result<()> = async {
            self.require_identity()?;
            if id.is_empty() || id.starts_with(TEMP_ID_PREFIX) {
                row.remove("id");
                self.backend().insert(collection, row).await?;
            } else {
                row.remove("id");
                self.backend()
                    .update(collection, id, row)
                    .await
                    .map_err(|e| single_row_error(e, collection, id))?;
            }
            Ok(())
        }
        .await;

        let result = self.report(result, context, success);
        if result.is_ok() {
            self.refresh().await;
        }
        result
    }

    pub async fn save_machine(&self, machine: &Machine) -> Result<()> {
        self.save_config(
            Collection::Machines,
            machine.to_row(),
            &machine.id,
            "salvar máquina",
            "Máquinas atualizadas",
        )
        .await
    }

    pub async fn save_group(&self, group: &SectorGroup) -> Result<()> {
        self.save_config(
            Collection::SectorGroups,
            group.to_row(),
            &group.id,
            "salvar grupo",
            "Grupos atualizados",
        )
        .await
    }

    pub async fn save_warehouse(&self, warehouse: &Warehouse) -> Result<()> {
        self.save_config(
            Collection::Warehouses,
            warehouse.to_row(),
            &warehouse.id,
            "salvar galpão",
            "Galpões atualizados",
        )
        .await
    }

    pub async fn save_job_role(&self, job_role: &JobRole) -> Result<()> {
        self.save_config(
            Collection::JobRoles,
            job_role.to_row(),
            &job_role.id,
            "salvar função",
            "Funções atualizadas",
        )
        .await
    }

    /// Delete a machine, group, warehouse or job role, then refresh.
    pub async fn delete_config(&self, collection: Collection, id: &str) -> Result<()> {
        let result = if is_config(collection) {
            self.delete_row(collection, id).await
        } else {
            Err(SyncError::Validation(format!(
                "{} não é uma coleção de configuração.",
                collection.label()
            )))
        };

        let result = self.report(result, "excluir item", "Item removido");
        if result.is_ok() {
            self.refresh().await;
        }
        result
    }

    /// Insert a profile row, then refresh.
    pub async fn add_user(&self, user: &Identity) -> Result<()> {
        let result: Result<()> = async {
            self.require_identity()?;
            let mut row = user.to_row();
            if user.id.is_empty() {
                row.remove("id");
            }
            self.backend().insert(Collection::Profiles, row).await?;
            Ok(())
        }
        .await;

        let result = self.report(result, "adicionar usuário", "Usuário adicionado com sucesso!");
        if result.is_ok() {
            self.refresh().await;
        }
        result
    }

    /// Update a profile row, then refresh.
    ///
    /// When the caller edits their own profile, follow up with
    /// `SessionTracker::refresh_session` to pick up the canonical identity.
    pub async fn update_user(&self, user: &Identity) -> Result<()> {
        let result: Result<()> = async {
            self.require_identity()?;
            let mut row = user.to_row();
            row.remove("id");
            self.backend()
                .update(Collection::Profiles, &user.id, row)
                .await
                .map_err(|e| single_row_error(e, Collection::Profiles, &user.id))?;
            Ok(())
        }
        .await;

        let result = self.report(result, "atualizar usuário", "Usuário atualizado com sucesso!");
        if result.is_ok() {
            self.refresh().await;
        }
        result
    }

    /// Delete a profile row, then refresh.
    pub async fn delete_user(&self, id: &str) -> Result<()> {
        let result = self.delete_row(Collection::Profiles, id).await;
        let result = self.report(result, "remover usuário", "Usuário removido");
        if result.is_ok() {
            self.refresh().await;
        }
        result
    }
}
