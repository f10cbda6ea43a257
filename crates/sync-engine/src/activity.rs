//! Ticket activity log entries.
//!
//! Every lifecycle change writes exactly one row to `activity_logs`; the
//! timeline has no other data source. Rows are append-only and carry the
//! actor's name and role as they were at write time.

use chrono::{DateTime, Utc};
use mecanica_core::{Identity, Record, TicketStatus};
use serde_json::Value;

/// What happened to a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketAction {
    /// Ticket opened, optionally on behalf of a named requester.
    Create { requester: Option<String> },
    /// A mechanic took the ticket.
    Assign,
    Pause,
    Finish,
    /// Status set directly by an edit.
    StatusChange { from: TicketStatus, to: TicketStatus },
    /// Details changed by an edit.
    Edit,
    /// Ticket handed over to another sector.
    Transfer,
}

impl TicketAction {
    /// Short machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            TicketAction::Create { .. } => "create",
            TicketAction::Assign => "assign",
            TicketAction::Pause => "pause",
            TicketAction::Finish => "finish",
            TicketAction::StatusChange { .. } => "status_change",
            TicketAction::Edit => "edit",
            TicketAction::Transfer => "transfer",
        }
    }

    /// Action text stored in the log row.
    pub fn describe(&self, ticket_id: &str) -> String {
        match self {
            TicketAction::Create { requester } => match requester.as_deref() {
                Some(name) if !name.trim().is_empty() => {
                    format!("Criou o chamado #{ticket_id} para o cliente {name}")
                }
                _ => format!("Criou o chamado #{ticket_id}"),
            },
            TicketAction::Assign => format!("Assumiu o chamado #{ticket_id}"),
            TicketAction::Pause => format!("Pausou o chamado #{ticket_id}"),
            TicketAction::Finish => format!("Finalizou o chamado #{ticket_id}"),
            TicketAction::StatusChange { from, to } => {
                format!("Alterou o status do chamado #{ticket_id} de '{from}' para '{to}'")
            }
            TicketAction::Edit => format!("Editou as informações do chamado #{ticket_id}"),
            TicketAction::Transfer => format!("Setorizou o chamado #{ticket_id}"),
        }
    }
}

/// Row to insert into `activity_logs`.
pub fn log_row(
    actor: &Identity,
    action: &TicketAction,
    ticket_id: &str,
    details: Option<String>,
    at: DateTime<Utc>,
) -> Record {
    let mut row = Record::new();
    row.insert("user_id".into(), Value::String(actor.id.clone()));
    row.insert("user_name".into(), Value::String(actor.name.clone()));
    row.insert("user_role".into(), Value::String(actor.role.clone()));
    row.insert("action".into(), Value::String(action.describe(ticket_id)));
    row.insert(
        "details".into(),
        details.map(Value::String).unwrap_or(Value::Null),
    );
    row.insert("timestamp".into(), Value::String(at.to_rfc3339()));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use mecanica_core::{ActivityLogEntry, Normalize};

    #[test]
    fn test_descriptions() {
        assert_eq!(TicketAction::Assign.describe("t1"), "Assumiu o chamado #t1");
        assert_eq!(TicketAction::Finish.describe("t1"), "Finalizou o chamado #t1");
        assert_eq!(TicketAction::Transfer.describe("t1"), "Setorizou o chamado #t1");
        assert_eq!(
            TicketAction::Edit.describe("t1"),
            "Editou as informações do chamado #t1"
        );
        assert_eq!(
            TicketAction::Create {
                requester: Some("Metalúrgica Sul".into())
            }
            .describe("t2"),
            "Criou o chamado #t2 para o cliente Metalúrgica Sul"
        );
        assert_eq!(
            TicketAction::StatusChange {
                from: TicketStatus::Open,
                to: TicketStatus::InProgress
            }
            .describe("t3"),
            "Alterou o status do chamado #t3 de 'Em Aberto' para 'Atendimento'"
        );
    }

    #[test]
    fn test_log_row_normalizes() {
        let mut actor = Identity::placeholder("u1", Some("ana@fabrica.com"));
        actor.role = "Supervisor".into();
        let at = Utc::now();

        let row = log_row(&actor, &TicketAction::Pause, "t1", Some("Motivo: peça".into()), at);
        let entry = ActivityLogEntry::normalize(&row);
        assert_eq!(entry.user_id, "u1");
        assert_eq!(entry.user_name, "ana");
        assert_eq!(entry.user_role, "Supervisor");
        assert_eq!(entry.action, "Pausou o chamado #t1");
        assert_eq!(entry.details.as_deref(), Some("Motivo: peça"));
        assert_eq!(entry.timestamp.timestamp(), at.timestamp());
    }
}
