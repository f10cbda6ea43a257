//! Canonical in-memory records.
//!
//! These are the shapes every raw row is normalized into. They serialize with
//! one camelCase key per attribute, which is the stable record contract that
//! clients reading the same backend rows agree on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;

/// Role assigned when neither a job-role mapping nor a raw role column exists.
pub const DEFAULT_ROLE: &str = "mecanico";

/// Avatar used when a profile has none.
pub const DEFAULT_AVATAR: &str = "/assets/default-avatar.svg";

/// Display name used when a profile has no name under any alias.
pub const UNNAMED_USER: &str = "Usuário Sem Nome";

/// Actor name used for activity entries whose author cannot be resolved.
pub const SYSTEM_ACTOR: &str = "Sistema";

/// Presence status of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserStatus {
    #[default]
    #[serde(rename = "Livre")]
    Available,
    #[serde(rename = "Ocupado")]
    Busy,
    #[serde(rename = "Inativo")]
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Available => "Livre",
            UserStatus::Busy => "Ocupado",
            UserStatus::Inactive => "Inativo",
        }
    }

    /// Lenient parse accepting the stored labels and English spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "livre" | "available" => Some(UserStatus::Available),
            "ocupado" | "busy" => Some(UserStatus::Busy),
            "inativo" | "inactive" => Some(UserStatus::Inactive),
            _ => None,
        }
    }
}

/// A user of the system (the roster entry and the authenticated actor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Resolved role name, never a raw foreign key.
    pub role: String,
    pub active: bool,
    pub avatar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_role_id: Option<String>,
}

impl Identity {
    /// Placeholder identity built from session claims alone.
    ///
    /// The display name is the local part of the contact address.
    pub fn placeholder(id: impl Into<String>, email: Option<&str>) -> Self {
        let local = email
            .and_then(|e| e.split('@').next())
            .filter(|s| !s.is_empty())
            .unwrap_or("Usuário")
            .to_string();

        Self {
            id: id.into(),
            name: local.clone(),
            email: email.map(str::to_string),
            role: DEFAULT_ROLE.to_string(),
            active: true,
            avatar: DEFAULT_AVATAR.to_string(),
            nickname: Some(local),
            status: UserStatus::Available,
            job_role_id: None,
        }
    }
}

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    #[default]
    #[serde(rename = "Em Aberto")]
    Open,
    #[serde(rename = "Atendimento")]
    InProgress,
    #[serde(rename = "Pausado")]
    Paused,
    #[serde(rename = "Concluído")]
    Completed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "Em Aberto",
            TicketStatus::InProgress => "Atendimento",
            TicketStatus::Paused => "Pausado",
            TicketStatus::Completed => "Concluído",
        }
    }

    /// Lenient parse accepting the stored labels and English spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "em aberto" | "aberto" | "open" => Some(TicketStatus::Open),
            "atendimento" | "em atendimento" | "in_progress" | "in-progress" => {
                Some(TicketStatus::InProgress)
            }
            "pausado" | "paused" => Some(TicketStatus::Paused),
            "concluído" | "concluido" | "completed" => Some(TicketStatus::Completed),
            _ => None,
        }
    }

    /// Whether a work session may move a ticket from `self` to `next`.
    ///
    /// Open -> InProgress -> {Paused <-> InProgress} -> Completed.
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Open, InProgress) | (InProgress, Paused) | (Paused, InProgress) | (InProgress, Completed)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a ticket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketPriority {
    #[serde(rename = "Alta")]
    High,
    #[default]
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "Baixa")]
    Low,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::High => "Alta",
            TicketPriority::Normal => "Normal",
            TicketPriority::Low => "Baixa",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "alta" | "high" => Some(TicketPriority::High),
            "normal" => Some(TicketPriority::Normal),
            "baixa" | "low" => Some(TicketPriority::Low),
            _ => None,
        }
    }
}

/// A maintenance ticket opened against a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub requester: String,
    /// Warehouse ("galpão") the machine sits in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    /// Sector group the ticket belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Who handled the machine when the problem showed up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_by: Option<String>,
    pub sector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Mechanic currently responsible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanic_id: Option<String>,
    /// Every mechanic who has worked on the ticket.
    #[serde(default)]
    pub mechanic_ids: Vec<String>,
    /// Display name of `mechanic_id`, resolved from the roster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanic_name: Option<String>,
    /// Accumulated work time in seconds.
    #[serde(default)]
    pub total_time_spent: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_by_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Ticket {
    /// Whether `user_id` is or has been assigned to this ticket.
    pub fn involves(&self, user_id: &str) -> bool {
        self.mechanic_id.as_deref() == Some(user_id) || self.mechanic_ids.iter().any(|m| m == user_id)
    }
}

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "document" => Some(MessageKind::Document),
            _ => None,
        }
    }
}

/// A file attached to a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    #[serde(rename = "messageType")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Whether this message is addressed to `user_id` and still unread.
    pub fn is_unread_for(&self, user_id: &str) -> bool {
        self.receiver_id == user_id && !self.read
    }
}

/// An append-only activity timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    /// Actor display name captured when the entry was written.
    pub user_name: String,
    /// Actor role name resolved against the current roster.
    pub user_role: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A machine tickets can be opened against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub location: String,
    pub image_url: String,
}

/// A sector group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorGroup {
    pub id: String,
    pub name: String,
}

/// A warehouse ("galpão").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: String,
    pub name: String,
}

/// A job role an identity's role name is resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRole {
    pub id: String,
    pub name: String,
}

/// Connectivity as last observed by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Loading,
    #[default]
    Offline,
    Error,
}

/// Per-collection counts after the last committed refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStats {
    pub tickets: usize,
    pub users: usize,
    pub messages: usize,
    pub machines: usize,
    pub activity_logs: usize,
}

/// Derived connection state; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub counts: DataStats,
    /// Collections whose last fetch failed.
    pub failed: Vec<Collection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_from_email() {
        let identity = Identity::placeholder("u1", Some("ana.silva@fabrica.com"));
        assert_eq!(identity.name, "ana.silva");
        assert_eq!(identity.nickname.as_deref(), Some("ana.silva"));
        assert_eq!(identity.role, DEFAULT_ROLE);
        assert!(identity.active);
    }

    #[test]
    fn test_placeholder_without_email() {
        let identity = Identity::placeholder("u1", None);
        assert_eq!(identity.name, "Usuário");
        assert!(identity.email.is_none());
    }

    #[test]
    fn test_status_transitions() {
        use TicketStatus::*;
        assert!(Open.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Paused));
        assert!(Paused.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));

        assert!(!Open.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Open));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(TicketStatus::parse("Em Aberto"), Some(TicketStatus::Open));
        assert_eq!(TicketStatus::parse("Atendimento"), Some(TicketStatus::InProgress));
        assert_eq!(TicketStatus::parse("concluido"), Some(TicketStatus::Completed));
        assert_eq!(TicketStatus::parse("??"), None);
    }

    #[test]
    fn test_status_serializes_as_stored_label() {
        let json = serde_json::to_string(&TicketStatus::Completed).unwrap();
        assert_eq!(json, "\"Concluído\"");
    }
}
