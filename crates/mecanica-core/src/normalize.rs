//! Field normalizer.
//!
//! Rows arrive with the same attribute spelled several ways (`sender_id`,
//! `senderId`, `senderid`). Every ingestion point (bulk fetch, realtime insert,
//! realtime update, mutation responses) goes through [`Normalize::normalize`]
//! so alias resolution lives in exactly one place.
//!
//! Resolution per field: the first alias holding a non-null value wins,
//! otherwise a documented default applies. Normalization never fails, and the
//! canonical camelCase spelling is always one of the aliases, so normalizing a
//! canonical record is a no-op.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::models::{
    ActivityLogEntry, Attachment, ChatMessage, Identity, JobRole, Machine, MessageKind,
    SectorGroup, Ticket, TicketPriority, TicketStatus, UserStatus, Warehouse, DEFAULT_AVATAR,
    DEFAULT_ROLE, SYSTEM_ACTOR, UNNAMED_USER,
};
use crate::Record;

const ID: &[&str] = &["id"];

/// Conversion from a raw row into a canonical record.
pub trait Normalize: Sized + Serialize {
    /// Build the canonical record. Total: missing fields fall back to defaults.
    fn normalize(raw: &Record) -> Self;

    /// Canonical record as a raw row (camelCase keys).
    fn to_record(&self) -> Record {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Record::new(),
        }
    }

    /// Row in the backend's column spelling, for inserts and updates.
    fn to_row(&self) -> Record {
        snake_case_keys(self.to_record())
    }

    /// Normalize a batch of rows.
    fn normalize_all(rows: &[Record]) -> Vec<Self> {
        rows.iter().map(Self::normalize).collect()
    }
}

/// Rename every top-level key from camelCase to snake_case.
pub fn snake_case_keys(record: Record) -> Record {
    record
        .into_iter()
        .map(|(key, value)| (to_snake_case(&key), value))
        .collect()
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn rename(row: &mut Record, from: &str, to: &str) {
    if let Some(value) = row.remove(from) {
        row.insert(to.to_string(), value);
    }
}

/// Identifier of a raw row, if it has one.
pub fn record_id(raw: &Record) -> Option<String> {
    text(raw, ID).filter(|id| !id.is_empty())
}

fn pick<'a>(raw: &'a Record, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| !value.is_null())
}

fn text(raw: &Record, aliases: &[&str]) -> Option<String> {
    match pick(raw, aliases)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Like [`text`] but treats an empty string as absent.
fn non_empty(raw: &Record, aliases: &[&str]) -> Option<String> {
    text(raw, aliases).filter(|s| !s.trim().is_empty())
}

fn flag(raw: &Record, aliases: &[&str]) -> Option<bool> {
    match pick(raw, aliases)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Some(true),
            "false" | "f" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn count(raw: &Record, aliases: &[&str]) -> Option<u64> {
    match pick(raw, aliases)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    }
}

fn list(raw: &Record, aliases: &[&str]) -> Vec<String> {
    match pick(raw, aliases) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn time(raw: &Record, aliases: &[&str]) -> Option<DateTime<Utc>> {
    match pick(raw, aliases)? {
        Value::String(s) => parse_time(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Postgres text output uses a space separator and a short offset.
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    debug!(value = s, "Unparseable timestamp, ignoring");
    None
}

fn nested<'a>(raw: &'a Record, key: &str) -> Option<&'a Record> {
    match raw.get(key) {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    }
}

impl Normalize for Identity {
    fn normalize(raw: &Record) -> Self {
        let name = non_empty(raw, &["name", "full_name", "fullName"])
            .unwrap_or_else(|| UNNAMED_USER.to_string());

        Self {
            id: text(raw, ID).unwrap_or_default(),
            name,
            email: non_empty(raw, &["email"]),
            role: non_empty(raw, &["role", "user_role", "userRole"])
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            active: flag(raw, &["active", "is_active", "isActive"]).unwrap_or(true),
            avatar: non_empty(raw, &["avatar", "avatar_url", "avatarUrl"])
                .unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            nickname: non_empty(raw, &["nickname", "username"]),
            status: text(raw, &["status"])
                .and_then(|s| UserStatus::parse(&s))
                .unwrap_or_default(),
            job_role_id: non_empty(raw, &["job_role_id", "jobRoleId", "jobroleid"]),
        }
    }
}

impl Normalize for Ticket {
    fn normalize(raw: &Record) -> Self {
        let status = text(raw, &["status"])
            .and_then(|s| TicketStatus::parse(&s))
            .unwrap_or_default();
        let priority = text(raw, &["priority"])
            .and_then(|s| TicketPriority::parse(&s))
            .unwrap_or_default();

        Self {
            id: text(raw, ID).unwrap_or_default(),
            title: text(raw, &["title"]).unwrap_or_default(),
            requester: text(raw, &["requester"]).unwrap_or_default(),
            warehouse: non_empty(raw, &["galpao", "warehouse"]),
            group: non_empty(raw, &["grupo", "group"]),
            handled_by: non_empty(raw, &["manuseado_por", "manuseadoPor", "handledBy"]),
            sector: text(raw, &["sector"]).unwrap_or_default(),
            machine_id: non_empty(raw, &["machine_id", "machineId", "machineid"]),
            status,
            priority,
            description: text(raw, &["description"]).unwrap_or_default(),
            machine_category: non_empty(raw, &["machine_category", "machineCategory"]),
            operator: non_empty(raw, &["operator"]),
            created_at: time(raw, &["created_at", "createdAt", "createdat"]),
            started_at: time(raw, &["started_at", "startedAt", "startedat"]),
            completed_at: time(raw, &["completed_at", "completedAt", "completedat"]),
            mechanic_id: non_empty(
                raw,
                &["mecanico_id", "mecanicoId", "mechanic_id", "mechanicId"],
            ),
            mechanic_ids: list(raw, &["mechanic_ids", "mechanicIds", "mechanicids"]),
            mechanic_name: non_empty(raw, &["mechanicName"]),
            total_time_spent: count(raw, &["total_time_spent", "totalTimeSpent"]).unwrap_or(0),
            paused_by_user_id: non_empty(raw, &["paused_by_user_id", "pausedByUserId"]),
            notes: non_empty(raw, &["notes"]),
            created_by: non_empty(raw, &["created_by", "createdBy", "createdby"]),
        }
    }

    fn to_row(&self) -> Record {
        let mut row = snake_case_keys(self.to_record());
        rename(&mut row, "warehouse", "galpao");
        rename(&mut row, "group", "grupo");
        rename(&mut row, "handled_by", "manuseado_por");
        rename(&mut row, "mechanic_id", "mecanico_id");
        // Derived from the roster, not stored.
        row.remove("mechanic_name");
        row
    }
}

fn attachment(raw: &Record) -> Option<Attachment> {
    // Canonical records nest the attachment; stored rows flatten it.
    if let Some(inner) = nested(raw, "attachment") {
        return non_empty(inner, &["url"]).map(|url| Attachment {
            url,
            name: non_empty(inner, &["name"]),
            size: count(inner, &["size"]),
            mime_type: non_empty(inner, &["mimeType", "mime_type"]),
        });
    }

    non_empty(raw, &["attachment_url", "attachmentUrl"]).map(|url| Attachment {
        url,
        name: non_empty(raw, &["attachment_name", "attachmentName"]),
        size: count(raw, &["attachment_size", "attachmentSize"]),
        mime_type: non_empty(raw, &["attachment_mime_type", "attachmentMimeType"]),
    })
}

impl Normalize for ChatMessage {
    fn normalize(raw: &Record) -> Self {
        Self {
            id: text(raw, ID).unwrap_or_default(),
            sender_id: text(raw, &["sender_id", "senderId", "senderid"]).unwrap_or_default(),
            receiver_id: text(raw, &["receiver_id", "receiverId", "receiverid"])
                .unwrap_or_default(),
            text: non_empty(raw, &["text"]),
            timestamp: time(raw, &["timestamp", "created_at", "createdAt"])
                .unwrap_or(DateTime::UNIX_EPOCH),
            read: flag(raw, &["read"]).unwrap_or(false),
            kind: text(raw, &["message_type", "messageType", "messagetype"])
                .and_then(|s| MessageKind::parse(&s))
                .unwrap_or_default(),
            attachment: attachment(raw),
            delivered_at: time(raw, &["delivered_at", "deliveredAt"]),
        }
    }

    fn to_row(&self) -> Record {
        let mut row = snake_case_keys(self.to_record());
        row.remove("attachment");
        if let Some(attachment) = &self.attachment {
            row.insert("attachment_url".into(), Value::String(attachment.url.clone()));
            if let Some(name) = &attachment.name {
                row.insert("attachment_name".into(), Value::String(name.clone()));
            }
            if let Some(size) = attachment.size {
                row.insert("attachment_size".into(), Value::from(size));
            }
            if let Some(mime_type) = &attachment.mime_type {
                row.insert("attachment_mime_type".into(), Value::String(mime_type.clone()));
            }
        }
        row
    }
}

impl Normalize for ActivityLogEntry {
    fn normalize(raw: &Record) -> Self {
        // Joined selects carry the author under `profiles`.
        let joined_name = nested(raw, "profiles").and_then(|p| non_empty(p, &["name"]));

        Self {
            id: text(raw, ID).unwrap_or_default(),
            timestamp: time(raw, &["timestamp", "created_at", "createdAt"])
                .unwrap_or(DateTime::UNIX_EPOCH),
            user_id: text(raw, &["user_id", "userId", "userid"]).unwrap_or_default(),
            user_name: non_empty(raw, &["user_name", "userName", "username"])
                .or(joined_name)
                .unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
            user_role: non_empty(raw, &["user_role", "userRole", "userrole"])
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            action: text(raw, &["action"]).unwrap_or_default(),
            details: non_empty(raw, &["details"]),
        }
    }
}

impl Normalize for Machine {
    fn normalize(raw: &Record) -> Self {
        Self {
            id: text(raw, ID).unwrap_or_default(),
            name: text(raw, &["name"]).unwrap_or_default(),
            manufacturer: text(raw, &["manufacturer"]).unwrap_or_default(),
            model: text(raw, &["model"]).unwrap_or_default(),
            serial: text(raw, &["serial"]).unwrap_or_default(),
            location: text(raw, &["location"]).unwrap_or_default(),
            image_url: text(raw, &["image_url", "imageUrl", "imageurl"]).unwrap_or_default(),
        }
    }
}

macro_rules! normalize_named {
    ($($ty:ident),*) => {
        $(
            impl Normalize for $ty {
                fn normalize(raw: &Record) -> Self {
                    Self {
                        id: text(raw, ID).unwrap_or_default(),
                        name: text(raw, &["name"]).unwrap_or_default(),
                    }
                }
            }
        )*
    };
}

normalize_named!(SectorGroup, Warehouse, JobRole);
