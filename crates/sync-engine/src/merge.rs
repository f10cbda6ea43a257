//! Reducers that fold one change into an in-memory collection.
//!
//! These are pure functions of `(collection, change) -> collection`. They hold
//! two guarantees regardless of event order: an identifier appears at most
//! once, and an update is never dropped (an update for an unknown identifier
//! is inserted instead).

use chrono::{DateTime, Utc};
use mecanica_core::{
    ActivityLogEntry, ChatMessage, Identity, JobRole, Machine, SectorGroup, Ticket, Warehouse,
};

/// A record that can be merged by identifier.
pub trait Mergeable {
    /// Stable identifier.
    fn key(&self) -> &str;

    /// Time used for newest-first ordering.
    fn sort_time(&self) -> Option<DateTime<Utc>> {
        None
    }
}

macro_rules! keyed_by_id {
    ($($ty:ty),*) => {
        $(
            impl Mergeable for $ty {
                fn key(&self) -> &str {
                    &self.id
                }
            }
        )*
    };
}

keyed_by_id!(Ticket, Identity, Machine, SectorGroup, Warehouse, JobRole);

impl Mergeable for ChatMessage {
    fn key(&self) -> &str {
        &self.id
    }

    fn sort_time(&self) -> Option<DateTime<Utc>> {
        Some(self.timestamp)
    }
}

impl Mergeable for ActivityLogEntry {
    fn key(&self) -> &str {
        &self.id
    }

    fn sort_time(&self) -> Option<DateTime<Utc>> {
        Some(self.timestamp)
    }
}

/// A single normalized change.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Insert(T),
    Update(T),
    Delete(String),
}

impl<T: Mergeable> Change<T> {
    /// Identifier the change targets.
    pub fn key(&self) -> &str {
        match self {
            Change::Insert(item) | Change::Update(item) => item.key(),
            Change::Delete(id) => id,
        }
    }
}

/// How a collection keeps its entries ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrder {
    /// Insertion order; new entries go last.
    Append,
    /// Timestamp-descending, optionally capped to the newest `cap` entries.
    NewestFirst { cap: Option<usize> },
}

/// Fold `change` into `items`.
///
/// * Insert of a known identifier is discarded.
/// * Update replaces by identifier in place, or inserts if unknown.
/// * Delete removes by identifier.
///
/// Changes with an empty identifier are ignored.
pub fn apply<T: Mergeable>(mut items: Vec<T>, change: Change<T>, order: MergeOrder) -> Vec<T> {
    if change.key().is_empty() {
        return items;
    }

    match change {
        Change::Insert(item) => {
            if !items.iter().any(|existing| existing.key() == item.key()) {
                insert(&mut items, item, order);
            }
        }
        Change::Update(item) => {
            match items.iter_mut().find(|existing| existing.key() == item.key()) {
                Some(slot) => *slot = item,
                None => insert(&mut items, item, order),
            }
        }
        Change::Delete(id) => items.retain(|existing| existing.key() != id),
    }

    items
}

fn insert<T: Mergeable>(items: &mut Vec<T>, item: T, order: MergeOrder) {
    match order {
        MergeOrder::Append => items.push(item),
        MergeOrder::NewestFirst { cap } => {
            // Before the first strictly older entry; equal timestamps keep arrival order.
            let position = match item.sort_time() {
                Some(time) => items
                    .iter()
                    .position(|existing| existing.sort_time().is_some_and(|t| t < time))
                    .unwrap_or(items.len()),
                None => 0,
            };
            items.insert(position, item);
            if let Some(cap) = cap {
                items.truncate(cap);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mecanica_core::{Normalize, Record, TicketStatus};
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn msg(id: &str, secs: i64) -> ChatMessage {
        ChatMessage::normalize(&record(json!({
            "id": id,
            "sender_id": "u1",
            "receiver_id": "u2",
            "text": "oi",
            "timestamp": Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap().to_rfc3339(),
        })))
    }

    fn log(id: &str, secs: i64) -> ActivityLogEntry {
        ActivityLogEntry::normalize(&record(json!({
            "id": id,
            "action": "x",
            "timestamp": Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap().to_rfc3339(),
        })))
    }

    fn ids<T: Mergeable>(items: &[T]) -> Vec<&str> {
        items.iter().map(Mergeable::key).collect()
    }

    #[test]
    fn test_insert_is_at_most_once() {
        let mut items = vec![msg("m1", 0)];
        for _ in 0..3 {
            items = apply(items, Change::Insert(msg("m2", 1)), MergeOrder::Append);
            items = apply(items, Change::Insert(msg("m1", 5)), MergeOrder::Append);
        }
        assert_eq!(ids(&items), vec!["m1", "m2"]);
        // The duplicate insert did not overwrite the existing entry.
        assert_eq!(items[0], msg("m1", 0));
    }

    #[test]
    fn test_update_replaces_in_place() {
        let items = vec![msg("m1", 0), msg("m2", 1), msg("m3", 2)];
        let mut read = msg("m2", 1);
        read.read = true;

        let items = apply(items, Change::Update(read.clone()), MergeOrder::Append);
        assert_eq!(ids(&items), vec!["m1", "m2", "m3"]);
        assert_eq!(items[1], read);
    }

    #[test]
    fn test_update_without_insert_inserts() {
        let items = apply(Vec::new(), Change::Update(msg("m7", 0)), MergeOrder::Append);
        assert_eq!(ids(&items), vec!["m7"]);
    }

    #[test]
    fn test_delete_removes() {
        let items = vec![msg("m1", 0), msg("m2", 1)];
        let items = apply(items, Change::Delete("m1".into()), MergeOrder::Append);
        assert_eq!(ids(&items), vec!["m2"]);

        let items = apply(items, Change::Delete("zz".into()), MergeOrder::Append);
        assert_eq!(ids(&items), vec!["m2"]);
    }

    #[test]
    fn test_newest_first_ordering_and_cap() {
        let order = MergeOrder::NewestFirst { cap: Some(3) };
        let mut items = vec![log("l3", 30), log("l1", 10)];

        items = apply(items, Change::Insert(log("l2", 20)), order);
        assert_eq!(ids(&items), vec!["l3", "l2", "l1"]);

        items = apply(items, Change::Insert(log("l4", 40)), order);
        assert_eq!(ids(&items), vec!["l4", "l3", "l2"]);

        // Older than everything kept: inserted at the end, then capped away.
        items = apply(items, Change::Insert(log("l0", 0)), order);
        assert_eq!(ids(&items), vec!["l4", "l3", "l2"]);
    }

    #[test]
    fn test_empty_key_is_ignored() {
        let items = apply(vec![msg("m1", 0)], Change::Insert(msg("", 1)), MergeOrder::Append);
        assert_eq!(ids(&items), vec!["m1"]);
    }

    #[test]
    fn test_no_duplicates_under_mixed_sequences() {
        let sequence = [
            Change::Insert(msg("a", 0)),
            Change::Update(msg("b", 1)),
            Change::Insert(msg("b", 1)),
            Change::Update(msg("a", 2)),
            Change::Delete("a".into()),
            Change::Update(msg("a", 3)),
            Change::Insert(msg("a", 4)),
        ];

        let mut items = Vec::new();
        for change in sequence {
            items = apply(items, change, MergeOrder::Append);
            let mut seen = std::collections::HashSet::new();
            assert!(items.iter().all(|m| seen.insert(m.key().to_string())));
        }
        assert_eq!(ids(&items), vec!["b", "a"]);
        // Last confirmed event for "a" was the update at +3s.
        assert_eq!(items[1], msg("a", 3));
    }

    #[test]
    fn test_ticket_update_scenario() {
        let existing = Ticket::normalize(&record(json!({
            "id": "t1",
            "title": "Esteira parada",
            "status": "Em Aberto",
            "priority": "Alta",
            "sector": "Linha 3",
        })));

        let mut raw = existing.to_record();
        raw.insert("status".into(), json!("Atendimento"));
        raw.insert("mecanico_id".into(), json!("u1"));
        let incoming = Ticket::normalize(&raw);

        let items = apply(vec![existing.clone()], Change::Update(incoming), MergeOrder::Append);
        let merged = &items[0];
        assert_eq!(merged.status, TicketStatus::InProgress);
        assert_eq!(merged.mechanic_id.as_deref(), Some("u1"));
        assert_eq!(
            Ticket {
                status: existing.status,
                mechanic_id: None,
                ..merged.clone()
            },
            existing
        );
    }
}
