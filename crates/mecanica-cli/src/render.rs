//! Plain-text rendering for terminal output.

use chrono::{DateTime, Local, Utc};
use mecanica_core::{ActivityLogEntry, ChatMessage, Ticket};
use sync_engine::{Notification, NotificationKind, ProductivityReport, Snapshot};

/// `1h 02m 05s`, `4m 10s` or `12s`.
pub fn duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%d/%m %H:%M").to_string()
}

pub fn ticket_line(ticket: &Ticket, pending: bool) -> String {
    let mut line = format!(
        "#{:<10} {:<11} {:<7} {}",
        ticket.id,
        ticket.status.as_str(),
        ticket.priority.as_str(),
        ticket.title
    );
    if let Some(name) = &ticket.mechanic_name {
        line.push_str(&format!(" [{}]", name));
    }
    if ticket.total_time_spent > 0 {
        line.push_str(&format!(" ({})", duration(ticket.total_time_spent)));
    }
    if pending {
        line.push_str(" *");
    }
    line
}

pub fn message_line(message: &ChatMessage, sender: &str) -> String {
    let body = match (&message.text, &message.attachment) {
        (Some(text), _) => text.clone(),
        (None, Some(attachment)) => format!(
            "[{}] {}",
            message.kind.as_str(),
            attachment.name.as_deref().unwrap_or(&attachment.url)
        ),
        (None, None) => String::new(),
    };
    format!("{} {}: {}", timestamp(message.timestamp), sender, body)
}

pub fn log_line(entry: &ActivityLogEntry) -> String {
    let mut line = format!(
        "{} {} - {}",
        timestamp(entry.timestamp),
        entry.user_name,
        entry.action
    );
    if let Some(details) = entry.details.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(&format!(" ({})", details));
    }
    line
}

pub fn notification_line(notification: &Notification) -> String {
    let tag = match notification.kind {
        NotificationKind::Success => "ok",
        NotificationKind::Error => "erro",
        NotificationKind::Permission => "permissão",
    };
    format!("[{}] {}", tag, notification.message)
}

/// Summary printed by `status`.
pub fn status(snapshot: &Snapshot, user_id: &str) -> String {
    let connection = &snapshot.connection;
    let mut out = format!("conexão: {:?}", connection.status);
    if let Some(at) = connection.last_sync {
        out.push_str(&format!(" (sincronizado {})", timestamp(at)));
    }
    if !connection.failed.is_empty() {
        let failed: Vec<String> = connection.failed.iter().map(|c| c.to_string()).collect();
        out.push_str(&format!(" falhas: {}", failed.join(", ")));
    }
    out.push_str(&format!(
        "\nchamados: {} ({} em aberto)\nusuários: {}\nmensagens: {} ({} não lidas)\nmáquinas: {}\n",
        snapshot.tickets.len(),
        snapshot.open_ticket_count(),
        snapshot.users.len(),
        snapshot.messages.len(),
        snapshot.unread_count(user_id),
        snapshot.machines.len(),
    ));
    if let Some(ticket) = snapshot.active_ticket_for(user_id) {
        out.push_str(&format!("em atendimento: {}\n", ticket_line(ticket, false)));
    }
    out
}

/// Totals, then one line per mechanic.
pub fn productivity(report: &ProductivityReport) -> String {
    let mut out = format!(
        "chamados: {} | concluídos: {} | em atendimento: {} | pausados: {}\n",
        report.total, report.completed, report.in_progress, report.paused
    );
    for m in &report.mechanics {
        let average = m.average_secs.map(duration).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<20} {:>3} concluídos de {:<3} tempo {:<12} média {}\n",
            m.name,
            m.completed,
            m.tickets,
            duration(m.total_time_spent),
            average
        ));
    }
    out
}
