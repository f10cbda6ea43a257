use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use mecanica_core::{Ticket, TicketPriority, TicketStatus};
use supabase_backend::{SupabaseClient, SupabaseConfig};
use sync_engine::{
    OutgoingMessage, RealtimeEngine, ReportPeriod, SessionTracker, Snapshot, SyncConfig,
    SyncError, SyncStore, TicketEdit,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

mod render;

#[derive(Debug, Parser)]
#[command(name = "mecanica")]
#[command(about = "MecânicaPro maintenance tickets from the terminal")]
struct Args {
    /// Account email
    #[arg(long, env = "MECANICA_EMAIL")]
    email: String,

    /// Account password
    #[arg(long, env = "MECANICA_PASSWORD", hide_env_values = true)]
    password: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connection state and collection counts
    Status,
    /// List tickets, optionally filtered by status
    Tickets {
        /// "Em Aberto", "Atendimento", "Pausado" or "Concluído"
        #[arg(long)]
        status: Option<String>,
        /// Print the normalized records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recent activity, newest first
    Log,
    /// Conversation with another user
    Chat { user: String },
    /// Follow tickets, messages and activity until Ctrl+C
    Watch,
    /// Take an open or paused ticket
    Accept { id: String },
    /// Pause a ticket in progress
    Pause {
        id: String,
        #[arg(long)]
        reason: String,
        /// Seconds worked in this session
        #[arg(long, default_value_t = 0)]
        secs: u64,
    },
    /// Finish a ticket in progress
    Complete {
        id: String,
        #[arg(long, default_value = "")]
        notes: String,
        /// Seconds worked in this session
        #[arg(long, default_value_t = 0)]
        secs: u64,
    },
    /// Record a hand-over request
    Transfer {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Change a ticket's fields
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// "Alta", "Normal" or "Baixa"
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        sector: Option<String>,
        #[arg(long)]
        machine: Option<String>,
        /// Set the status directly, bypassing accept/pause/complete
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete a ticket
    Delete { id: String },
    /// Send a message with either text or a file
    Send {
        to: String,
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Mark a conversation as read
    Read { user: String },
    /// Productivity per mechanic over a period
    Report {
        /// "last-7", "last-15", "last-30" or "custom"
        #[arg(long, default_value = "last-7")]
        period: String,
        /// First day of a custom period (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day of a custom period (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Only tickets this mechanic holds or has worked on
        #[arg(long)]
        mechanic: Option<String>,
        /// List the activity log for the period instead
        #[arg(long)]
        activity: bool,
        #[arg(long)]
        json: bool,
    },
}

/// How a command ended once its errors were shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    /// The failure was already printed as a notification.
    Failed,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => ExitCode::SUCCESS,
            Outcome::Failed => ExitCode::FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sync_engine=info".parse()?)
                .add_directive("supabase_backend=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = SyncConfig::from_env()?;
    let client = Arc::new(SupabaseClient::new(SupabaseConfig::from_env()?)?);

    let session = SessionTracker::new(client.clone(), client.clone(), config.clone());
    session.start().await?;
    if !session.state().is_authenticated() {
        session.sign_in(&args.email, &args.password).await?;
    }
    // Give enrichment a chance so names and roles print resolved.
    let mut auth = session.subscribe();
    if tokio::time::timeout(config.auth_failsafe, auth.wait_for(|s| s.is_enriched()))
        .await
        .is_err()
    {
        warn!("Profile not loaded, continuing with session identity");
    }

    let store = Arc::new(
        SyncStore::new(client.clone(), session.subscribe(), config).with_blob_store(client),
    );
    let report = store.refresh().await;
    if report.synthesized_self {
        warn!("Signed-in user has no profile row");
    }

    let result = run(&store, args.command).await;
    session.shutdown();
    result.map(ExitCode::from)
}

async fn run(store: &Arc<SyncStore>, command: Command) -> Result<Outcome, Box<dyn std::error::Error>> {
    let me = store.identity().ok_or(SyncError::NotAuthenticated)?;
    let mut notifications = store.notifications();

    match command {
        Command::Status => {
            println!("{} <{}> - {}", me.name, me.email.as_deref().unwrap_or("-"), me.role);
            print!("{}", store.read(|s| render::status(s, &me.id)));
        }
        Command::Tickets { status, json } => {
            let filter = status.as_deref().map(parse_status).transpose()?;
            let snapshot = store.snapshot();
            let tickets: Vec<&Ticket> = snapshot
                .tickets
                .iter()
                .filter(|t| filter.map_or(true, |f| t.status == f))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&tickets)?);
            } else {
                for ticket in tickets {
                    println!("{}", render::ticket_line(ticket, snapshot.is_pending(&ticket.id)));
                }
            }
        }
        Command::Log => {
            for entry in &store.snapshot().activity_logs {
                println!("{}", render::log_line(entry));
            }
        }
        Command::Chat { user } => {
            let snapshot = store.snapshot();
            for message in snapshot.conversation(&me.id, &user) {
                println!("{}", render::message_line(message, &sender_name(&snapshot, &message.sender_id)));
            }
        }
        Command::Watch => watch(store.clone()).await?,
        Command::Accept { id } => {
            let outcome = store.accept_ticket(&id).await.map(|_| ());
            return finish(&mut notifications, outcome);
        }
        Command::Pause { id, reason, secs } => {
            let outcome = store.pause_ticket(&id, &reason, secs).await.map(|_| ());
            return finish(&mut notifications, outcome);
        }
        Command::Complete { id, notes, secs } => {
            let outcome = store.complete_ticket(&id, &notes, secs).await.map(|_| ());
            return finish(&mut notifications, outcome);
        }
        Command::Transfer { id, reason } => {
            let outcome = store.transfer_ticket(&id, &reason).await;
            return finish(&mut notifications, outcome);
        }
        Command::Edit {
            id,
            title,
            description,
            priority,
            sector,
            machine,
            status,
        } => {
            let edit = TicketEdit {
                title,
                description,
                priority: priority.as_deref().map(parse_priority).transpose()?,
                sector,
                machine_id: machine,
                status: status.as_deref().map(parse_status).transpose()?,
            };
            let outcome = store.edit_ticket(&id, &edit).await.map(|_| ());
            return finish(&mut notifications, outcome);
        }
        Command::Delete { id } => {
            let outcome = store.delete_ticket(&id).await;
            return finish(&mut notifications, outcome);
        }
        Command::Send { to, text, file } => {
            let message = match (text, file) {
                (_, Some(path)) => {
                    let bytes = tokio::fs::read(&path).await?;
                    let (name, content_type) = describe_upload(&path);
                    let attachment = store.upload_attachment(&name, bytes, &content_type).await;
                    match attachment {
                        Ok(attachment) => OutgoingMessage::attachment(attachment),
                        Err(e) => return finish(&mut notifications, Err(e)),
                    }
                }
                (text, None) => OutgoingMessage::text(text.unwrap_or_default()),
            };
            let outcome = store.send_message(&to, message).await.map(|_| ());
            return finish(&mut notifications, outcome);
        }
        Command::Read { user } => match store.mark_conversation_read(&user).await {
            Ok(marked) => println!("{} mensagens marcadas como lidas", marked),
            Err(e) => return finish(&mut notifications, Err(e)),
        },
        Command::Report {
            period,
            from,
            to,
            mechanic,
            activity,
            json,
        } => {
            let period = report_period(&period, from, to)?;
            let now = Utc::now();
            if activity {
                let range = period.range(now);
                let entries = match store.activity_report(&range, mechanic.as_deref()).await {
                    Ok(entries) => entries,
                    Err(e) => return finish(&mut notifications, Err(e)),
                };
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    for entry in &entries {
                        println!("{}", render::log_line(entry));
                    }
                }
            } else {
                let report = store.read(|s| s.productivity(period, mechanic.as_deref(), now));
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!("{}", period);
                    print!("{}", render::productivity(&report));
                }
            }
        }
    }
    Ok(Outcome::Done)
}

fn parse_status(s: &str) -> Result<TicketStatus, String> {
    TicketStatus::parse(s).ok_or_else(|| format!("status desconhecido: {}", s))
}

fn parse_priority(s: &str) -> Result<TicketPriority, String> {
    TicketPriority::parse(s).ok_or_else(|| format!("prioridade desconhecida: {}", s))
}

/// Period named on the command line. Explicit dates make it custom.
fn report_period(
    name: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> sync_engine::Result<ReportPeriod> {
    if from.is_some() || to.is_some() {
        return Ok(ReportPeriod::Custom { start: from, end: to });
    }
    name.parse()
}

/// Print whatever the action published, then surface its error.
///
/// An error that was already printed as a notification only turns into a
/// failed [`Outcome`], so the caller still shuts the session down.
fn finish(
    notifications: &mut tokio::sync::broadcast::Receiver<sync_engine::Notification>,
    outcome: sync_engine::Result<()>,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    let mut shown = false;
    while let Ok(notification) = notifications.try_recv() {
        println!("{}", render::notification_line(&notification));
        shown = true;
    }
    match outcome {
        Ok(()) => Ok(Outcome::Done),
        Err(e) if shown => {
            info!("Action failed: {}", e);
            Ok(Outcome::Failed)
        }
        Err(e) => Err(e.into()),
    }
}

fn sender_name(snapshot: &Snapshot, id: &str) -> String {
    snapshot
        .user(id)
        .map(|u| u.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// File name and detected content type of an upload.
fn describe_upload(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "arquivo".to_string());
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    (name, content_type)
}

/// Print changes as they are merged until Ctrl+C.
async fn watch(store: Arc<SyncStore>) -> Result<(), Box<dyn std::error::Error>> {
    let realtime = RealtimeEngine::start(store.clone()).await;
    info!(channels = realtime.active_channels(), "Watching, Ctrl+C to stop");

    let mut snapshots = store.subscribe();
    let mut notifications = store.notifications();
    let initial = snapshots.borrow_and_update().clone();
    let mut tickets: HashMap<String, Ticket> = initial
        .tickets
        .iter()
        .map(|t| (t.id.clone(), t.clone()))
        .collect();
    let mut seen: HashSet<String> = initial
        .messages
        .iter()
        .map(|m| m.id.clone())
        .chain(initial.activity_logs.iter().map(|l| l.id.clone()))
        .collect();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!("Ctrl+C handler failed: {}", e);
                }
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                for ticket in &snapshot.tickets {
                    if tickets.get(&ticket.id) != Some(ticket) {
                        println!("{}", render::ticket_line(ticket, snapshot.is_pending(&ticket.id)));
                    }
                }
                tickets = snapshot.tickets.iter().map(|t| (t.id.clone(), t.clone())).collect();
                for message in &snapshot.messages {
                    if seen.insert(message.id.clone()) {
                        println!("{}", render::message_line(message, &sender_name(&snapshot, &message.sender_id)));
                    }
                }
                for entry in snapshot.activity_logs.iter().rev() {
                    if seen.insert(entry.id.clone()) {
                        println!("{}", render::log_line(entry));
                    }
                }
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => println!("{}", render::notification_line(&notification)),
                Err(RecvError::Lagged(n)) => warn!("Skipped {} notifications", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    realtime.stop().await;
    Ok(())
}
