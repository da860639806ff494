//! Line-based interactive chat loop.

use axiom_chat::{
    ChatOrchestrator, ChatUpdate, Notification, NotificationLevel, Notifier, Phase, SubmitOutcome,
};
use axiom_core::{Attachment, Role};
use axiom_session::{highlight, SessionRegistry};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

const HELP: &str = "\
Commands:
  /new              start a new session
  /sessions         list stored sessions
  /open <id>        open a session by id prefix
  /search <text>    search the current transcript
  /prompts          list your prompts in this session
  /attach <path>    attach a file to the next message
  /clear            clear the transcript and leave the session
  /quit             exit
Anything else is sent as a message. Ctrl-C cancels a streaming reply.";

#[derive(Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Submit(String),
    New,
    Sessions,
    Open(String),
    Search(String),
    Prompts,
    Attach(PathBuf),
    Clear,
    Help,
    Quit,
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Submit(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match (name, arg) {
            ("new", _) => Self::New,
            ("sessions", _) => Self::Sessions,
            ("open", id) if !id.is_empty() => Self::Open(id.to_string()),
            ("search", query) => Self::Search(query.to_string()),
            ("prompts", _) => Self::Prompts,
            ("attach", path) if !path.is_empty() => Self::Attach(PathBuf::from(path)),
            ("clear", _) => Self::Clear,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// Prints notifications to stderr.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        let tag = match notification.level {
            NotificationLevel::Info => "info",
            NotificationLevel::Error => "error",
        };
        eprintln!(
            "[{tag}] {}: {}",
            notification.title, notification.description
        );
    }
}

pub async fn run(mut chat: ChatOrchestrator) -> anyhow::Result<()> {
    let in_flight = Arc::new(AtomicBool::new(false));
    let printer = tokio::spawn(print_updates(chat.subscribe()));

    let cancel = chat.cancel_handle();
    let watch_in_flight = in_flight.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if watch_in_flight.load(Ordering::SeqCst) {
                cancel.cancel();
            } else {
                eprintln!();
                std::process::exit(130);
            }
        }
    });

    println!(
        "axiom: {} session(s), {} message(s). Type /help for commands.",
        chat.session_count(),
        chat.message_count()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match ReplCommand::parse(&line) {
            ReplCommand::Submit(text) => {
                let outcome = {
                    let _reply = InFlight::mark(&in_flight);
                    chat.submit(&text).await?
                };
                if let SubmitOutcome::Cancelled = outcome {
                    eprintln!("Reply cancelled.");
                }
            }
            ReplCommand::New => {
                let id = chat.new_session().await?;
                println!("New session {id}");
            }
            ReplCommand::Sessions => print_sessions(chat.registry(), chat.current_session()),
            ReplCommand::Open(prefix) => match find_session(chat.registry(), &prefix) {
                Ok(id) => {
                    chat.open_session(id)?;
                    print_transcript(&chat);
                }
                Err(msg) => eprintln!("{msg}"),
            },
            ReplCommand::Search(query) => print_search(&chat, &query),
            ReplCommand::Prompts => {
                for prompt in chat.user_prompts() {
                    println!("#{:<3} {}", prompt.index, first_line(prompt.content));
                }
            }
            ReplCommand::Attach(path) => match describe_file(&path).await {
                Ok(attachment) => chat.attach([attachment]),
                Err(e) => eprintln!("Cannot attach {}: {e}", path.display()),
            },
            ReplCommand::Clear => chat.clear()?,
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(cmd) => eprintln!("Unknown command {cmd:?}, try /help"),
        }
    }

    drop(chat);
    let _ = printer.await;
    Ok(())
}

/// Raises the flag the Ctrl-C handler checks for as long as it is alive.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn mark(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Streams assistant text to stdout as it arrives.
async fn print_updates(mut updates: mpsc::UnboundedReceiver<ChatUpdate>) {
    let mut printed: HashMap<Uuid, usize> = HashMap::new();
    let mut stdout = std::io::stdout();
    let mut streaming = false;

    while let Some(update) = updates.recv().await {
        match update {
            ChatUpdate::PhaseChanged { phase } => {
                let active = matches!(phase, Phase::Sending | Phase::Streaming);
                let was_active = std::mem::replace(&mut streaming, active);
                if was_active && !active {
                    let _ = writeln!(stdout);
                }
            }
            ChatUpdate::MessageAppended { message } if message.role == Role::Assistant => {
                let _ = write!(stdout, "axiom> ");
                printed.insert(message.id, 0);
            }
            ChatUpdate::ContentReplaced { id, content } => {
                let done = printed.entry(id).or_insert(0);
                if let Some(fresh) = content.get(*done..) {
                    let _ = write!(stdout, "{fresh}");
                    *done = content.len();
                }
            }
            ChatUpdate::MessageRemoved { id } => {
                printed.remove(&id);
                let _ = write!(stdout, " (reply discarded)");
            }
            _ => {}
        }
        let _ = stdout.flush();
    }
}

pub fn print_sessions(registry: &SessionRegistry, current: Option<Uuid>) {
    if registry.is_empty() {
        println!("No sessions yet.");
        return;
    }
    for session in registry.sessions() {
        let marker = if Some(session.id) == current { "*" } else { " " };
        println!(
            "{marker} {}  {:<34} {:>4} msgs  {}",
            session.id,
            session.title,
            session.message_count(),
            session.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!(
        "{} session(s), {} message(s)",
        registry.len(),
        registry.message_count()
    );
}

fn find_session(registry: &SessionRegistry, prefix: &str) -> Result<Uuid, String> {
    let matches: Vec<Uuid> = registry
        .sessions()
        .map(|s| s.id)
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(format!("No session starts with {prefix:?}")),
        _ => Err(format!("{} sessions start with {prefix:?}", matches.len())),
    }
}

fn print_transcript(chat: &ChatOrchestrator) {
    for message in chat.transcript() {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "axiom",
        };
        println!("{who}> {}", message.content);
    }
}

fn print_search(chat: &ChatOrchestrator, query: &str) {
    let hits = chat.search(query);
    if hits.is_empty() {
        println!("No matches.");
        return;
    }
    for message in hits {
        let line: String = highlight(&message.content, query)
            .into_iter()
            .map(|seg| {
                if seg.matched {
                    format!("[{}]", seg.text)
                } else {
                    seg.text.to_string()
                }
            })
            .collect();
        println!("{:>9}: {line}", message.role.as_str());
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Builds attachment metadata for a local file.
async fn describe_file(path: &Path) -> std::io::Result<Attachment> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    let absolute = tokio::fs::canonicalize(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| absolute.display().to_string());
    Ok(Attachment::new(
        name,
        guess_mime(path),
        meta.len(),
        format!("file://{}", absolute.display()),
    ))
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "log" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}
