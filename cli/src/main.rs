use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use valezap_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, ObservabilityEvent, ProcessKind,
};
use valezap_sync::{
    load_history_once, resolve_identity, spawn_session, ChatTransport, ClientConfig, Conversation,
    HttpTransport, MemorySink, PresentationSink, RenderHandle, SessionOptions,
};
use valezap_types::{LifecycleState, Message, Origin};

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "valezap")]
#[command(about = "Chat with a Valezap assistant from the terminal")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Backend base URL. Overrides VALEZAP_SERVER_URL.
    #[arg(long, global = true)]
    server: Option<String>,
    /// Overrides VALEZAP_CLIENT_API_KEY.
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Use this player id instead of the persisted one.
    #[arg(long, global = true, env = "VALEZAP_PLAYER_ID")]
    player: Option<String>,
    /// Join an existing session instead of starting a new one.
    #[arg(long, global = true, env = "VALEZAP_SESSION_ID")]
    session: Option<String>,
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat. `/status` prints the sync state, `/quit` exits.
    Chat,
    /// Print a session's stored history and exit.
    History {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let process = match cli.command {
        Command::Chat => ProcessKind::Chat,
        Command::History { .. } => {
            history_session(&cli.connection)?;
            ProcessKind::History
        }
    };

    let config = build_config(&cli.connection)?;
    let logs_dir = canonical_logs_dir_from_root(&config.state_dir);
    let (_log_guard, log_info) =
        init_process_logging(process, &logs_dir, LOG_RETENTION_DAYS, "warn")?;
    emit_event(
        tracing::Level::INFO,
        process,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "cli.main",
            status: Some("ok"),
            detail: Some("cli jsonl logging initialized"),
            ..Default::default()
        },
    );
    info!("cli logging initialized: {:?}", log_info);

    let identity = resolve_identity(
        &config.state_dir,
        cli.connection.player.clone(),
        cli.connection.session.clone(),
    )
    .await
    .context("failed to resolve player identity")?;
    info!(
        "player={} session={} server={}",
        identity.player_id,
        identity.session_id,
        config.base_url()
    );
    let transport = HttpTransport::new(&config)
        .context("failed to build http client")?
        .with_process(process);

    match cli.command {
        Command::Chat => run_chat(config, identity.conversation_key(), transport).await,
        Command::History { json } => {
            let mut conversation = Conversation::new(
                identity.conversation_key(),
                MemorySink::new(),
                config.failure_notice.clone(),
            );
            load_history_once(&transport, &mut conversation)
                .await
                .context("failed to load history")?;
            print_history(conversation.sink(), json)
        }
    }
}

/// A fresh session id would always print nothing, so `history` must name one.
fn history_session(args: &ConnectionArgs) -> anyhow::Result<&str> {
    args.session
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "history needs --session <id> (or VALEZAP_SESSION_ID); the session id is printed when `valezap chat` starts"
            )
        })
}

fn build_config(args: &ConnectionArgs) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::from_env()?;
    if let Some(server) = args.server.as_ref().filter(|s| !s.trim().is_empty()) {
        config.server_base_url = server.trim().to_string();
    }
    if let Some(api_key) = &args.api_key {
        config.api_key = api_key.clone();
    }
    if let Some(dir) = &args.state_dir {
        config.state_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run_chat(
    config: ClientConfig,
    conversation_key: valezap_types::ConversationKey,
    transport: HttpTransport,
) -> anyhow::Result<()> {
    println!(
        "session {} as player {} (/status, /quit)",
        conversation_key.session_id, conversation_key.player_id
    );
    let conversation = Conversation::new(
        conversation_key,
        TerminalSink::default(),
        config.failure_notice.clone(),
    );
    let transport: Arc<dyn ChatTransport> = Arc::new(transport);
    let options = SessionOptions::from_config(&config, ProcessKind::Chat);
    let (handle, task) = spawn_session(transport, conversation, options);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/status" => match handle.snapshot().await {
                Some(snapshot) => eprintln!("{}", serde_json::to_string(&snapshot)?),
                None => break,
            },
            text => {
                if !handle.submit(text).await {
                    eprintln!("(waiting for a reply; message not sent)");
                }
            }
        }
    }

    handle.shutdown().await;
    task.await.context("chat session task failed")?;
    Ok(())
}

fn print_history(sink: &MemorySink, json: bool) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for message in sink.messages() {
        if json {
            writeln!(out, "{}", serde_json::to_string(message)?)?;
        } else {
            writeln!(out, "{}", format_row(message))?;
        }
    }
    Ok(())
}

fn format_row(message: &Message) -> String {
    let at: DateTime<Utc> = message.timestamp.unwrap_or_else(Utc::now);
    let who = match message.origin {
        Origin::User => "you",
        Origin::Assistant => "bot",
    };
    let marker = match message.state {
        LifecycleState::Pending => " …",
        LifecycleState::Confirmed => "",
    };
    format!(
        "[{}] {who}: {}{marker}",
        at.with_timezone(&Local).format("%H:%M"),
        message.text
    )
}

/// Line-oriented sink. Rows cannot be edited in place, so updates and
/// removals are printed as short follow-up lines.
#[derive(Default)]
struct TerminalSink {
    next_handle: u64,
    rows: HashMap<RenderHandle, String>,
    status: String,
}

impl PresentationSink for TerminalSink {
    fn render(&mut self, message: &Message) -> RenderHandle {
        self.next_handle += 1;
        let handle = RenderHandle::new(self.next_handle);
        self.rows.insert(handle, message.text.clone());
        println!("{}", format_row(message));
        handle
    }

    fn update(&mut self, handle: RenderHandle, message: &Message) {
        self.rows.insert(handle, message.text.clone());
        if message.state == LifecycleState::Confirmed && message.origin == Origin::User {
            println!("  (delivered)");
        }
    }

    fn remove(&mut self, handle: RenderHandle) {
        if let Some(text) = self.rows.remove(&handle) {
            println!("  (not delivered: {text})");
        }
    }

    fn set_status(&mut self, status: &str) {
        if self.status != status {
            self.status = status.to_string();
            eprintln!("-- {status}");
        }
    }
}
