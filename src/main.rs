use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use inbox_sync::api::client::ApiClient;
use inbox_sync::api::socket::WsTransport;
use inbox_sync::app::{Settings, default_log_filter};
use inbox_sync::error::StartupError;
use inbox_sync::sync::coordinator::{ErrorScope, Selection};
use inbox_sync::sync::{ConnectionManager, InboxHandle, InboxView, SyncCoordinator, SyncService};
use inbox_sync::utils::RUNTIME;

#[derive(Parser)]
#[command(name = "inbox-sync")]
#[command(about = "Live support inbox for the admin dashboard")]
struct Cli {
    /// Settings file (defaults to inbox-sync.toml in the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Conversation to open once the directory is loaded
    #[arg(short, long)]
    select: Option<String>,
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = RUNTIME.block_on(run(cli)) {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let settings = Settings::load(cli.config.as_deref())?;
    settings.validate()?;

    let token = Some(settings.access_token.clone());
    let client = Arc::new(ApiClient::new(&settings.api_base_url(), token.clone())?);
    let transport = Arc::new(WsTransport::new(settings.socket_url()?, token));
    let connection = ConnectionManager::new(transport, settings.reconnect_policy());
    if ConnectionManager::install_global(connection.clone()).is_err() {
        warn!("A connection manager was already installed");
    }

    let operator = settings.operator();
    info!("Signed in as {} ({})", operator.display_name, operator.id);
    let coordinator = SyncCoordinator::new(operator, settings.page_size, settings.echo_tolerance());
    let inbox = SyncService::new(coordinator, client)
        .with_connection(connection)
        .spawn();

    if let Some(id) = cli.select {
        open_when_listed(&inbox, id);
    }

    let mut view = inbox.watch();
    tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            render(&current);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "select" | "open" => {
                inbox.select_conversation(rest.trim());
            }
            "send" => {
                inbox.send(rest, Vec::new());
            }
            "refresh" => {
                inbox.refresh();
            }
            "more" => {
                inbox.load_more();
            }
            "dismiss" => {
                inbox.dismiss_errors();
            }
            "quit" | "exit" => break,
            other => println!("unknown command `{other}` (select <id> | send <text> | refresh | more | dismiss | quit)"),
        }
    }

    inbox.shutdown();
    Ok(())
}

/// Selection is only valid for listed conversations, so wait for the first directory load.
fn open_when_listed(inbox: &InboxHandle, conversation_id: String) {
    let inbox = inbox.clone();
    tokio::spawn(async move {
        let mut view = inbox.watch();
        let listed = view
            .wait_for(|v| !v.loading_directory && !v.projection.sessions.is_empty())
            .await
            .is_ok();
        if listed {
            inbox.select_conversation(conversation_id);
        }
    });
}

fn render(view: &InboxView) {
    let projection = &view.projection;
    println!();
    println!(
        "== {} active | {} unread in {} conversations | push: {:?}{}",
        projection.active_count,
        projection.total_unread,
        projection.unread_conversations,
        view.connection,
        if view.degraded { " (live updates paused)" } else { "" },
    );
    for row in &projection.sessions {
        let marker = if row.selected { '>' } else { ' ' };
        let unread = if row.unread_count > 0 {
            format!(" [{}]", row.unread_count)
        } else {
            String::new()
        };
        println!(
            "{marker} [{}] {} <{}>{unread}  {}  {}",
            row.initials,
            row.name,
            row.email,
            row.at.format("%H:%M"),
            row.preview
        );
    }
    if view.has_more {
        println!("  ... more conversations (`more`)");
    }

    match &view.selection {
        Selection::NoSelection => {}
        Selection::Loading { conversation_id, .. } => println!("-- loading {conversation_id}"),
        Selection::Failed { conversation_id } => println!("-- {conversation_id} failed to load, select it again to retry"),
        Selection::Ready { conversation_id } => {
            println!("-- {conversation_id}");
            for pin in &projection.pinned {
                println!("   (pinned) {}: {}", pin.sender, pin.body);
            }
            for line in &projection.transcript {
                let who = if line.is_own { "you" } else { line.sender.as_str() };
                let pending = if line.pending { " (sending)" } else { "" };
                println!("   {} {who}: {}{pending}", line.sent_at.format("%H:%M"), line.body);
            }
        }
    }

    for e in &view.errors {
        match &e.scope {
            ErrorScope::Send { body, .. } => println!("!! message \"{body}\" not sent: {}", e.message),
            ErrorScope::History(id) => println!("!! history of {id}: {}", e.message),
            ErrorScope::Directory => println!("!! conversation list: {}", e.message),
            ErrorScope::Action => println!("!! {}", e.message),
        }
    }
}
