use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chatwin_core::{
    AppAction, AppConfig, AppReconciler, AppState, AppUpdate, CentrifugoConnector, ChatApp, ChatService,
    ConnectionState, HttpChatService, RealtimeConnector,
};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "chatwin")]
#[command(about = "Terminal chat window for the chat service")]
struct Cli {
    /// State directory (chatwin_config.json is read from here)
    #[arg(long, default_value = ".chatwin")]
    state_dir: PathBuf,

    /// Chat service base URL [default: config `api_base_url`, then http://localhost:8000]
    #[arg(long, env = "CHATWIN_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the chat service [default: config `api_token`]
    #[arg(long, env = "CHATWIN_API_TOKEN")]
    api_token: Option<String>,

    /// Per-request timeout in seconds [default: config `request_timeout_secs`, then 15]
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open a chat window with live updates (reads commands from stdin)
    Open {
        /// Chat id
        chat_id: String,
    },

    /// Print a chat's history once and exit
    History {
        /// Chat id
        chat_id: String,

        /// Print messages as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.state_dir)
        .with_context(|| format!("create state dir {}", cli.state_dir.display()))?;

    let config = chatwin_core::load_app_config(&cli.state_dir.to_string_lossy());
    let settings = ServiceSettings::resolve(&cli, &config);
    let service: Arc<dyn ChatService> = Arc::new(
        HttpChatService::new(&settings.api_url, settings.api_token, settings.timeout)
            .context("build chat service client")?,
    );

    match &cli.cmd {
        Command::Open { chat_id } => cmd_open(&cli, service, chat_id),
        Command::History { chat_id, json } => cmd_history(service, chat_id, *json),
    }
}

/// Flags win over `chatwin_config.json`, which wins over built-in defaults.
#[derive(Debug, PartialEq)]
struct ServiceSettings {
    api_url: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl ServiceSettings {
    fn resolve(cli: &Cli, config: &AppConfig) -> Self {
        Self {
            api_url: cli
                .api_url
                .clone()
                .unwrap_or_else(|| config.api_base_url()),
            api_token: cli.api_token.clone().or_else(|| config.api_token()),
            timeout: cli
                .timeout
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.request_timeout()),
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────────────

fn cmd_history(service: Arc<dyn ChatService>, chat_id: &str, json: bool) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("start tokio runtime")?;
    let mut history = runtime
        .block_on(service.fetch_chat_history(chat_id))
        .with_context(|| format!("fetch history for chat {chat_id}"))?;
    let messages = chatwin_core::reconcile::display_order(history.chats.take().unwrap_or_default());

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    println!("# {} ({} members)", history.chat_name, history.members.len());
    if !history.description.is_empty() {
        println!("  {}", history.description);
    }
    for m in &messages {
        println!("[{}] {}: {}", m.id, m.sender_name, m.text);
    }
    Ok(())
}

fn cmd_open(cli: &Cli, service: Arc<dyn ChatService>, chat_id: &str) -> anyhow::Result<()> {
    let connector: Arc<dyn RealtimeConnector> =
        Arc::new(CentrifugoConnector::new(service.clone()));
    let state_dir = cli
        .state_dir
        .to_str()
        .context("state dir must be valid utf-8")?;
    let app = ChatApp::with_backends(state_dir, service, connector);
    app.listen_for_updates(Box::new(Renderer::default()));
    app.dispatch(AppAction::OpenChat {
        chat_id: chat_id.to_string(),
    });

    eprintln!("type a message and press enter; /help lists commands");
    for line in std::io::stdin().lock().lines() {
        let line = line.context("read stdin")?;
        match parse_line(&line) {
            Input::Quit => break,
            Input::Help => print_help(),
            Input::Ignore => {}
            Input::Usage(usage) => eprintln!("usage: {usage}"),
            Input::Actions(actions) => {
                for action in actions {
                    app.dispatch(action);
                }
            }
        }
    }
    app.dispatch(AppAction::CloseChat);
    Ok(())
}

// ── Input ───────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Input {
    Actions(Vec<AppAction>),
    Usage(&'static str),
    Help,
    Quit,
    Ignore,
}

fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Ignore;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Actions(vec![AppAction::SendMessage {
            text: line.to_string(),
        }]);
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));
    let one = |action: AppAction| Input::Actions(vec![action]);

    match name {
        "quit" | "q" => Input::Quit,
        "help" => Input::Help,
        "reload" => one(AppAction::ReloadChat),
        "cancel" => one(AppAction::CancelEdit),
        "edit" => {
            let (id, text) = rest
                .split_once(char::is_whitespace)
                .map(|(i, t)| (i, t.trim()))
                .unwrap_or((rest, ""));
            if id.is_empty() {
                return Input::Usage("/edit <message_id> [new text]");
            }
            let mut actions = vec![AppAction::StartEdit {
                message_id: id.to_string(),
            }];
            if !text.is_empty() {
                actions.push(AppAction::CommitEdit {
                    text: text.to_string(),
                });
            }
            Input::Actions(actions)
        }
        "save" if !rest.is_empty() => one(AppAction::CommitEdit {
            text: rest.to_string(),
        }),
        "save" => Input::Usage("/save <new text>"),
        "delete" if !rest.is_empty() => one(AppAction::DeleteMessage {
            message_id: rest.to_string(),
        }),
        "delete" => Input::Usage("/delete <message_id>"),
        "info" => one(AppAction::OpenChatInfo),
        "close" => one(AppAction::CloseChatInfo),
        "search" => one(AppAction::SearchProfiles {
            query: rest.to_string(),
        }),
        "select" if !rest.is_empty() => one(AppAction::ToggleProfileSelection {
            username: rest.to_string(),
        }),
        "select" => Input::Usage("/select <username>"),
        "add" => one(AppAction::AddSelectedMembers),
        "remove" if !rest.is_empty() => one(AppAction::RemoveMember {
            username: rest.to_string(),
        }),
        "remove" => Input::Usage("/remove <username>"),
        "dismiss" => one(AppAction::ClearToast),
        _ => Input::Usage("unknown command; /help lists commands"),
    }
}

fn print_help() {
    eprintln!(
        "\
  <text>                  send a message
  /edit <id> [text]       start editing (and save, if text is given)
  /save <text>            save the pending edit
  /cancel                 cancel the pending edit
  /delete <id>            delete a message
  /reload                 refetch the chat
  /info                   open the members panel
  /search <query>         search profiles to add
  /select <username>      toggle a search result
  /add                    add selected profiles
  /remove <username>      remove a member
  /close                  close the members panel
  /dismiss                clear the last notice
  /quit"
    );
}

// ── Rendering ───────────────────────────────────────────────────────────────

/// Prints whatever changed between consecutive snapshots.
#[derive(Default)]
struct Renderer {
    last: Mutex<Option<AppState>>,
}

impl AppReconciler for Renderer {
    fn reconcile(&self, update: AppUpdate) {
        let next = update.state().clone();
        let mut last = match self.last.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        // Updates are delivered in order, but skip anything not newer.
        if last.as_ref().is_some_and(|prev| prev.rev >= next.rev) {
            return;
        }
        render(last.as_ref(), &next);
        *last = Some(next);
    }
}

fn render(prev: Option<&AppState>, next: &AppState) {
    let changed = |f: &dyn Fn(&AppState) -> String| prev.map(f) != Some(f(next));

    if changed(&|s: &AppState| format!("{:?}", s.chat_info)) {
        if let Some(info) = &next.chat_info {
            println!("# {} ({} members)", info.chat_name, info.members.len());
            if !info.description.is_empty() {
                println!("  {}", info.description);
            }
        }
    }
    if changed(&|s: &AppState| format!("{:?}", s.connection)) {
        match &next.connection {
            ConnectionState::Disconnected => println!("-- live updates off"),
            ConnectionState::Connecting => println!("-- connecting..."),
            ConnectionState::Connected => println!("-- live"),
            ConnectionState::Failed { reason } => println!("-- live updates failed: {reason}"),
        }
    }
    if changed(&|s: &AppState| format!("{:?}", s.messages)) {
        println!("----");
        for m in &next.messages {
            println!("[{}] {}: {}", m.id, m.sender_name, m.text);
        }
    }
    if changed(&|s: &AppState| format!("{:?}", s.pending_edit)) {
        match &next.pending_edit {
            Some(edit) => println!(
                "-- editing [{}]: {} (/save <text> or /cancel)",
                edit.target_message_id, edit.draft_text
            ),
            None => {
                if prev.is_some_and(|p| p.pending_edit.is_some()) {
                    println!("-- edit closed");
                }
            }
        }
    }
    if changed(&|s: &AppState| format!("{:?}", s.membership)) {
        if let Some(panel) = &next.membership {
            println!("== members");
            for m in &panel.members {
                println!("   {} ({})", m.username, m.name);
            }
            if !panel.search_results.is_empty() {
                println!("== results for {:?}", panel.search_query);
                for m in &panel.search_results {
                    let mark = if panel.is_selected(&m.username) { "x" } else { " " };
                    println!("   [{mark}] {} ({})", m.username, m.name);
                }
            }
        }
    }
    if changed(&|s: &AppState| format!("{:?}", s.toast)) {
        if let Some(toast) = &next.toast {
            println!("!! {toast}");
        }
    }
}
