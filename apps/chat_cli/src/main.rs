use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    load_settings, AttachmentUpload, Draft, EngineHandle, FileCredentialStore, HttpApiClient,
    SendError, SessionError, SyncEngine, WebSocketTransport,
};
use shared::domain::UserId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;
mod terminal_view;

use commands::{parse, CliCommand, HELP};
use terminal_view::TerminalView;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides `server_url` from client.toml / the environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
    /// Register a new account with this username instead of logging in.
    #[arg(long)]
    register: Option<String>,
    #[arg(long)]
    credential_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = &args.server_url {
        settings.server_url = server_url.trim_end_matches('/').to_string();
    }
    if let Some(path) = &args.credential_path {
        settings.credential_path = path.clone();
    }

    let api = Arc::new(HttpApiClient::new(&settings.server_url));
    let transport = Arc::new(WebSocketTransport::new(&settings.server_url));
    let credentials = Arc::new(FileCredentialStore::new(&settings.credential_path));
    let (engine, handle) =
        SyncEngine::new(&settings, api, transport, credentials, TerminalView::default());
    let engine_task = tokio::spawn(engine.run());

    let outcome = match authenticate(&handle, &args).await {
        Ok(()) => {
            println!("{HELP}");
            repl(&handle).await
        }
        Err(err) => Err(err),
    };

    let _ = handle.shutdown();
    engine_task.await.context("sync engine task failed")?;
    outcome
}

async fn authenticate(handle: &EngineHandle, args: &Args) -> Result<()> {
    let result = match (&args.email, &args.password) {
        (Some(email), Some(password)) => match &args.register {
            Some(username) => handle.register(username, email, password).await,
            None => handle.login(email, password).await,
        },
        (Some(_), None) | (None, Some(_)) => bail!("--email and --password go together"),
        (None, None) => handle.resume().await,
    };

    match result {
        Ok(_) => Ok(()),
        Err(SessionError::NoCredential) => {
            bail!("no saved session, log in with --email and --password")
        }
        Err(err) => Err(err).context("authentication failed"),
    }
}

async fn repl(handle: &EngineHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut failed_draft: Option<Draft> = None;

    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("! {err}");
                continue;
            }
        };

        match command {
            CliCommand::Empty => {}
            CliCommand::Help => println!("{HELP}"),
            CliCommand::Quit => break,
            CliCommand::Logout => {
                handle.logout()?;
                break;
            }
            CliCommand::Users => print_users(handle).await?,
            CliCommand::Status => {
                let (state, attempts) = handle.connection_state().await?;
                println!("* {state:?} (reconnect attempts: {attempts})");
            }
            CliCommand::Direct(name) => match resolve_user(handle, &name).await? {
                Some(user_id) => handle.select_peer(user_id)?,
                None => eprintln!("! no user named {name}"),
            },
            CliCommand::Broadcast(enabled) => handle.set_broadcast_mode(enabled)?,
            CliCommand::ToggleRecipient(name) => match resolve_user(handle, &name).await? {
                Some(user_id) => handle.toggle_broadcast_recipient(user_id)?,
                None => eprintln!("! no user named {name}"),
            },
            CliCommand::More => handle.load_older_history()?,
            CliCommand::Refresh => handle.refresh()?,
            CliCommand::Retry => match failed_draft.take() {
                Some(draft) => failed_draft = send(handle, draft).await,
                None => eprintln!("! nothing to retry"),
            },
            CliCommand::Say(text) => failed_draft = send(handle, Draft::text(text)).await,
            CliCommand::SendFile { path, caption } => {
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        eprintln!("! cannot read {}: {err}", path.display());
                        continue;
                    }
                };
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "attachment".into());
                let draft = Draft::text(caption).with_attachment(AttachmentUpload {
                    filename,
                    mime_type: None,
                    bytes,
                });
                failed_draft = send(handle, draft).await;
            }
        }
    }
    Ok(())
}

/// Returns the draft back when the send failed so it can be retried.
async fn send(handle: &EngineHandle, draft: Draft) -> Option<Draft> {
    match handle.send(draft.clone()).await {
        Ok(_) => None,
        Err(SendError::EngineStopped) => {
            warn!("chat_cli: engine stopped while sending");
            None
        }
        Err(err) => {
            eprintln!("! {err} (draft kept, /retry to resend)");
            Some(draft)
        }
    }
}

async fn resolve_user(handle: &EngineHandle, name: &str) -> Result<Option<UserId>> {
    let Some(snapshot) = handle.snapshot().await? else {
        return Ok(None);
    };
    Ok(snapshot
        .roster
        .iter()
        .find(|user| user.username.eq_ignore_ascii_case(name) || user.id.to_string() == name)
        .map(|user| user.id))
}

async fn print_users(handle: &EngineHandle) -> Result<()> {
    let Some(snapshot) = handle.snapshot().await? else {
        println!("* not logged in");
        return Ok(());
    };
    for user in &snapshot.roster {
        let marker = if user.is_online { "online" } else { "offline" };
        println!("  {} ({marker})", user.username);
    }
    Ok(())
}
