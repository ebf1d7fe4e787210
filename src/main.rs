use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tether_a2a::server::EchoAgent;
use tether_a2a::{A2aClient, A2aEvent, Credential, Message, Part};
use tether_core::bootstrap::{build_client, build_server, load_config};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "tether", version, about = "Agent-to-agent task protocol runtime")]
struct Cli {
    /// Config file; falls back to `TETHER_CONFIG`, then `config/default.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the built-in echo agent
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send a message to a remote agent and stream the reply
    Send {
        /// Base URL of the remote agent
        agent: String,
        text: String,
        /// Continue an existing task waiting for input
        #[arg(long)]
        task_id: Option<String>,
        /// Use this API key instead of resolving one
        #[arg(long, env = "TETHER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Return after the task is accepted instead of streaming events
        #[arg(long)]
        no_wait: bool,
    },
    /// Stream events of an existing task
    Watch { agent: String, task_id: String },
    /// Print the current state of a task
    Status { agent: String, task_id: String },
    /// Request cancellation of a task
    Cancel { agent: String, task_id: String },
    /// Fetch and print a remote agent card
    Card { agent: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config)?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(&config).await
        }
        Commands::Send {
            agent,
            text,
            task_id,
            api_key,
            no_wait,
        } => {
            let client = build_client(&config)?;
            let credential = api_key.map(Credential::api_key);
            let message = Message::user_text(text);
            let task_id = if let Some(task_id) = task_id {
                client.track_task(&task_id, agent.as_str(), credential).await?;
                client.continue_task(&task_id, message).await?;
                task_id
            } else {
                client.initiate_task(agent.as_str(), message, credential).await?
            };
            println!("task {task_id}");
            if no_wait {
                return Ok(());
            }
            watch_task(&client, &task_id).await
        }
        Commands::Watch { agent, task_id } => {
            let client = build_client(&config)?;
            client.track_task(&task_id, agent.as_str(), None).await?;
            watch_task(&client, &task_id).await
        }
        Commands::Status { agent, task_id } => {
            let client = build_client(&config)?;
            client.track_task(&task_id, agent.as_str(), None).await?;
            let task = client.get_task_status(&task_id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Commands::Cancel { agent, task_id } => {
            let client = build_client(&config)?;
            client.track_task(&task_id, agent.as_str(), None).await?;
            if client.terminate_task(&task_id).await? {
                println!("task {task_id} canceled");
            } else {
                println!("task {task_id} already finished");
            }
            Ok(())
        }
        Commands::Card { agent } => {
            let client = build_client(&config)?;
            let card = client.discover(&agent).await?;
            println!("{}", serde_json::to_string_pretty(&card)?);
            Ok(())
        }
    }
}

async fn serve(config: &tether_core::config::Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(
        agent = %config.agent.name,
        url = %config.server.advertised_url(),
        "serving echo agent"
    );
    build_server(config, Arc::new(EchoAgent), shutdown_rx)
        .serve()
        .await
        .context("A2A server failed")
}

async fn watch_task(client: &A2aClient, task_id: &str) -> anyhow::Result<()> {
    let mut events = client.receive_messages(task_id).await?;
    let cancel = events.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    while let Some(event) = events.next().await {
        print_event(&event?);
    }
    Ok(())
}

fn print_event(event: &A2aEvent) {
    match event {
        A2aEvent::StatusUpdate(update) => match &update.status.message {
            Some(note) => println!("[{}] {note}", update.status.state),
            None => println!("[{}]", update.status.state),
        },
        A2aEvent::Message(msg) => {
            for part in &msg.message.parts {
                match part {
                    Part::Text { text } => println!("{}: {text}", msg.message.role.as_str()),
                    other => println!("{}: {}", msg.message.role.as_str(), part_json(other)),
                }
            }
        }
        A2aEvent::ArtifactUpdate(update) => {
            println!("artifact {}", update.artifact.name.as_deref().unwrap_or("(unnamed)"));
        }
    }
}

fn part_json(part: &Part) -> String {
    serde_json::to_string(part).unwrap_or_default()
}
