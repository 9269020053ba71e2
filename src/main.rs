use anyhow::Result;
use clap::{CommandFactory, Parser};
use commentcast::cli::{Cli, Commands, ConfigAction};
use commentcast::config::Config;
use commentcast::daemon::{build_controller, run_daemon};
use commentcast::ipc::client::{follow, send_command};
use commentcast::ipc::protocol::{Command, Response, WireEvent};
use commentcast::ipc::server::IpcServer;
use commentcast::output::{format_context, format_event, format_health, format_report, save_audio};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Daemon { mock } => {
            let config = load_config(cli.config.as_deref())?;
            run_daemon(config, cli.socket, mock, cli.quiet).await?;
        }
        Commands::Start { source, label } => {
            let command = Command::Start {
                source: source.unwrap_or_default(),
                label,
            };
            handle_ipc_command(cli.socket, command, false).await?;
        }
        Commands::Stop => {
            handle_ipc_command(cli.socket, Command::Stop, false).await?;
        }
        Commands::Health { json } => {
            handle_ipc_command(cli.socket, Command::Health, json).await?;
        }
        Commands::Context { json } => {
            handle_ipc_command(cli.socket, Command::GetContext, json).await?;
        }
        Commands::TestRewrite { english } => {
            handle_ipc_command(cli.socket, Command::TestRewrite { english }, false).await?;
        }
        Commands::TestBroadcast { english } => {
            handle_ipc_command(cli.socket, Command::TestBroadcast { english }, false).await?;
        }
        Commands::Follow {
            save_audio,
            until_stopped,
        } => {
            handle_follow(cli.socket, save_audio, until_stopped, cli.quiet).await?;
        }
        Commands::Run {
            source,
            label,
            mock,
            save_audio,
            duration,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let label = label.unwrap_or_else(|| source.clone());
            run_foreground(config, &source, &label, mock, save_audio, duration, cli.quiet).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "commentcast",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Logs go to stderr. `RUST_LOG` wins over the verbosity flags.
fn init_logging(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "commentcast=warn",
        (false, 0) => "commentcast=info",
        (false, 1) => "commentcast=debug",
        (false, _) => "commentcast=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/commentcast/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Send IPC command to daemon and print the response.
async fn handle_ipc_command(socket: Option<PathBuf>, command: Command, json: bool) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);

    let response = match send_command(&socket_path, command).await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Failed to reach daemon: {}", e);
            eprintln!("Is the daemon running? Start it with: commentcast daemon");
            std::process::exit(1);
        }
    };

    match response {
        Response::Ok => println!("{}", "OK".green()),
        Response::Started { session } => {
            println!("{} session {}", "Started".green(), session.id);
            println!("  {}  {}", "Source:".dimmed(), session.source);
            println!("  {}   {}", "Label:".dimmed(), session.label);
        }
        Response::Stopped { session } => {
            println!("{} session {} ({})", "Stopped".green(), session.id, session.state);
        }
        Response::Rewrite { report } => println!("{}", format_report(&report)),
        Response::Context { snapshot } => match (snapshot, json) {
            (Some(snapshot), true) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            (Some(snapshot), false) => println!("{}", format_context(&snapshot)),
            (None, _) => println!("{}", "No race context yet".yellow()),
        },
        Response::Health { health } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                println!("Client:     {}", commentcast::version_string());
                println!("{}", format_health(&health));
            }
        }
        Response::Following => {}
        Response::Error { message } => {
            eprintln!("{} {}", "Error:".red(), message);
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Print (and optionally save) one delivery event. Returns true for terminal status events.
fn render(event: &WireEvent, audio_dir: Option<&Path>, quiet: bool) -> bool {
    if let Some(dir) = audio_dir {
        match save_audio(dir, event) {
            Ok(Some(path)) if !quiet => println!("{}", format!("  saved {}", path.display()).dimmed()),
            Ok(_) => {}
            Err(e) => eprintln!("Failed to save audio: {}", e),
        }
    } else if !quiet || !matches!(event, WireEvent::Audio { .. }) {
        println!("{}", format_event(event));
    }

    matches!(event, WireEvent::Status { state, .. } if state.is_terminal())
}

/// Follow daemon events until the stream closes.
async fn handle_follow(
    socket: Option<PathBuf>,
    audio_dir: Option<PathBuf>,
    until_stopped: bool,
    quiet: bool,
) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);

    let mut stream = match follow(&socket_path).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Failed to follow daemon: {}", e);
            eprintln!("Is the daemon running? Start it with: commentcast daemon");
            std::process::exit(1);
        }
    };
    if !quiet {
        eprintln!("Following commentary... (Ctrl+C to stop)");
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = stream.next_event() => event?,
        };
        let Some(event) = event else {
            eprintln!("Daemon connection closed");
            break;
        };
        if render(&event, audio_dir.as_deref(), quiet) && until_stopped {
            break;
        }
    }
    Ok(())
}

/// Run one session in-process and print its commentary.
///
/// Ctrl+C or the `--for` deadline stops the session; the loop keeps
/// printing until the drained session reports a terminal state.
async fn run_foreground(
    config: Config,
    source: &str,
    label: &str,
    mock: bool,
    audio_dir: Option<PathBuf>,
    duration: Option<Duration>,
    quiet: bool,
) -> Result<()> {
    let controller = Arc::new(build_controller(config, mock)?);
    let mut events = controller.subscribe();
    let handle = controller.start(source, label).await?;
    if !quiet {
        eprintln!("Session {} on {} (Ctrl+C to stop)", handle.id(), source);
    }

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut stopping = false;

    loop {
        let stop_requested = tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if render(&WireEvent::from(&event), audio_dir.as_deref(), quiet) {
                    break;
                }
                false
            }
            _ = tokio::signal::ctrl_c(), if !stopping => true,
            _ = &mut deadline, if !stopping => true,
        };

        if stop_requested {
            stopping = true;
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                if let Err(e) = controller.stop().await {
                    tracing::warn!("Failed to stop session: {}", e);
                }
            });
        }
    }

    let health = controller.health();
    if !quiet {
        eprintln!();
        eprintln!("{}", format_health(&health));
    }
    if let Some(failure) = health.last_failure {
        anyhow::bail!("session failed: {}", failure);
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let mut config = load_config(custom_path)?;
            for key in [
                &mut config.transcription.api_key,
                &mut config.rewrite.api_key,
                &mut config.synthesis.api_key,
            ] {
                if !key.is_empty() {
                    *key = "********".to_string();
                }
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Dump => {
            print!("{}", toml::to_string_pretty(&Config::default())?);
        }
    }
    Ok(())
}
