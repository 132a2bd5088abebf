use clap::Parser;
use meshlobby_lib::commands::{self, Command, HELP};
use meshlobby_lib::config::{AnswerPolicy, LobbyConfig};
use meshlobby_lib::utils::random_id;
use meshlobby_lib::{logger, Error, Lobby, LobbyDeps, LobbyEvent, LobbyHandle, Peer};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Lobby chat and peer-to-peer calls over a relay")]
struct Cli {
    /// Relay WebSocket URL
    #[arg(long, env = meshlobby_lib::config::RELAY_URL_ENV)]
    relay_url: Option<String>,

    /// Name shown to other peers
    #[arg(long, default_value = "guest")]
    name: String,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept incoming calls without asking
    #[arg(long)]
    auto_answer: bool,
}

fn print_event(event: &LobbyEvent) {
    match event {
        LobbyEvent::RelayStateChanged(state) => println!("* relay {:?}", state),
        LobbyEvent::PeerJoined(_) | LobbyEvent::PeerLeft(_) => {}
        LobbyEvent::PeerExpired(peer) => {
            println!("* {} ({}) timed out", peer.display_name, peer.peer_id)
        }
        LobbyEvent::Chat(entry) => match &entry.author {
            Some(author) => println!(
                "[{}] {}: {}",
                entry.timestamp.format("%H:%M"),
                author,
                entry.content
            ),
            None => println!("* {}", entry.content),
        },
        LobbyEvent::IncomingCall(peer) => println!(
            "* {} is calling, /accept {} or /reject {}",
            peer.display_name, peer.peer_id, peer.peer_id
        ),
        LobbyEvent::CallStateChanged { peer_id, state } => {
            println!("* call with {}: {:?}", peer_id, state)
        }
        LobbyEvent::CallRejected(peer) => println!("* {} rejected the call", peer.display_name),
        LobbyEvent::CallFailed { peer_id, reason } => {
            println!("* call with {} failed: {}", peer_id, reason)
        }
        LobbyEvent::RemoteTrack {
            peer_id,
            kind,
            track_id,
        } => println!("* receiving {} from {} ({})", kind, peer_id, track_id),
    }
}

async fn execute(lobby: &LobbyHandle, cmd: Command) -> meshlobby_lib::Result<bool> {
    match cmd {
        Command::Call(peer_id) => lobby.call(&peer_id).await?,
        Command::Accept(peer_id) => lobby.answer_call(&peer_id, true).await?,
        Command::Reject(peer_id) => lobby.answer_call(&peer_id, false).await?,
        Command::HangUp(peer_id) => lobby.hang_up(&peer_id).await?,
        Command::Peers => {
            for peer in lobby.peers().await? {
                println!("  {}  {}", peer.peer_id, peer.display_name);
            }
        }
        Command::Calls => {
            for (peer_id, state) in lobby.active_calls().await? {
                println!("  {}  {:?}", peer_id, state);
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
        Command::Chat(text) => lobby.send_chat(&text).await?,
        Command::Invalid(hint) => println!("{hint}"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> meshlobby_lib::Result<()> {
    logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LobbyConfig::from_file(path)?,
        None => LobbyConfig::default(),
    }
    .with_env_overrides();
    if let Some(url) = cli.relay_url {
        config.relay_url = url;
    }
    if cli.auto_answer {
        config.answer_policy = AnswerPolicy::AutoAccept;
    }

    let deps = LobbyDeps::production(&config);
    let (lobby, mut events) = Lobby::start(config, Peer::new(random_id(), cli.name), deps)?;
    let me = lobby.self_peer();
    println!("You are {} ({}), /help for commands", me.display_name, me.peer_id);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(cmd) = commands::parse(&line) else { continue };
                match execute(&lobby, cmd).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(Error::Shutdown) => break,
                    Err(e) => println!("! {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Leaving the lobby");
    lobby.shutdown().await
}
