use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use webrtc_http::one_to_one::NetworkManager;
use webrtc_http::transport::{relay, LocalBus, TransportConfig};
use webrtc_http::{ConnectionType, SessionId};

use routes::{Route, RouteTable};

mod console;
mod routes;

#[derive(Debug, Parser)]
#[command(name = "webrtc-http-playground")]
#[command(about = "Serve a route table over a WebRTC data channel, or send requests to one")]
struct Cli {
    #[arg(long, global = true, env = "PLAYGROUND_LOG_LEVEL", default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a session on the signaling server and answer requests
    Server {
        #[command(flatten)]
        peer: PeerArgs,
        /// Extra route as PATH=BODY, may be repeated
        #[arg(long = "route")]
        routes: Vec<Route>,
    },
    /// Join a session on the signaling server and send requests from stdin
    Client {
        #[command(flatten)]
        peer: PeerArgs,
    },
    /// Run both roles in this process
    Local {
        #[command(flatten)]
        peer: PeerArgs,
        #[arg(long, value_enum, default_value_t = TransportKind::Local)]
        transport: TransportKind,
        #[arg(long = "route")]
        routes: Vec<Route>,
    },
}

#[derive(Debug, Args)]
struct PeerArgs {
    #[arg(long, env = "PLAYGROUND_SESSION", default_value = "playground")]
    session: SessionId,

    #[arg(long, env = "PLAYGROUND_RELAY_URL", default_value = "ws://127.0.0.1:8080")]
    relay_url: String,

    /// STUN host, e.g. stun.l.google.com:19302
    #[arg(long)]
    stun: Option<String>,

    #[arg(long, requires = "stun", requires = "turn_credential")]
    turn_username: Option<String>,

    #[arg(long, requires = "turn_username")]
    turn_credential: Option<String>,
}

impl PeerArgs {
    fn connection_type(&self) -> ConnectionType {
        match (&self.stun, &self.turn_username, &self.turn_credential) {
            (Some(host), Some(username), Some(credential)) => ConnectionType::StunAndTurn {
                host: host.clone(),
                username: username.clone(),
                credential: credential.clone(),
            },
            (Some(host), _, _) => ConnectionType::Stun { host: host.clone() },
            _ => ConnectionType::Local,
        }
    }

    fn relay(&self) -> TransportConfig {
        TransportConfig::Relay {
            url: self.relay_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    Local,
    Relay,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    TermLogger::init(
        cli.log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    match cli.command {
        Command::Server { peer, routes } => {
            let table = RouteTable::default().with_routes(routes);
            let server = NetworkManager::new(peer.connection_type(), peer.relay())
                .with_request_handler(table.clone());
            serve(server, peer.session, &table).await
        }
        Command::Client { peer } => {
            let mut client = NetworkManager::new(peer.connection_type(), peer.relay());
            client.connect_as_client(peer.session).await?;
            console::run(&mut client).await?;
            client.close().await;
            Ok(())
        }
        Command::Local {
            peer,
            transport,
            routes,
        } => {
            let config = match transport {
                TransportKind::Local => TransportConfig::Local(LocalBus::default()),
                TransportKind::Relay => peer.relay(),
            };
            let table = RouteTable::default().with_routes(routes);
            let mut server = NetworkManager::new(peer.connection_type(), config.clone())
                .with_request_handler(table.clone());
            server.connect_as_server(peer.session.clone()).await?;
            if let TransportKind::Relay = transport {
                wait_for_registration(&peer.relay_url, &peer.session).await?;
            }
            info!("serving {}", table.paths().collect::<Vec<_>>().join(", "));

            let mut client = NetworkManager::new(peer.connection_type(), config);
            client.connect_as_client(peer.session).await?;
            console::run(&mut client).await?;
            client.close().await;
            server.close().await;
            Ok(())
        }
    }
}

/// Answer clients one after another until interrupted.
async fn serve(
    mut server: NetworkManager,
    session: SessionId,
    table: &RouteTable,
) -> Result<(), Box<dyn std::error::Error>> {
    server.connect_as_server(session.clone()).await?;
    info!(
        "serving {} on session {session}",
        table.paths().collect::<Vec<_>>().join(", ")
    );
    loop {
        let Some(mut state) = server.subscribe() else {
            break;
        };
        let ended = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            reached = state.wait_for(|state| state.is_terminal()) => reached.map(|state| state.clone()),
        };
        match ended {
            Ok(state) => info!("session {session} {state}, waiting for the next client"),
            Err(_) => warn!("session task for {session} went away"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        server.reset().await;
    }
    server.close().await;
    Ok(())
}

async fn wait_for_registration(url: &str, session: &SessionId) -> webrtc_http::Result<()> {
    for _ in 0..50 {
        if relay::probe(url, session).await? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    warn!("{session} is still not registered at {url}");
    Ok(())
}
