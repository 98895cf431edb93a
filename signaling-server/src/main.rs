use std::net::SocketAddr;

use clap::Parser;
use log::{info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use webrtc_http_protocol::DEFAULT_RELAY_PORT;
use webrtc_http_signaling_server::{signaling_filter, RelayState};

#[derive(Debug, Parser)]
#[command(name = "webrtc-http-signaling-server")]
#[command(about = "Relays signaling messages between webrtc-http servers and clients")]
struct Args {
    /// Address the websocket endpoint listens on
    #[arg(long, env = "SIGNALING_ADDRESS", default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_RELAY_PORT)))]
    address: SocketAddr,

    #[arg(long, env = "SIGNALING_LOG_LEVEL", default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    TermLogger::init(
        args.log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let state = RelayState::default();
    info!("signaling server is listening on ws://{}", args.address);
    warp::serve(signaling_filter(state)).run(args.address).await;
    Ok(())
}
