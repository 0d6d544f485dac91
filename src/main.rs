//! Terminal meeting client
//!
//! ```bash
//! peermeet --room R1 --signaling-url ws://localhost:8080
//! peermeet --room R1 --config meet.json --no-camera
//! ```

use clap::Parser;
use peermeet::commands::{dispatch, Outcome, UserCommand};
use peermeet::config::{SessionConfig, DEFAULT_LOG_FILTER};
use peermeet::media::StaticMediaSource;
use peermeet::peer::connection::RtcConnector;
use peermeet::peer::types::RoomId;
use peermeet::signaling::WsSignaling;
use peermeet::{logger, SessionCoordinator, SessionDeps, SessionHandle, SessionNotice};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Join a two-peer meeting room from the terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Room to join
    #[arg(short, long, env = "PEERMEET_ROOM")]
    room: String,

    /// Relay endpoint, overrides the config file
    #[arg(long, env = "PEERMEET_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// JSON session config
    #[arg(short, long, env = "PEERMEET_CONFIG")]
    config: Option<PathBuf>,

    /// Wait for the other side to offer
    #[arg(long, default_value_t = false, env = "PEERMEET_NO_AUTO_OFFER")]
    no_auto_offer: bool,

    #[arg(long, default_value_t = false, env = "PEERMEET_NO_CAMERA")]
    no_camera: bool,

    #[arg(long, default_value_t = false, env = "PEERMEET_NO_MICROPHONE")]
    no_microphone: bool,

    /// tracing filter used when RUST_LOG is unset
    #[arg(long, env = "PEERMEET_LOG")]
    log_filter: Option<String>,
}

fn load_config(args: &Args) -> peermeet::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    config.apply_env()?;
    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    if args.no_auto_offer {
        config.auto_offer = false;
    }
    config.constraints.video &= !args.no_camera;
    config.constraints.audio &= !args.no_microphone;
    config.validate()?;
    Ok(config)
}

fn print_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::StateChanged(state) => println!("* state: {state:?}"),
        SessionNotice::MediaUnavailable(reason) => {
            println!("* media unavailable ({reason}), continuing without it")
        }
        SessionNotice::ScreenShareStarted => println!("* sharing screen"),
        SessionNotice::ScreenShareFailed(reason) => println!("* screen share failed: {reason}"),
        SessionNotice::ScreenShareEnded => println!("* screen share ended"),
        SessionNotice::RemoteTrack(track) => println!("* receiving {:?} from peer", track.kind),
        SessionNotice::PeerLeft => println!("* peer left the room"),
        SessionNotice::ChatReceived(entry) => println!("<{}> {}", entry.author, entry.text),
        SessionNotice::ConnectionProblem => println!("* connection problem, waiting for it to recover"),
        SessionNotice::ConnectionRecovered => println!("* connection recovered"),
        SessionNotice::Ended(reason) => println!("* session ended: {reason}"),
    }
}

/// Reads stdin on its own thread so a pending read never holds up shutdown.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

async fn run_input(session: SessionHandle, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let command = match line.parse::<UserCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("* {e}");
                continue;
            }
        };
        match dispatch(&session, command).await {
            Ok(Outcome::Print(text)) => println!("* {text}"),
            Ok(Outcome::Silent) => {}
            Ok(Outcome::Quit) => break,
            Err(e) => println!("* {e}"),
        }
    }
    let _ = session.leave().await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logger::init(args.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER));

    let config = load_config(&args)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        room = %args.room,
        "peermeet starting"
    );

    let (signaling, signaling_events) = WsSignaling::connect(&config.signaling_url).await?;
    let media = StaticMediaSource {
        camera: !args.no_camera,
        microphone: !args.no_microphone,
        screen: true,
    };
    let deps = SessionDeps {
        media: Arc::new(media),
        connector: Arc::new(RtcConnector::new(config.ice_servers.clone())),
        signaling,
        signaling_events,
        tiebreak: None,
    };

    let (session, mut notices) = SessionCoordinator::spawn(config, deps);
    session.join(RoomId::new(args.room.clone())).await?;
    println!("* joined room {}, type /help for commands", args.room);

    let input = tokio::spawn(run_input(session.clone(), stdin_lines()));

    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Some(notice) => {
                    print_notice(&notice);
                    if matches!(notice, SessionNotice::Ended(_)) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, leaving");
                session.leave().await?;
            }
        }
    }

    input.abort();
    Ok(())
}
