use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use teleconsult::{
    config::Settings, signaling_store::SignalingServerStore, tracing_helper, CallEvent,
    CallSessionController, ControllerOptions, StartOrJoin,
};
use teleconsult_lib::connection::{LocalMedia, RtcPeerLinkFactory};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "teleconsult",
    about = "Start or join the video call of one appointment",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "TELECONSULT_ORIGIN",
        help = "Signaling server origin, overrides the config file"
    )]
    origin: Option<String>,

    #[arg(long, help = "Appointment whose call to start or join")]
    appointment: String,

    #[arg(long, help = "Identity of the local party")]
    party: String,

    #[arg(
        long,
        env = "TELECONSULT_CREDENTIAL",
        hide_env_values = true,
        help = "Bearer credential for the signaling server"
    )]
    credential: String,

    #[arg(long, default_value = "teleconsult.toml")]
    config: PathBuf,

    #[arg(long, help = "Also write warnings to a log file in this directory")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_helper::init_tracing(
        cli.log_dir.as_deref(),
        concat!(env!("CARGO_PKG_NAME"), ".log"),
        true,
    )?;

    let mut settings = Settings::load(&cli.config).await?;
    if let Some(origin) = cli.origin {
        settings.set_origin(origin);
    }
    let store = Arc::new(SignalingServerStore::new(
        settings.origin().clone(),
        cli.credential,
    ));
    let factory = RtcPeerLinkFactory::new(settings.ice_servers().clone());
    let media = LocalMedia::synthetic(&cli.party);
    let mut controller = CallSessionController::new(
        cli.appointment,
        cli.party,
        store,
        factory,
        media,
        ControllerOptions::from(&settings),
    );
    let mut events = controller
        .take_events()
        .ok_or_else(|| anyhow!("events are already taken"))?;

    match controller.start_or_join().await {
        StartOrJoin::Idle => {
            let reason = controller.snapshot().last_error.unwrap_or_default();
            controller.hang_up().await;
            bail!("could not start or join the call: {}", reason);
        }
        result => info!("{:?}, waiting for the other party", result),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                None => break,
                Some(CallEvent::Failed(reason)) => {
                    error!("{}", reason);
                    break;
                }
                Some(CallEvent::ConnectionStateChanged(state)) => {
                    info!("connection {}", state);
                    if state.is_terminal() {
                        warn!("the other party is gone");
                        break;
                    }
                }
                Some(CallEvent::RemoteStream(stream)) => {
                    info!("receiving {} track(s) from the other party", stream.tracks().len());
                }
            },
        }
    }
    controller.hang_up().await;
    Ok(())
}
