pub mod api;
pub mod client;
mod commands;
pub mod config;
pub mod error;
pub mod media;
pub mod mediamtx;
pub mod models;
pub mod services;
pub mod state;
pub mod ui;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::client::broadcast::{Broadcaster, StreamKey};
use crate::client::engines::{DeviceBroadcast, NetworkEngines};
use crate::client::player::Player;
use crate::client::poller::{StreamPoller, ViewerState};
use crate::commands::broadcast::BroadcastCommand;
use crate::commands::viewer::ViewerCommand;
use crate::config::{BroadcastArgs, ServeArgs, SetupArgs, WatchArgs};
use crate::media::capture::CaptureRequest;
use crate::media::sink::MeterSink;
use crate::mediamtx::MediaMtxClient;
use crate::state::AppState;

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info` filter.
/// Logs go to stderr so they do not interleave with terminal output.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn parse_origin(origin: &str) -> Result<Url, String> {
    Url::parse(origin).map_err(|e| format!("Invalid origin {}: {}", origin, e))
}

/// Run the proxy API until the process is stopped.
pub async fn run_server(args: ServeArgs) -> Result<(), String> {
    let mediamtx = MediaMtxClient::new(&args.mediamtx_api, args.upstream_timeout())
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let ctx = AppState::new(mediamtx, args.stream_urls());

    let listener = api::server::bind(&args.host, args.port)
        .await
        .map_err(|e| format!("Failed to bind {}:{}: {}", args.host, args.port, e))?;
    api::server::serve(listener, ctx)
        .await
        .map_err(|e| format!("API server error: {}", e))
}

fn print_player(player: &Player, state: &ViewerState, meter: &MeterSink) {
    // The listing carries the latest readyTime for the same stream.
    let stream = player
        .stream()
        .map(|playing| match state.active() {
            Some(active) if active.name == playing.name => active,
            _ => playing,
        });
    if let Some(stream) = stream {
        println!(
            "{}",
            ui::player_status(stream, player.state(), meter.snapshot(), Utc::now())
        );
    }
}

fn print_streams(state: &ViewerState) {
    println!("{}", ui::header(state.streams().len()));
    println!(
        "{}",
        ui::stream_list(
            state.streams(),
            state.active().map(|s| s.name.as_str()),
            state.is_loading(),
            Utc::now()
        )
    );
}

/// Interactive playback client: poll the proxy, list live streams, play one.
pub async fn run_viewer(args: WatchArgs) -> Result<(), String> {
    let origin = parse_origin(&args.origin)?;
    let http = reqwest::Client::new();

    let engines = Arc::new(NetworkEngines::new(
        http.clone(),
        origin.clone(),
        args.ice_server.clone(),
        !args.no_hls_engine,
        args.player.clone(),
    ));
    let meter = engines.meter();
    let mut player = Player::new(engines);
    let mut state = ViewerState::default();

    let (poll_tx, mut poll_rx) = mpsc::channel(4);
    let poller = StreamPoller::new(http, &origin)?
        .spawn(Duration::from_secs(args.poll_interval_secs.max(1)), poll_tx);

    let mut stdin = commands::spawn_stdin_lines();
    let mut stdin_open = true;
    let mut autoplay = args.stream.clone();

    println!("{}", ui::viewer_help());
    print_streams(&state);

    loop {
        tokio::select! {
            Some(outcome) = poll_rx.recv() => {
                let applied = state.apply(outcome);
                if let Some(gone) = applied.went_offline {
                    info!("{} went offline", gone.name);
                    player.stop().await;
                }
                if applied.list_changed {
                    print_streams(&state);
                }
                if let Some(name) = autoplay.clone() {
                    if state.streams().iter().any(|s| s.name == name) {
                        autoplay = None;
                        if let Err(e) = commands::viewer::watch(&mut state, &mut player, &name).await {
                            warn!("{}", e);
                        }
                        print_player(&player, &state, &meter);
                    }
                }
            }
            Some(update) = player.next_update() => {
                if player.handle(update).await {
                    print_player(&player, &state, &meter);
                }
            }
            line = stdin.recv(), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    continue;
                };
                match commands::viewer::parse(&line) {
                    Ok(Some(ViewerCommand::List)) => print_streams(&state),
                    Ok(Some(ViewerCommand::Watch(name))) => {
                        match commands::viewer::watch(&mut state, &mut player, &name).await {
                            Ok(()) => print_player(&player, &state, &meter),
                            Err(e) => println!("{}", e),
                        }
                    }
                    Ok(Some(ViewerCommand::Close)) => {
                        commands::viewer::close(&mut state, &mut player).await;
                    }
                    Ok(Some(ViewerCommand::Help)) => println!("{}", ui::viewer_help()),
                    Ok(Some(ViewerCommand::Quit)) => break,
                    Ok(None) => print_player(&player, &state, &meter),
                    Err(e) => println!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    poller.abort();
    player.stop().await;
    info!("Viewer stopped");
    Ok(())
}

/// Interactive WHIP publisher.
pub async fn run_broadcaster(args: BroadcastArgs) -> Result<(), String> {
    let origin = parse_origin(&args.origin)?;
    let key = match &args.key {
        Some(key) => StreamKey::parse(key).map_err(|e| e.to_string())?,
        None => StreamKey::generate_web(),
    };

    let request = CaptureRequest {
        audio: !args.no_audio,
        audio_device: args.audio_device.clone(),
        video_file: args.video_file.clone(),
    };
    let backend = Arc::new(DeviceBroadcast::new(
        reqwest::Client::new(),
        origin,
        args.ice_server.clone(),
        request,
    ));
    let mut broadcaster = Broadcaster::new(backend, key);

    println!("{}", ui::broadcast_help());
    if args.start {
        if let Err(e) = commands::broadcast::start(&mut broadcaster) {
            warn!("{}", e);
        }
    }
    println!("{}", ui::broadcast_status(broadcaster.key(), broadcaster.state()));

    let mut stdin = commands::spawn_stdin_lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(update) = broadcaster.next_update() => {
                if broadcaster.handle(update).await {
                    println!("{}", ui::broadcast_status(broadcaster.key(), broadcaster.state()));
                }
            }
            line = stdin.recv(), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    continue;
                };
                match commands::broadcast::parse(&line) {
                    Ok(Some(BroadcastCommand::Key(key))) => {
                        if let Err(e) = commands::broadcast::set_key(&mut broadcaster, &key) {
                            println!("{}", e);
                        }
                    }
                    Ok(Some(BroadcastCommand::Start)) => {
                        if let Err(e) = commands::broadcast::start(&mut broadcaster) {
                            warn!("{}", e);
                        }
                    }
                    Ok(Some(BroadcastCommand::Stop)) => commands::broadcast::stop(&mut broadcaster).await,
                    Ok(Some(BroadcastCommand::Devices)) => {
                        for (i, name) in commands::broadcast::list_devices().iter().enumerate() {
                            println!("  {}{}", name, if i == 0 { " (default)" } else { "" });
                        }
                        continue;
                    }
                    Ok(Some(BroadcastCommand::Help)) => {
                        println!("{}", ui::broadcast_help());
                        continue;
                    }
                    Ok(Some(BroadcastCommand::Quit)) => break,
                    Ok(None) => {}
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                }
                println!("{}", ui::broadcast_status(broadcaster.key(), broadcaster.state()));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    broadcaster.stop().await;
    Ok(())
}

/// Print the OBS settings for publishing over RTMP.
pub fn run_setup(args: SetupArgs) -> Result<(), String> {
    let key = match &args.key {
        Some(key) => StreamKey::parse(key).map_err(|e| e.to_string())?,
        None => StreamKey::generate_user(),
    };
    println!("{}", ui::setup_info(&args.rtmp_url, &key));
    Ok(())
}
