use clap::{Parser, Subcommand};

use streamflow_lib::config::{BroadcastArgs, ServeArgs, SetupArgs, WatchArgs};

#[derive(Parser)]
#[command(name = "streamflow", about = "Live stream directory and player for MediaMTX")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the stream list API in front of MediaMTX
    Serve(ServeArgs),
    /// Browse live streams and play one
    Watch(WatchArgs),
    /// Publish microphone (and an optional video file) over WHIP
    Broadcast(BroadcastArgs),
    /// Print OBS settings with a fresh stream key
    Setup(SetupArgs),
}

fn main() {
    let cli = Cli::parse();
    streamflow_lib::init_tracing();

    let result = match cli.command {
        Command::Setup(args) => streamflow_lib::run_setup(args),
        command => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
            rt.block_on(async move {
                match command {
                    Command::Serve(args) => streamflow_lib::run_server(args).await,
                    Command::Watch(args) => streamflow_lib::run_viewer(args).await,
                    Command::Broadcast(args) => streamflow_lib::run_broadcaster(args).await,
                    Command::Setup(args) => streamflow_lib::run_setup(args),
                }
            })
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
