//! Small command-line tool over the client.
//!
//! ```text
//! cargo run --example universe_info -- info
//! cargo run --example universe_info -- get 1
//! cargo run --example universe_info -- set 1 255 128 0
//! RUST_LOG=ola_client=debug cargo run --example universe_info -- --port 9010 info
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ola_client::messages::{
    Ack, DmxData, MergeMode, OptionalUniverseRequest, UniverseInfoReply, UniverseRequest, GET_DMX,
    GET_UNIVERSE_INFO, UPDATE_DMX_DATA,
};
use ola_client::{Client, ClientConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Query and drive an OLA daemon", long_about = None)]
struct Cli {
    /// JSON file with client settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Daemon host, overrides the config file.
    #[arg(long)]
    host: Option<String>,

    /// Daemon RPC port, overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List universes.
    Info {
        /// Only describe this universe.
        #[arg(short, long)]
        universe: Option<i32>,
    },
    /// Print the DMX values of a universe.
    Get { universe: i32 },
    /// Set the first channels of a universe.
    Set {
        universe: i32,
        /// Channel values, starting at channel 1.
        values: Vec<u8>,
    },
}

fn load_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => ClientConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let client = Client::builder().config(load_config(&cli)?).start().await?;

    let outcome = run(&client, cli.command).await;
    if let Some(failure) = client.last_failure() {
        eprintln!("last failure: {}", serde_json::to_string_pretty(&failure)?);
    }
    client.shutdown().await;
    outcome
}

async fn run(client: &Client, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Info { universe } => {
            let reply: UniverseInfoReply = client
                .call(GET_UNIVERSE_INFO, &OptionalUniverseRequest { universe })
                .await?;
            for info in reply.universe {
                let merge = match MergeMode::try_from(info.merge_mode) {
                    Ok(MergeMode::Htp) => "HTP",
                    Ok(MergeMode::Ltp) => "LTP",
                    Err(_) => "?",
                };
                println!(
                    "{:>5}  {:<24} {}  in:{} out:{} rdm:{}",
                    info.universe,
                    info.name,
                    merge,
                    info.input_port_count,
                    info.output_port_count,
                    info.rdm_devices
                );
            }
        }
        Commands::Get { universe } => {
            let reply: DmxData = client.call(GET_DMX, &UniverseRequest { universe }).await?;
            println!("universe {}: {:?}", reply.universe, &reply.data[..]);
        }
        Commands::Set { universe, values } => {
            let request = DmxData {
                universe,
                data: values.into(),
                priority: None,
            };
            let _: Ack = client.call(UPDATE_DMX_DATA, &request).await?;
            println!("universe {} updated", universe);
        }
    }
    Ok(())
}
