use std::error::Error;
use std::time::Duration;

use clap::Parser;
use log::info;
use server::Server;
use shared::env::parse_port;

use crate::status;

/// 🖥️ Server Command
///
/// This command is used to configure and 🚀 start the server.
#[derive(Parser, Debug)]
#[command(name = "server", about = "🚀 Start and configure the server.", long_about = None)]
pub struct ServerCommand {
    /// 📌 Server IP address
    ///
    /// Specify the IP address 🌐 where the server will listen for incoming connections.
    /// Defaults to TILECAST_HOST, or all interfaces.
    #[arg(short, long, value_name = "ADDRESS")]
    pub address: Option<String>,

    /// 🚪 Server port
    ///
    /// Define the port number 🎛️ on which the server will listen.
    /// Defaults to TILECAST_PORT, or 9201.
    #[arg(short, long, value_name = "PORT", value_parser = parse_port)]
    pub port: Option<u16>,

    /// 🗂️ Image limit
    ///
    /// How many images to keep before the oldest is dropped.
    /// Defaults to TILECAST_CAPACITY, or 20.
    #[arg(short, long, value_name = "COUNT")]
    pub capacity: Option<usize>,

    /// 🎞️ Fold every frame of a version into one image.
    #[arg(long)]
    pub single_frame: bool,

    /// 🎨 Keep only the default layer.
    #[arg(long)]
    pub no_aovs: bool,

    /// ⏱️ Milliseconds between status lines.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub status_interval: u64,

    /// 🧾 Print status as JSON lines.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ServerCommand) -> Result<(), Box<dyn Error>> {
    let mut config = server::config_from_env()?;
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    config.multiframe = !args.single_frame;
    config.enable_aovs = !args.no_aovs;
    let port = args.port.unwrap_or(config.port);

    let server = Server::new(config);
    server.attach(port).await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.status_interval.max(50)));
    let mut last_line = String::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let line = if args.json {
                    status::report(&server).to_json()?
                } else {
                    match server.current_framebuffer() {
                        Some(framebuffer) => status::status_line(&framebuffer.info()),
                        None => continue,
                    }
                };
                if line != last_line {
                    println!("{}", line);
                    last_line = line;
                }
            }
        }
    }

    info!("Shutting down");
    server.detach().await;
    Ok(())
}
