use std::error::Error;

use clap::Parser;
use client::{
    render::{render, AovLayer, RenderJob},
    Client,
};
use shared::{env::parse_port, networking::client::ClientConfig};

/// 🎨 Client Command
///
/// Renders a gradient test image and streams it bucket by bucket.
#[derive(Parser, Debug)]
#[command(name = "client", about = "🎨 Stream a test render to a server.", long_about = None)]
pub struct ClientCommand {
    /// 📌 Server address
    #[arg(short, long, value_name = "ADDRESS")]
    pub address: Option<String>,

    /// 🚪 Server port
    #[arg(short, long, value_name = "PORT", value_parser = parse_port)]
    pub port: Option<u16>,

    /// 📏 Image width
    #[arg(long, value_name = "WIDTH", default_value_t = 640)]
    pub width: u32,

    /// 📐 Image height
    #[arg(long, value_name = "HEIGHT", default_value_t = 480)]
    pub height: u32,

    /// 🧱 Bucket size in pixels
    #[arg(long, value_name = "SIZE", default_value_t = 64)]
    pub bucket: u32,

    /// 🎞️ Frame number
    #[arg(long, default_value_t = 1.0)]
    pub frame: f32,

    /// 🔢 First version number; each extra render bumps it
    #[arg(long, default_value_t = 1)]
    pub version: i32,

    /// 🔁 How many renders to send
    #[arg(long, default_value_t = 1)]
    pub renders: u32,

    /// 🎨 Extra AOVs as NAME or NAME:SAMPLES, on top of the beauty layer
    #[arg(long = "aov", value_name = "AOV", value_parser = parse_aov)]
    pub aovs: Vec<AovLayer>,

    /// 📋 Send buckets in scanline order
    #[arg(long)]
    pub ordered: bool,
}

pub fn parse_aov(value: &str) -> Result<AovLayer, String> {
    let (name, samples) = match value.split_once(':') {
        Some((name, samples)) => {
            let samples = samples
                .parse::<u32>()
                .map_err(|_| format!("invalid sample count in {:?}", value))?;
            (name, samples)
        }
        None => (value, 3),
    };
    if name.is_empty() || samples == 0 {
        return Err(format!("invalid aov {:?}", value));
    }
    Ok(AovLayer::new(name, samples))
}

pub async fn run(args: ClientCommand) -> Result<(), Box<dyn Error>> {
    let mut config = ClientConfig::from_env()?;
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let mut job = RenderJob::new(args.width, args.height);
    job.bucket_size = args.bucket;
    job.frame = args.frame;
    job.shuffle = !args.ordered;
    job.aovs.extend(args.aovs);

    let mut client = Client::connect(&config).await?;
    for offset in 0..args.renders {
        job.version = args.version + offset as i32;
        render(&mut client, &job).await?;
    }
    client.quit().await?;
    Ok(())
}
