pub mod render;

use log::{debug, error, info};
use shared::{
    models::message::{Message, MessageHeader},
    networking::{client::ClientConfig, result::NetworkingResult, send_message},
};
use tokio::{io::AsyncWriteExt, net::TcpStream};

/// Producer side of the protocol: one connection, one image at a time.
pub struct Client {
    stream: TcpStream,
    open: Option<MessageHeader>,
}

impl Client {
    pub async fn connect(config: &ClientConfig) -> NetworkingResult<Self> {
        let stream = connect_to_server(&config.server_addr()).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, open: None })
    }

    /// Starts an image. `header` describes the full image.
    pub async fn open_image(&mut self, header: MessageHeader) -> NetworkingResult<()> {
        self.send(&Message::open(header.clone())).await?;
        debug!(
            "Opened frame {} version {} ({}x{})",
            header.frame, header.version, header.region.width, header.region.height
        );
        self.open = Some(header);
        Ok(())
    }

    /// Sends one tile. The header describes the tile, not the image.
    pub async fn send_pixels(
        &mut self,
        header: MessageHeader,
        pixels: Vec<f32>,
    ) -> NetworkingResult<()> {
        let message = Message::pixels(header, pixels)?;
        self.send(&message).await
    }

    /// Closes the image opened last. A no-op when nothing is open.
    pub async fn close_image(&mut self) -> NetworkingResult<()> {
        let Some(header) = self.open.take() else {
            return Ok(());
        };
        self.send(&Message::close(header)).await
    }

    pub async fn send(&mut self, message: &Message) -> NetworkingResult<()> {
        if let Err(e) = send_message(&mut self.stream, message).await {
            error!("Failed to send {} message: {}", message.kind(), e);
            return Err(e);
        }
        Ok(())
    }

    /// Closes any open image and shuts the connection down.
    pub async fn quit(mut self) -> NetworkingResult<()> {
        self.close_image().await?;
        self.stream.shutdown().await?;
        info!("Disconnected from server");
        Ok(())
    }
}

async fn connect_to_server(addr: &str) -> NetworkingResult<TcpStream> {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to connect to server: {}", e);
            return Err(e.into());
        }
    };
    info!("Connected to server at {}", addr);
    Ok(stream)
}
