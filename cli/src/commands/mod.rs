use clap::Subcommand;

use self::{client::ClientCommand, server::ServerCommand};

pub mod client;
pub mod server;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 🚀 Start Server
    ///
    /// Listen for renders and keep the incoming images in memory.
    Server(ServerCommand),

    /// 🎨 Client Mode
    ///
    /// Stream a generated test image to a running server.
    Client(ClientCommand),
}
