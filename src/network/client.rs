//! Client-side Connection
//!
//! Dials a server and hands back the same [`Channel`](crate::network::channel::Channel)
//! abstraction the server uses per accepted connection, so both ends of the
//! link share one contract.

use tokio_tungstenite::connect_async;
use tracing::info;

use crate::network::channel::{ClientChannel, ConnectionError};

/// Connect to a server at `host:port`.
pub async fn connect(addr: &str) -> Result<ClientChannel, ConnectionError> {
    let url = format!("ws://{addr}");
    let (ws, _response) = connect_async(url).await?;
    info!("connected to {addr}");
    Ok(ClientChannel::spawn(ws))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_nothing_fails() {
        // Port 1 is essentially never listening.
        let result = connect("127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
