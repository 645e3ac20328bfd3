//! Physical Link Openers
//!
//! Wi-Fi adapters expose a raw TCP socket; Bluetooth adapters are reached
//! through an RFCOMM serial device (`/dev/rfcomm0`, `COM5`).

use obd_protocol::ObdError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

/// Any duplex byte stream the transport can own
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Where the adapter lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkTarget {
    /// Wi-Fi adapter, e.g. `192.168.0.10:35000`
    Tcp { address: String },
    /// Bluetooth RFCOMM or USB serial device
    Serial { path: String, baud_rate: u32 },
}

impl LinkTarget {
    /// Label stored in the device profile
    pub fn label(&self) -> String {
        match self {
            LinkTarget::Tcp { address } => format!("tcp://{address}"),
            LinkTarget::Serial { path, .. } => format!("serial://{path}"),
        }
    }

    /// Open the link
    pub async fn open(&self, connect_timeout: Duration) -> Result<Box<dyn ByteStream>, ObdError> {
        match self {
            LinkTarget::Tcp { address } => {
                debug!("Connecting to {}", address);
                let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
                    .await
                    .map_err(|_| ObdError::ConnectFailed {
                        target: address.clone(),
                        reason: format!("no answer within {}ms", connect_timeout.as_millis()),
                    })?
                    .map_err(|e| ObdError::ConnectFailed {
                        target: address.clone(),
                        reason: e.to_string(),
                    })?;
                // Commands are a handful of bytes; don't let Nagle hold them back
                stream.set_nodelay(true)?;
                info!("TCP link to {} established", address);
                Ok(Box::new(stream))
            }
            LinkTarget::Serial { path, baud_rate } => {
                debug!("Opening {} at {} baud", path, baud_rate);
                let port = tokio_serial::new(path, *baud_rate)
                    .timeout(connect_timeout)
                    .open_native_async()
                    .map_err(|e| ObdError::ConnectFailed {
                        target: path.clone(),
                        reason: e.to_string(),
                    })?;
                info!("Serial link {} opened", path);
                Ok(Box::new(port))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let tcp = LinkTarget::Tcp {
            address: "192.168.0.10:35000".to_string(),
        };
        assert_eq!(tcp.label(), "tcp://192.168.0.10:35000");

        let serial = LinkTarget::Serial {
            path: "/dev/rfcomm0".to_string(),
            baud_rate: 38400,
        };
        assert_eq!(serial.label(), "serial:///dev/rfcomm0");
    }

    #[tokio::test]
    async fn test_tcp_refused_is_connect_failed() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let target = LinkTarget::Tcp { address };
        let result = target.open(Duration::from_millis(500)).await;
        assert!(matches!(result, Err(ObdError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_tcp_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let target = LinkTarget::Tcp { address };
        assert!(target.open(Duration::from_secs(1)).await.is_ok());
        assert!(accept.await.unwrap().is_ok());
    }
}
