//! Internal pub/sub bus
//!
//! The publisher binds a TCP endpoint and fans each message out to every
//! connected subscriber as a newline-terminated, topic-prefixed line:
//! `"<topic> <payload>\n"`. Subscribers filter by topic prefix; slow or dead
//! subscribers are pruned on the next publish.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// TCP publisher for the internal bar bus.
///
/// Exactly one publisher exists while the distributor is running; dropping it
/// stops accepting subscribers and closes the endpoint.
pub struct BarPublisher {
    local_addr: SocketAddr,
    subscribers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
    accept_task: JoinHandle<()>,
}

impl BarPublisher {
    /// Bind the publish endpoint. Port 0 binds an ephemeral port.
    pub async fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        let subscribers: Arc<Mutex<Vec<OwnedWriteHalf>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_task = tokio::spawn({
            let subscribers = subscribers.clone();
            async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            debug!(%peer, "bus subscriber connected");
                            let (_, write_half) = stream.into_split();
                            subscribers.lock().await.push(write_half);
                        }
                        Err(err) => {
                            warn!(%err, "bus accept failed");
                            break;
                        }
                    }
                }
            }
        });

        info!(%local_addr, "bus publisher bound");
        Ok(Self {
            local_addr,
            subscribers,
            accept_task,
        })
    }

    /// The bound address of the publish endpoint
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Publish one message under a topic to all connected subscribers.
    ///
    /// Subscribers whose connection fails are dropped; publishing to zero
    /// subscribers is a no-op.
    pub async fn publish(&self, topic: &str, payload: &str) {
        let line = format!("{} {}\n", topic, payload);

        let mut subscribers = self.subscribers.lock().await;
        let mut alive = Vec::with_capacity(subscribers.len());

        for mut subscriber in subscribers.drain(..) {
            match subscriber.write_all(line.as_bytes()).await {
                Ok(()) => alive.push(subscriber),
                Err(err) => debug!(%err, "dropping dead bus subscriber"),
            }
        }

        *subscribers = alive;
    }
}

impl Drop for BarPublisher {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
