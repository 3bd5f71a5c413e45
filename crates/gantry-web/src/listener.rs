//! TCP listener spawning one responder per connection, plus the
//! periodic session sweep.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tracing::{debug, info};

use gantry_core::Result;

use crate::responder::HttpResponder;
use crate::state::WebState;

/// Interval of the session sweep tick.
const SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

/// Front-end server: accept loop + sweep task.
pub struct WebServer {
    listener: TcpListener,
    state: Arc<WebState>,
}

impl WebServer {
    pub async fn bind(addr: SocketAddr, state: Arc<WebState>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop. Returns only on a listener error.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, "HTTP front-end starting");

        let sweep_state = Arc::clone(&self.state);
        let sweep = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                sweep_state.check_sessions(Instant::now());
            }
        });

        let result = self.accept_loop().await;
        sweep.abort();
        result
    }

    async fn accept_loop(&self) -> Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            debug!(client = %peer, "connection accepted");

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let responder = HttpResponder::new(socket, peer.ip(), peer.port(), state);
                if let Err(e) = responder.run().await {
                    debug!(client = %peer, error = %e, "responder finished with error");
                }
            });
        }
    }
}
