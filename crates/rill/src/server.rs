//! # Inbound Server
//!
//! Accepts the proxy's connection and feeds its frames to the adapter, one
//! at a time. A connection is served to completion before the next accept.

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tracing::info;
use tracing::warn;

use crate::computation::Computation;
use crate::error::Fatal;
use crate::model::Endpoint;
use crate::service::Lifecycle;
use crate::service::ServiceAdapter;
use crate::transport::read_frame;
use crate::transport::write_frame;

pub struct Server {
    listener: TcpListener,
    endpoint: Endpoint,
}

impl Server {
    /// Binds `addr`. Port 0 picks a free port; the advertised endpoint
    /// keeps the configured host with the port actually bound.
    pub async fn bind(addr: &Endpoint) -> Result<Self, Fatal> {
        let listener = TcpListener::bind((addr.ip.as_str(), addr.port))
            .await
            .map_err(|source| Fatal::Bind { addr: addr.clone(), source })?;
        let port = listener
            .local_addr()
            .map_err(|source| Fatal::Bind { addr: addr.clone(), source })?
            .port();
        let endpoint = Endpoint::new(addr.ip.clone(), port);
        info!(%endpoint, "listening");
        Ok(Self { listener, endpoint })
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Serves until the adapter is destroyed or a callback fails.
    pub async fn serve<C: Computation>(self, adapter: &mut ServiceAdapter<C>) -> Result<(), Fatal> {
        loop {
            let (stream, peer) = self.listener.accept().await.map_err(Fatal::Runtime)?;
            info!(%peer, "accepted connection");
            serve_connection(stream, adapter).await?;
            if adapter.state() == Lifecycle::Destroyed {
                info!("shutting down");
                return Ok(());
            }
            info!(%peer, "connection closed");
        }
    }
}

/// Returns when the peer hangs up, the connection fails, or the adapter is
/// destroyed.
async fn serve_connection<C: Computation>(
    mut stream: TcpStream,
    adapter: &mut ServiceAdapter<C>,
) -> Result<(), Fatal> {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY");
    }
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "dropping connection");
                return Ok(());
            }
        };

        let reply = adapter.handle(&frame).await?;
        if let Err(e) = write_frame(&mut stream, &reply).await {
            warn!(error = %e, "dropping connection");
            return Ok(());
        }
        if adapter.state() == Lifecycle::Destroyed {
            return Ok(());
        }
    }
}
