//! # Rill
//!
//! Hosts one user computation inside a stream-processing cluster. The
//! adapter registers the computation with the node's proxy, then serves the
//! proxy's callbacks (`init`, records, timers, `destroy`) over TCP and hands
//! back the records and timers each callback asks for.
//!
//! ```no_run
//! use rill::Computation;
//! use rill::Context;
//! use rill::Metadata;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Computation for Echo {
//!     async fn process_record(&mut self, ctx: &mut Context<'_>, record: rill::Record) -> rill::computation::Result<()> {
//!         ctx.produce_record("echoed", record.key, record.data);
//!         Ok(())
//!     }
//!
//!     fn metadata(&self) -> rill::computation::Result<Metadata> {
//!         Ok(Metadata::builder("echo").input("in").output("echoed").build()?)
//!     }
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     rill::serve_computation(Echo)
//! }
//! ```

pub mod computation;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod model;
pub mod proxy;
pub mod server;
pub mod service;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod mock_transport;
#[cfg(test)]
mod tests;

use std::process::ExitCode;
use std::sync::Arc;

use tracing::error;
use tracing::info;

pub use computation::Computation;
pub use config::Config;
pub use context::Context;
pub use error::Fatal;
pub use model::ComputationMetadata;
pub use model::Endpoint;
pub use model::Metadata;
pub use model::MetadataError;
pub use model::Record;
pub use model::StreamDecl;
pub use model::StreamGrouping;
pub use model::StreamMetadata;
pub use model::Transaction;
pub use server::Server;
pub use service::Lifecycle;
pub use service::ServiceAdapter;
pub use transport::Connector;
pub use transport::TcpConnector;

/// Binds, registers and serves until `destroy`.
///
/// Does not touch logging or the process exit status.
pub async fn run<C: Computation>(config: &Config, computation: C) -> Result<(), Fatal> {
    let server = Server::bind(&config.listen).await?;
    serve(server, config.proxy.clone(), computation, Arc::new(TcpConnector)).await?;
    Ok(())
}

/// Registers through `connector` and serves on `server`.
///
/// On a registration failure the listener is closed before this returns.
/// Hands the computation back after a clean `destroy`.
pub async fn serve<C: Computation>(
    server: Server,
    proxy: Endpoint,
    computation: C,
    connector: Arc<dyn Connector>,
) -> Result<C, Fatal> {
    let mut adapter = ServiceAdapter::new(computation, server.local_endpoint().clone(), connector);
    if let Err(e) = adapter.register(proxy).await {
        drop(server);
        return Err(e);
    }
    server.serve(&mut adapter).await?;
    Ok(adapter.into_computation())
}

/// Process exit status after a clean `destroy`.
pub const EXIT_OK: u8 = 0;
/// Process exit status after any fatal error.
pub const EXIT_FATAL: u8 = 1;

/// The process entry point for a computation binary.
///
/// Reads the environment, then hands over to `serve_with_config`.
pub fn serve_computation<C: Computation>(computation: C) -> ExitCode {
    match Config::from_env() {
        Ok(config) => ExitCode::from(serve_with_config(&config, computation)),
        Err(e) => {
            eprintln!("rill: {}", Fatal::from(e));
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Installs logging and serves on a single-threaded runtime until
/// `destroy` or the first fatal error, which is logged once here.
///
/// Returns the process exit status. Must not be called from inside a
/// tokio runtime.
pub fn serve_with_config<C: Computation>(config: &Config, computation: C) -> u8 {
    let _log = match logging::init(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("rill: {}", Fatal::Logging(e));
            return EXIT_FATAL;
        }
    };

    let outcome = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => {
            info!(listen = %config.listen, proxy = %config.proxy, "starting");
            runtime.block_on(run(config, computation))
        }
        Err(e) => Err(Fatal::Runtime(e)),
    };

    match &outcome {
        Ok(()) => info!("exiting"),
        Err(e) => error!(error = %e, "fatal"),
    }
    exit_status(&outcome)
}

pub fn exit_status(outcome: &Result<(), Fatal>) -> u8 {
    match outcome {
        Ok(()) => EXIT_OK,
        Err(_) => EXIT_FATAL,
    }
}
