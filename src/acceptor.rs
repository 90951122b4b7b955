//! TCP accept loop
//!
//! Accepts connections and spawns one handler task per client.

use std::future::Future;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::dispatcher::DispatcherHandle;
use crate::handler::handle_connection;

/// Accept connections until `shutdown` resolves
///
/// Accept errors are logged and the loop keeps going. Handlers already
/// running are left alone when the loop stops.
pub async fn serve<F>(listener: TcpListener, dispatcher: DispatcherHandle, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Accept loop stopped");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let dispatcher = dispatcher.clone();

                        // Spawn handler task for each connection
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher).await {
                                error!("Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}
