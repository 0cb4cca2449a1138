//! ---
//! mtc_section: "05-networking-external-interfaces"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Line-oriented adapter server and wire protocol."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::adapter::Adapter;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept agents until shutdown is signalled. Dropping the listener on return
/// closes the listening socket.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    adapter: Adapter,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %err, "failed to disable nagle");
                    }
                    let (reader, writer) = stream.into_split();
                    adapter.attach(reader, Box::new(writer), peer.to_string());
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}
