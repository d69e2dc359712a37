//! Recovery Controller: reconnects previously paired sessions at boot.
//!
//! Enumeration keys off the stored JID, not the persisted status: an
//! unclean shutdown leaves status stale, while the JID only exists for
//! sessions that actually paired. Sessions that died mid-QR have no stored
//! JID and stay down until a user starts them again.

use crate::registry::SessionRegistry;
use std::sync::Arc;
use tracing::{info, warn};

/// Spawn one reconnect per session with a stored JID. Waits for all of them
/// to finish; per-session failures are logged and never abort the rest.
pub async fn reconnect_stored_sessions(registry: &Arc<SessionRegistry>) {
    let sessions = match registry.repo().sessions_with_stored_jid().await {
        Ok(sessions) => sessions,
        Err(err) => {
            warn!(%err, "recovery scan failed");
            return;
        }
    };
    if sessions.is_empty() {
        info!("no paired sessions to recover");
        return;
    }
    info!(count = sessions.len(), "recovering paired sessions");

    let mut handles = Vec::with_capacity(sessions.len());
    for session in sessions {
        let registry = Arc::clone(registry);
        handles.push(tokio::spawn(async move {
            match registry.connect(session.id).await {
                Ok(outcome) => {
                    info!(session_id = %session.id, name = %session.name, ?outcome, "session recovered");
                }
                Err(err) => {
                    warn!(session_id = %session.id, name = %session.name, %err, "session recovery failed");
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}
