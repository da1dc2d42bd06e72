//! Process-wide session registry
//!
//! One map from monitor identifier to live session, held for the life of
//! the process. Callers never see the container; the tool surface
//! mediates every access.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::RwLock;

use super::log::LogRecord;
use super::session::MonitorSession;

static SESSIONS: Lazy<RwLock<HashMap<String, Arc<MonitorSession>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Monitor identifier derived from the PR number
pub fn monitor_id(pr_number: u64) -> String {
    format!("pr-{pr_number}")
}

pub async fn get(id: &str) -> Option<Arc<MonitorSession>> {
    SESSIONS.read().await.get(id).cloned()
}

pub async fn insert(session: Arc<MonitorSession>) {
    SESSIONS.write().await.insert(session.id.clone(), session);
}

pub async fn remove(id: &str) -> Option<Arc<MonitorSession>> {
    SESSIONS.write().await.remove(id)
}

/// Dispose every session: STOPPED record, cancellation, registry cleared.
/// Called on process shutdown.
pub async fn shutdown_all() {
    let sessions: Vec<Arc<MonitorSession>> = SESSIONS.write().await.drain().map(|(_, s)| s).collect();
    for session in sessions {
        session
            .log
            .append(&LogRecord::Stopped("Monitor process shut down.".to_string()));
        session.cancel();
    }
}
