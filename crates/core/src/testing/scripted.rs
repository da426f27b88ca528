//! Per-item failure and delay scripting shared by the collaborator mocks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::collaborators::CollaboratorError;

#[derive(Debug, Clone)]
struct ScriptedFailure {
    error: CollaboratorError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
pub(crate) struct Script {
    failures: Arc<RwLock<HashMap<String, ScriptedFailure>>>,
    hanging: Arc<RwLock<HashSet<String>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl Script {
    pub async fn fail(&self, item_id: &str, error: CollaboratorError, times: Option<u32>) {
        self.failures.write().await.insert(
            item_id.to_string(),
            ScriptedFailure {
                error,
                remaining: times,
            },
        );
    }

    pub async fn hang(&self, item_id: &str) {
        self.hanging.write().await.insert(item_id.to_string());
    }

    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    /// Apply delay/hang, then consume one scripted failure if any.
    pub async fn play(&self, item_id: &str) -> Result<(), CollaboratorError> {
        if self.hanging.read().await.contains(item_id) {
            std::future::pending::<()>().await;
        }

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.write().await;
        let Some(scripted) = failures.get_mut(item_id) else {
            return Ok(());
        };
        let error = scripted.error.clone();
        match scripted.remaining {
            None => {}
            Some(n) if n <= 1 => {
                failures.remove(item_id);
            }
            Some(n) => scripted.remaining = Some(n - 1),
        }
        Err(error)
    }
}
