//! Tracks in-flight runs so a newer push can cancel an older one

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Handle for a registered run
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub id: Uuid,
    pub branch: String,
    pub token: CancellationToken,
}

/// One in-flight run per branch
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, (Uuid, CancellationToken)>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run for `branch`, cancelling the previous one
    pub async fn begin(&self, branch: &str) -> RunHandle {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();

        let mut runs = self.runs.lock().await;
        if let Some((previous, old)) = runs.insert(branch.to_string(), (id, token.clone())) {
            info!("Cancelling run {} on {} in favour of {}", previous, branch, id);
            old.cancel();
        }

        RunHandle {
            id,
            branch: branch.to_string(),
            token,
        }
    }

    /// Forget a finished run unless a newer one has replaced it
    pub async fn finish(&self, handle: &RunHandle) {
        let mut runs = self.runs.lock().await;
        if runs.get(&handle.branch).is_some_and(|(id, _)| *id == handle.id) {
            runs.remove(&handle.branch);
        }
    }

    /// Cancel every in-flight run
    pub async fn cancel_all(&self) {
        for (_, token) in self.runs.lock().await.values() {
            token.cancel();
        }
    }

    pub async fn active(&self) -> usize {
        self.runs.lock().await.len()
    }
}
