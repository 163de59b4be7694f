//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the attempt store, the presence registry, the escalation
//! coordinator, the task queue, and the optional external capabilities
//! (generation, frame analysis, text extraction). Capabilities are `None`
//! when their env vars are not configured; routes that need an absent
//! capability answer 503 instead of failing at startup.

use std::sync::Arc;

use crate::llm::Generate;
use crate::services::analysis::AnalyzeFrames;
use crate::services::attempts::AttemptStore;
use crate::services::escalation::EscalationCoordinator;
use crate::services::ocr::ExtractText;
use crate::services::presence::PresenceRegistry;
use crate::services::queue::TaskQueue;

/// Optional external capabilities wired at startup.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub generator: Option<Arc<dyn Generate>>,
    pub analyzer: Option<Arc<dyn AnalyzeFrames>>,
    pub extractor: Option<Arc<dyn ExtractText>>,
}

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AttemptStore>,
    pub presence: PresenceRegistry,
    pub escalation: EscalationCoordinator,
    pub queue: TaskQueue,
    pub capabilities: Capabilities,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn AttemptStore>,
        escalation: EscalationCoordinator,
        queue: TaskQueue,
        capabilities: Capabilities,
    ) -> Self {
        Self { store, presence: PresenceRegistry::new(), escalation, queue, capabilities }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::services::attempts::testing::InMemoryAttemptStore;

    /// Create a test `AppState` backed by an empty in-memory attempt store.
    #[must_use]
    pub fn test_app_state() -> AppState {
        test_app_state_full(Capabilities::default(), Arc::new(InMemoryAttemptStore::new()))
    }

    /// Create a test `AppState` with specific capabilities wired in.
    #[must_use]
    pub fn test_app_state_with(capabilities: Capabilities) -> AppState {
        test_app_state_full(capabilities, Arc::new(InMemoryAttemptStore::new()))
    }

    /// Create a test `AppState` over a caller-held attempt store.
    #[must_use]
    pub fn test_app_state_with_store(store: Arc<dyn AttemptStore>) -> AppState {
        test_app_state_full(Capabilities::default(), store)
    }

    #[must_use]
    pub fn test_app_state_full(capabilities: Capabilities, store: Arc<dyn AttemptStore>) -> AppState {
        AppState::new(
            store,
            EscalationCoordinator::new(crate::services::escalation::DEFAULT_VIOLATION_THRESHOLD),
            TaskQueue::new(crate::services::queue::QueueLimits::default()),
            capabilities,
        )
    }
}
