use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use healthsim_core::EntityDraft;

use crate::{GenerationError, GenerationGateway, GenerationRequest};

/// Replays canned draft batches in order, one per request, and records the
/// requests it was given. Used for offline runs and tests.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    batches: Mutex<VecDeque<Vec<EntityDraft>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGateway {
    pub fn new(batches: impl IntoIterator<Item = Vec<EntityDraft>>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().collect()),
            requests: Mutex::default(),
        }
    }

    pub fn push(&self, batch: Vec<EntityDraft>) {
        lock(&self.batches).push_back(batch);
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        lock(&self.batches).len()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GenerationGateway for ScriptedGateway {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<EntityDraft>, GenerationError> {
        lock(&self.requests).push(request.clone());
        lock(&self.batches)
            .pop_front()
            .ok_or(GenerationError::Exhausted)
    }
}
