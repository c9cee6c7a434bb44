// Finished generations, kept by id until they expire.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use image::RgbImage;
use tracing::debug;

use super::queue::RequestId;
use crate::style::CropInfo;

/// How a generation went, besides its image.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationMetadata {
    pub style: &'static str,
    pub preset_name: &'static str,
    pub steps: u32,
    /// Time between submission and the worker picking the request up.
    pub queued_for: Duration,
    /// Preparation plus generator call.
    pub generation_time: Duration,
    pub crop: Option<CropInfo>,
    pub backend: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub id: RequestId,
    pub outcome: Result<RgbImage, String>,
    pub metadata: GenerationMetadata,
    pub completed_at: Instant,
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn image(&self) -> Option<&RgbImage> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }
}

/// Results keyed by request id with age-based eviction.
pub struct ResultStore {
    entries: HashMap<RequestId, GenerationResult>,
    ttl: Duration,
}

impl ResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: HashMap::new(), ttl }
    }

    pub fn insert(&mut self, result: GenerationResult) {
        self.entries.insert(result.id, result);
    }

    /// Move every result currently waiting on `results` into the store.
    pub fn drain(&mut self, results: &Receiver<GenerationResult>) -> usize {
        let mut moved = 0;
        for result in results.try_iter() {
            debug!(id = %result.id, success = result.is_success(), "result stored");
            self.insert(result);
            moved += 1;
        }
        moved
    }

    pub fn get(&self, id: RequestId) -> Option<&GenerationResult> {
        self.entries.get(&id)
    }

    /// Drop results completed more than the TTL before `now`. Returns how many went.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, r| now.saturating_duration_since(r.completed_at) <= ttl);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "expired results swept");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
