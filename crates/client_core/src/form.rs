use std::sync::Arc;

use anyhow::{Context, Result};
use shared::{
    domain::{CommissionDraft, CommissionId, CommissionOffer, UserId},
    pricing::compute_total,
    steps::{derive_steps, StepKey},
};
use tracing::warn;

use crate::{
    cache::{draft_key, draft_step_key, DraftCache},
    CommissionBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormPhase {
    Ready,
    Saving,
    Submitting,
    Submitted,
}

/// Drives the order wizard: holds the working draft, keeps the derived
/// step list and total price in sync after every mutation, and writes
/// the draft through to the cache so navigation never loses work.
pub struct FormEngine {
    backend: Arc<dyn CommissionBackend>,
    cache: Arc<dyn DraftCache>,
    user_id: UserId,
    draft: CommissionDraft,
    steps: Vec<StepKey>,
    step_index: usize,
    phase: FormPhase,
}

impl FormEngine {
    pub fn new(
        backend: Arc<dyn CommissionBackend>,
        cache: Arc<dyn DraftCache>,
        user_id: UserId,
    ) -> Self {
        let draft = CommissionDraft::default();
        let steps = derive_steps(&draft);
        Self {
            backend,
            cache,
            user_id,
            draft,
            steps,
            step_index: 0,
            phase: FormPhase::Ready,
        }
    }

    pub fn draft(&self) -> &CommissionDraft {
        &self.draft
    }

    pub fn steps(&self) -> &[StepKey] {
        &self.steps
    }

    pub fn current_step(&self) -> StepKey {
        self.steps[self.step_index]
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn phase(&self) -> FormPhase {
        self.phase
    }

    pub fn total_price(&self) -> f64 {
        self.draft.total_price
    }

    /// Loads the working draft: cache first, then the server, then a
    /// blank form. A stale cache entry that no longer parses is treated
    /// as a miss.
    pub async fn hydrate(&mut self, draft_id: Option<CommissionId>) -> Result<()> {
        let key = draft_key(draft_id);

        let cached = self
            .cache
            .get(&key)
            .and_then(|raw| serde_json::from_str::<CommissionDraft>(&raw).ok());

        let draft = match (cached, draft_id) {
            (Some(draft), _) => draft,
            (None, Some(id)) => match self.backend.fetch_draft(self.user_id, id).await {
                Ok(draft) => draft,
                Err(err) => {
                    warn!(draft_id = id.0, %err, "draft hydration failed, starting blank");
                    CommissionDraft::default()
                }
            },
            (None, None) => CommissionDraft::default(),
        };

        self.draft = draft;
        self.step_index = self
            .cache
            .get(&draft_step_key(draft_id))
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(0);
        self.refresh();
        self.phase = FormPhase::Ready;
        Ok(())
    }

    /// Applies a mutation to the draft, then recomputes everything that
    /// derives from it.
    pub fn update(&mut self, mutate: impl FnOnce(&mut CommissionDraft)) {
        mutate(&mut self.draft);
        self.refresh();
        self.write_through();
    }

    /// Points the draft at a catalog offer: the path, base price and
    /// character policy come over, and every custom field is reset to
    /// its zero value so stale answers never carry a price.
    pub fn apply_offer(&mut self, offer: &CommissionOffer) {
        self.draft.offer_id = Some(offer.id);
        self.draft.category = offer.category.clone();
        self.draft.commission_type = offer.commission_type.clone();
        self.draft.subtype = offer.subtype.clone();
        self.draft.base_price = offer.base_price;
        self.draft.character_count = 1;
        match offer.character_count {
            Some(policy) => {
                self.draft.max_character_count = Some(policy.max);
                self.draft.extra_character_price = policy.price_per_extra;
            }
            None => {
                self.draft.max_character_count = None;
                self.draft.extra_character_price = 0.0;
            }
        }
        self.draft.comm_specific_inputs = offer
            .comm_specific_inputs
            .iter()
            .map(|template| template.instantiate())
            .collect();
        self.draft.addons = offer.addons.iter().map(|template| template.instantiate()).collect();

        self.step_index = 0;
        self.refresh();
        self.write_through();
    }

    pub fn set_step(&mut self, index: usize) {
        self.step_index = index.min(self.steps.len() - 1);
        self.cache.put(
            &draft_step_key(self.draft.id),
            self.step_index.to_string(),
        );
    }

    pub fn next_step(&mut self) {
        self.set_step(self.step_index + 1);
    }

    pub fn prev_step(&mut self) {
        self.set_step(self.step_index.saturating_sub(1));
    }

    /// Persists the draft. A newly assigned id is adopted into the
    /// working state; on failure the form is left exactly as it was.
    pub async fn save(&mut self) -> Result<CommissionId> {
        self.refresh();
        self.phase = FormPhase::Saving;
        let result = self.backend.save_draft(self.user_id, &self.draft).await;
        self.phase = FormPhase::Ready;

        let saved = result.context("saving draft failed")?;
        if self.draft.id.is_none() {
            self.cache.remove(&draft_key(None));
            self.cache.remove(&draft_step_key(None));
        }
        self.draft.id = Some(saved.id);
        self.write_through();
        Ok(saved.id)
    }

    /// Submits the order. On success the cached draft is discarded and
    /// the form resets to a blank state for the next order.
    pub async fn submit(&mut self) -> Result<CommissionId> {
        self.refresh();
        self.phase = FormPhase::Submitting;
        let result = self.backend.submit(self.user_id, &self.draft).await;

        match result {
            Ok(response) => {
                self.cache.remove(&draft_key(self.draft.id));
                self.cache.remove(&draft_step_key(self.draft.id));
                self.draft = CommissionDraft::default();
                self.step_index = 0;
                self.refresh();
                self.phase = FormPhase::Submitted;
                Ok(response.commission_id)
            }
            Err(err) => {
                self.phase = FormPhase::Ready;
                Err(err.context("submitting commission failed"))
            }
        }
    }

    fn refresh(&mut self) {
        self.draft.total_price = compute_total(&self.draft);
        self.steps = derive_steps(&self.draft);
        if self.step_index >= self.steps.len() {
            self.step_index = self.steps.len() - 1;
        }
    }

    fn write_through(&self) {
        if let Ok(raw) = serde_json::to_string(&self.draft) {
            self.cache.put(&draft_key(self.draft.id), raw);
        }
        self.cache.put(
            &draft_step_key(self.draft.id),
            self.step_index.to_string(),
        );
    }
}
