use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use shared::{
    domain::{CommissionId, MessageKind, UserId},
    protocol::{MessagePayload, ServerEvent},
};

use crate::CommissionBackend;

/// Messages fetched per page; matches the server's default.
pub const PAGE_SIZE: u32 = 40;

/// Consecutive messages by one sender collapse into a group while they
/// stay within this window of the group's first message.
const GROUP_WINDOW_SECS: i64 = 5 * 60;

/// Shared message store so reopening a chat starts from what was already
/// fetched instead of refetching the newest page.
#[derive(Default)]
pub struct MessageCache {
    entries: Mutex<HashMap<CommissionId, Vec<MessagePayload>>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: CommissionId) -> Option<Vec<MessagePayload>> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&id).cloned())
    }

    pub fn store(&self, id: CommissionId, messages: Vec<MessagePayload>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id, messages);
        }
    }
}

/// One open commission chat. Messages are held oldest to newest; older
/// pages are prepended as the reader scrolls back.
pub struct ChatSession {
    commission_id: CommissionId,
    cache: Arc<MessageCache>,
    messages: Vec<MessagePayload>,
    has_more: bool,
}

impl ChatSession {
    pub fn new(commission_id: CommissionId, cache: Arc<MessageCache>) -> Self {
        Self {
            commission_id,
            cache,
            messages: Vec::new(),
            has_more: true,
        }
    }

    pub fn commission_id(&self) -> CommissionId {
        self.commission_id
    }

    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Loads the newest page, or reuses the shared cache when it is
    /// warm for this commission.
    pub async fn initial_load(
        &mut self,
        backend: &Arc<dyn CommissionBackend>,
        user_id: UserId,
    ) -> Result<()> {
        if let Some(cached) = self.cache.get(self.commission_id) {
            self.messages = cached;
            self.has_more = self.messages.len() as u32 >= PAGE_SIZE;
            return Ok(());
        }

        let page = backend
            .fetch_messages(user_id, self.commission_id, PAGE_SIZE, None)
            .await
            .context("loading chat failed")?;
        self.has_more = page.len() as u32 == PAGE_SIZE;
        self.messages = page;
        self.cache.store(self.commission_id, self.messages.clone());
        Ok(())
    }

    /// Fetches the page before the oldest held message and prepends it.
    /// Returns how many messages arrived so a view can keep its scroll
    /// position anchored.
    pub async fn load_older(
        &mut self,
        backend: &Arc<dyn CommissionBackend>,
        user_id: UserId,
    ) -> Result<usize> {
        if !self.has_more {
            return Ok(0);
        }
        let before = self.messages.first().map(|message| message.message_id);
        let mut page = backend
            .fetch_messages(user_id, self.commission_id, PAGE_SIZE, before)
            .await
            .context("loading older messages failed")?;
        self.has_more = page.len() as u32 == PAGE_SIZE;
        let count = page.len();
        page.extend(self.messages.drain(..));
        self.messages = page;
        self.cache.store(self.commission_id, self.messages.clone());
        Ok(count)
    }

    /// Folds a realtime event into the session. Events for other
    /// commissions are ignored; a created message already held (because
    /// this client sent it) is not appended twice.
    pub fn apply_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::MessageCreated { message } if message.commission_id == self.commission_id => {
                if self
                    .messages
                    .iter()
                    .any(|held| held.message_id == message.message_id)
                {
                    return;
                }
                self.messages.push(message.clone());
                self.cache.store(self.commission_id, self.messages.clone());
            }
            ServerEvent::MessageUpdated { message } if message.commission_id == self.commission_id => {
                if let Some(held) = self
                    .messages
                    .iter_mut()
                    .find(|held| held.message_id == message.message_id)
                {
                    *held = message.clone();
                    self.cache.store(self.commission_id, self.messages.clone());
                }
            }
            _ => {}
        }
    }

    /// Whether the message at `index` opens a new visual group.
    pub fn is_group_start(&self, index: usize) -> bool {
        message_group_starts(&self.messages)
            .get(index)
            .copied()
            .unwrap_or(true)
    }
}

/// Computes, for every message, whether it starts a new visual group.
///
/// A message continues the previous group only when the sender matches
/// and the gap measured from the group's FIRST message does not exceed
/// the window, so a long run of messages still breaks periodically.
/// Status updates always stand alone.
pub fn message_group_starts(messages: &[MessagePayload]) -> Vec<bool> {
    let mut starts = vec![false; messages.len()];
    let mut group_start = 0;

    for index in 0..messages.len() {
        let is_start = index == 0
            || messages[index].kind == MessageKind::StatusUpdate
            || messages[index - 1].kind == MessageKind::StatusUpdate
            || messages[index].sender_id != messages[index - 1].sender_id
            || (messages[index].sent_at - messages[group_start].sent_at).num_seconds()
                > GROUP_WINDOW_SECS;
        if is_start {
            group_start = index;
        }
        starts[index] = is_start;
    }
    starts
}

/// Username lookups keyed by user id. Concurrent lookups for the same
/// id collapse into one request.
#[derive(Default)]
pub struct UserDirectory {
    state: Mutex<DirectoryState>,
}

#[derive(Default)]
struct DirectoryState {
    names: HashMap<UserId, String>,
    inflight: HashSet<UserId>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self, id: UserId) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.names.get(&id).cloned())
    }

    /// Seeds a name without a lookup, e.g. from a message payload that
    /// already carried the sender's name.
    pub fn record(&self, id: UserId, name: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.names.insert(id, name.into());
        }
    }

    /// Resolves a name, fetching it at most once. Returns `None` while
    /// another resolve for the same id is already underway.
    pub async fn resolve(
        &self,
        backend: &Arc<dyn CommissionBackend>,
        id: UserId,
    ) -> Result<Option<String>> {
        {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => return Ok(None),
            };
            if let Some(name) = state.names.get(&id) {
                return Ok(Some(name.clone()));
            }
            if !state.inflight.insert(id) {
                return Ok(None);
            }
        }

        let fetched = backend.fetch_user(id).await;
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return Ok(None),
        };
        state.inflight.remove(&id);
        match fetched {
            Ok(profile) => {
                let name = profile.label().to_string();
                state.names.insert(id, name.clone());
                Ok(Some(name))
            }
            Err(err) => Err(err.context("user lookup failed")),
        }
    }
}
