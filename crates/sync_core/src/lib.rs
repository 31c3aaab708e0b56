use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ChannelId, ConversationId, TempId, UserId},
    error::ApiError,
    protocol::{
        ChannelSummary, IdentityInfo, MembershipUpdate, MessagePayload, PushFrame,
        SendMessageRequest, UserSummary,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{info, warn};
use url::Url;

pub mod dispatcher;
pub mod error;
pub mod pagination;
pub mod reconciler;
pub mod roster;
pub mod store;

pub use dispatcher::{InboundEvent, RealtimeDispatcher};
pub use error::SyncError;
pub use pagination::{BackfillOutcome, BackfillRequest, PaginationController, DEFAULT_PAGE_SIZE};
pub use reconciler::{IngestOutcome, Reconciler};
pub use roster::Roster;
pub use store::{ConversationStore, MessageIdentity, StoredMessage};

#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
}

/// Signals for the rendering/UI collaborator.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    IdentityResolved(LocalIdentity),
    /// The named conversation's timeline changed and should be re-rendered
    /// if visible.
    TimelineUpdated(ConversationId),
    UnreadIncremented(ConversationId),
    HistoryPrepended(BackfillOutcome),
    RosterUpdated,
    /// The viewed channel was removed out from under us.
    ActiveConversationCleared(ChannelId),
    /// A send failed terminally; its optimistic entry has been removed.
    SendFailed {
        conversation: ConversationId,
        temp_id: TempId,
        reason: String,
    },
    Disconnected,
    Error(String),
}

struct EngineState {
    identity: Option<LocalIdentity>,
    store: ConversationStore,
    roster: Roster,
    pagination: PaginationController,
    active: Option<ConversationId>,
    reconciler: Option<Reconciler>,
    dispatcher: Option<RealtimeDispatcher>,
    push_task: Option<JoinHandle<()>>,
}

/// Composition root of the synchronization engine: owns the store, roster
/// and pagination state behind one lock, talks to the backend over HTTP, and
/// feeds routed push events through the reconciler. All engine mutations go
/// through this type; renders receive cloned read views.
pub struct SyncClient {
    http: Client,
    base_url: String,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(base_url: impl Into<String>) -> Arc<Self> {
        Self::with_page_size(base_url, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(base_url: impl Into<String>, page_size: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            inner: Mutex::new(EngineState {
                identity: None,
                store: ConversationStore::new(),
                roster: Roster::new(),
                pagination: PaginationController::new(page_size),
                active: None,
                reconciler: None,
                dispatcher: None,
                push_task: None,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Resolves who the local user is. Must complete before `connect`: the
    /// private subscriptions are keyed by user id, and subscribing early
    /// would miss or misattribute messages.
    pub async fn resolve_identity(&self) -> Result<LocalIdentity, SyncError> {
        let info: IdentityInfo = self.get_json("/api/token/info").await?;
        if !info.authenticated {
            return Err(SyncError::AuthRequired);
        }
        let user_id = info.user_id.ok_or_else(|| {
            SyncError::MalformedResponse("authenticated identity without a user id".to_string())
        })?;
        let identity = LocalIdentity {
            display_name: info
                .username
                .unwrap_or_else(|| user_id.as_str().to_string()),
            avatar: info.picture,
            user_id: user_id.clone(),
        };
        {
            let mut guard = self.inner.lock().await;
            guard.identity = Some(identity.clone());
            guard.reconciler = Some(Reconciler::new(user_id.clone()));
            guard.dispatcher = Some(RealtimeDispatcher::new(&user_id));
        }
        info!(user_id = %identity.user_id, "identity resolved");
        let _ = self
            .events
            .send(SyncEvent::IdentityResolved(identity.clone()));
        Ok(identity)
    }

    pub async fn local_identity(&self) -> Option<LocalIdentity> {
        self.inner.lock().await.identity.clone()
    }

    /// Spawns the push read loop. Re-armable: calling again replaces the
    /// previous subscription.
    pub async fn connect(self: &Arc<Self>, ws_url: &str) -> Result<(), SyncError> {
        {
            let guard = self.inner.lock().await;
            if guard.identity.is_none() {
                return Err(SyncError::IdentityRequired);
            }
        }
        let url = Url::parse(ws_url)
            .map_err(|err| SyncError::Transport(format!("invalid websocket url: {err}")))?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SyncError::Transport(err.to_string()))?;
        let (_, mut reader) = ws_stream.split();

        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        if let Err(err) = client.ingest_raw_frame(&text).await {
                            warn!("dropping push frame: {err}");
                            let _ = client.events.send(SyncEvent::Error(err.to_string()));
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = client
                            .events
                            .send(SyncEvent::Error(format!("push channel failed: {err}")));
                        break;
                    }
                }
            }
            let _ = client.events.send(SyncEvent::Disconnected);
        });

        let previous = {
            let mut guard = self.inner.lock().await;
            guard.push_task.replace(task)
        };
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        let task = {
            let mut guard = self.inner.lock().await;
            guard.push_task.take()
        };
        if let Some(task) = task {
            task.abort();
            let _ = self.events.send(SyncEvent::Disconnected);
        }
    }

    async fn ingest_raw_frame(&self, text: &str) -> anyhow::Result<()> {
        let frame: PushFrame =
            serde_json::from_str(text).context("push frame is not valid JSON")?;
        let event = {
            let guard = self.inner.lock().await;
            let dispatcher = guard
                .dispatcher
                .as_ref()
                .context("push frame before identity resolution")?;
            dispatcher.route(frame)?
        };
        self.apply_inbound(event).await;
        Ok(())
    }

    /// Entry point for push events. `connect` feeds this from its websocket
    /// loop; embedders supplying their own transport call it directly.
    pub async fn apply_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::Snapshot {
                channel_id,
                messages,
            } => {
                let conversation = {
                    let mut guard = self.inner.lock().await;
                    let state = &mut *guard;
                    let Some(reconciler) = state.reconciler.as_ref() else {
                        return;
                    };
                    reconciler.replace_snapshot(&mut state.store, channel_id, &messages)
                };
                let _ = self.events.send(SyncEvent::TimelineUpdated(conversation));
            }
            InboundEvent::Incremental(messages) => {
                let outcomes = {
                    let mut guard = self.inner.lock().await;
                    let state = &mut *guard;
                    let Some(reconciler) = state.reconciler.as_ref() else {
                        return;
                    };
                    reconciler.append_batch(
                        &mut state.store,
                        &state.roster,
                        state.active.as_ref(),
                        &messages,
                    )
                };
                for outcome in outcomes {
                    let event = match outcome {
                        IngestOutcome::RenderNow(conversation)
                        | IngestOutcome::ResolvedPending(conversation) => {
                            SyncEvent::TimelineUpdated(conversation)
                        }
                        IngestOutcome::UnreadIncrement(conversation) => {
                            SyncEvent::UnreadIncremented(conversation)
                        }
                        IngestOutcome::Duplicate | IngestOutcome::Discarded => continue,
                    };
                    let _ = self.events.send(event);
                }
            }
            InboundEvent::Membership(update) => self.apply_membership(update).await,
        }
    }

    async fn apply_membership(&self, update: MembershipUpdate) {
        match update {
            MembershipUpdate::ChannelAdded { channel } => {
                let added = {
                    let mut guard = self.inner.lock().await;
                    guard.roster.upsert_channel(channel)
                };
                if added {
                    let _ = self.events.send(SyncEvent::RosterUpdated);
                }
            }
            MembershipUpdate::ChannelRemoved { channel_id } => {
                let (removed, was_active) = {
                    let mut guard = self.inner.lock().await;
                    let state = &mut *guard;
                    let removed = state.roster.remove_channel(channel_id);
                    state
                        .store
                        .remove_conversation(&ConversationId::Channel(channel_id));
                    let was_active =
                        state.active == Some(ConversationId::Channel(channel_id));
                    if was_active {
                        state.active = None;
                    }
                    (removed, was_active)
                };
                if removed {
                    let _ = self.events.send(SyncEvent::RosterUpdated);
                }
                if was_active {
                    let _ = self
                        .events
                        .send(SyncEvent::ActiveConversationCleared(channel_id));
                }
            }
        }
    }

    pub async fn refresh_roster(&self) -> Result<(), SyncError> {
        let channels: Vec<ChannelSummary> = self.get_json("/api/chat/user/channels").await?;
        let users: Vec<UserSummary> = self.get_json("/api/chat/user/conversations").await?;
        {
            let mut guard = self.inner.lock().await;
            guard.roster.replace_channels(channels);
            guard.roster.replace_users(users);
        }
        let _ = self.events.send(SyncEvent::RosterUpdated);
        Ok(())
    }

    /// Loads the most-recent page for a conversation, makes it the active
    /// view and replaces its cached timeline. On a shape failure the view
    /// degrades to an empty timeline before the error propagates, so one bad
    /// response cannot poison other conversations.
    pub async fn open_conversation(&self, conversation: ConversationId) -> Result<(), SyncError> {
        let path = match &conversation {
            ConversationId::Channel(channel_id) => {
                format!("/api/chat/channel/{}/initial", channel_id.0)
            }
            ConversationId::Direct(peer) => {
                let identity = self
                    .local_identity()
                    .await
                    .ok_or(SyncError::IdentityRequired)?;
                format!(
                    "/api/chat/conversation?user_id1={}&user_id2={peer}",
                    identity.user_id
                )
            }
        };

        let fetched: Result<Vec<MessagePayload>, SyncError> = self.get_json(&path).await;
        let (result, messages) = match fetched {
            Ok(messages) => (Ok(()), messages),
            Err(err @ SyncError::MalformedResponse(_)) => (Err(err), Vec::new()),
            Err(err) => return Err(err),
        };

        {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            let stored = messages
                .iter()
                .filter_map(StoredMessage::from_payload)
                .collect();
            state.store.replace_timeline(&conversation, stored);
            state.active = Some(conversation.clone());
        }
        let _ = self.events.send(SyncEvent::TimelineUpdated(conversation));
        result
    }

    pub async fn set_active_conversation(&self, conversation: Option<ConversationId>) {
        let mut guard = self.inner.lock().await;
        guard.active = conversation;
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.inner.lock().await.active.clone()
    }

    /// Scroll-top entry point. Returns Ok(false) when nothing was fetched:
    /// no active conversation, no more history, or a fetch already in
    /// flight. A late completion for a conversation that is no longer active
    /// is still applied to the store but signals no viewport anchor.
    pub async fn trigger_history_fetch(&self) -> Result<bool, SyncError> {
        let request = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            let Some(active) = state.active.clone() else {
                return Ok(false);
            };
            state.pagination.try_begin(&active, &state.store)
        };
        let Some(request) = request else {
            return Ok(false);
        };

        let path = format!(
            "/api/chat/channel/{}/history?before_sequence={}",
            request.channel_id.0, request.before_sequence
        );
        match self.get_json::<Vec<MessagePayload>>(&path).await {
            Ok(page) => {
                let (outcome, still_active) = {
                    let mut guard = self.inner.lock().await;
                    let state = &mut *guard;
                    let older = page
                        .iter()
                        .filter_map(StoredMessage::from_payload)
                        .collect();
                    let outcome = state.pagination.complete(&mut state.store, &request, older);
                    let still_active = state.active.as_ref() == Some(&request.conversation);
                    (outcome, still_active)
                };
                if still_active {
                    let _ = self.events.send(SyncEvent::HistoryPrepended(outcome));
                }
                Ok(true)
            }
            Err(err) => {
                let mut guard = self.inner.lock().await;
                guard.pagination.fail();
                warn!("history fetch failed: {err}");
                Err(err)
            }
        }
    }

    /// Optimistic send: the message is rendered immediately under a temp id,
    /// then either resolved by the acknowledgment or removed with an
    /// explicit `SendFailed` signal. A failed send never pretends to have
    /// succeeded.
    pub async fn send_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<TempId, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::SendRejected {
                message: "empty message body".to_string(),
            });
        }
        let identity = self
            .local_identity()
            .await
            .ok_or(SyncError::IdentityRequired)?;

        let temp_id = TempId::generate();
        let mut pending = StoredMessage::pending(
            temp_id,
            identity.user_id.clone(),
            conversation.channel(),
            text,
            Utc::now(),
        );
        pending.sender_name = Some(identity.display_name.clone());
        pending.sender_avatar = identity.avatar.clone();
        {
            let mut guard = self.inner.lock().await;
            guard.store.push_pending(&conversation, pending);
        }
        let _ = self
            .events
            .send(SyncEvent::TimelineUpdated(conversation.clone()));

        let request = SendMessageRequest {
            sender_id: identity.user_id,
            content: text.to_string(),
            to_user_id: match &conversation {
                ConversationId::Direct(peer) => Some(peer.clone()),
                ConversationId::Channel(_) => None,
            },
            to_channel_id: conversation.channel(),
        };

        match self.post_send(&request).await {
            Ok(ack) => {
                let updated = {
                    let mut guard = self.inner.lock().await;
                    let state = &mut *guard;
                    if state.store.resolve_optimistic(&conversation, temp_id, &ack) {
                        true
                    } else {
                        // A snapshot replacing the timeline while the ack was
                        // in flight evicts the pending entry. Admit the
                        // acknowledged message directly; upsert dedups by
                        // message id if the snapshot already carried it.
                        match StoredMessage::from_payload(&ack) {
                            Some(stored) => state.store.upsert(&conversation, stored),
                            None => {
                                warn!(
                                    message_id = ack.message_id.0,
                                    "send acknowledgment without a sequence number"
                                );
                                false
                            }
                        }
                    }
                };
                if updated {
                    let _ = self.events.send(SyncEvent::TimelineUpdated(conversation));
                }
                Ok(temp_id)
            }
            Err(err) => {
                {
                    let mut guard = self.inner.lock().await;
                    guard.store.remove_optimistic(&conversation, temp_id);
                }
                let _ = self.events.send(SyncEvent::SendFailed {
                    conversation: conversation.clone(),
                    temp_id,
                    reason: err.to_string(),
                });
                let _ = self.events.send(SyncEvent::TimelineUpdated(conversation));
                Err(err)
            }
        }
    }

    async fn post_send(&self, request: &SendMessageRequest) -> Result<MessagePayload, SyncError> {
        let response = self
            .http
            .post(format!("{}/api/chat/send", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(SyncError::from)?;
        let status = response.status();
        if status.is_success() {
            return Self::decode(response).await;
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::AuthRequired);
        }
        // The backend explains declined sends in its error body when it can.
        let message = match response.json::<ApiError>().await {
            Ok(body) => body.message,
            Err(_) => format!("unexpected status {status}"),
        };
        Err(SyncError::SendRejected { message })
    }

    pub async fn timeline(&self, conversation: &ConversationId) -> Vec<StoredMessage> {
        self.inner.lock().await.store.get(conversation).to_vec()
    }

    pub async fn has_more_history(&self, conversation: &ConversationId) -> bool {
        self.inner.lock().await.store.has_more_history(conversation)
    }

    pub async fn roster_channels(&self) -> Vec<ChannelSummary> {
        self.inner.lock().await.roster.channels()
    }

    pub async fn roster_users(&self) -> Vec<UserSummary> {
        self.inner.lock().await.roster.users()
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(SyncError::from)?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SyncError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::AuthRequired);
        }
        if !status.is_success() {
            return Err(SyncError::Transport(format!("unexpected status {status}")));
        }
        let text = response.text().await.map_err(SyncError::from)?;
        // A login page served where JSON was expected means the session died.
        if text.trim_start().starts_with('<') {
            return Err(SyncError::MalformedResponse(
                "received HTML where JSON was expected".to_string(),
            ));
        }
        serde_json::from_str(&text).map_err(|err| SyncError::MalformedResponse(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
