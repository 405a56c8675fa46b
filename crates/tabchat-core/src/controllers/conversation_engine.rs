use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::{
    Conversation, ConversationAction, ConversationSummary, GlobalState, Listeners, Message,
    NewConversation, Subscription, TabId, TabNavigation, TabState, first_user_content, reduce,
};
use crate::repositories::{NotifyingRecordStore, RecordStore};
use crate::services::{
    ContextId, DEFAULT_TITLE, SyncBus, SyncEvent, SyncEventKind, derive_title, is_default_title,
};

/// Conversation state for one execution context.
///
/// Owns the global view (active conversation, its messages, the conversation
/// list) and every tab-scoped view of the context. All persistent writes go
/// through a [`NotifyingRecordStore`], so other contexts sharing the store and
/// the bus medium learn about them; this engine in turn reloads its own state
/// when they write.
///
/// Mutations of the global messages are serialized by an async gate held
/// across reduce, persist and commit. Reads never wait on it.
pub struct ConversationEngine {
    context_id: ContextId,
    pub(super) store: Arc<dyn RecordStore>,
    bus: Arc<dyn SyncBus>,
    global: RwLock<GlobalState>,
    global_listeners: Listeners<GlobalState>,
    pub(super) tabs: Mutex<HashMap<TabId, TabState>>,
    pub(super) tab_listeners: Mutex<HashMap<TabId, Listeners<TabState>>>,
    pub(super) navigation_listeners: Mutex<HashMap<TabId, Listeners<TabNavigation>>>,
    pub(super) dispatch_gate: AsyncMutex<()>,
    bus_subscription: Mutex<Option<Subscription>>,
}

impl ConversationEngine {
    /// Build an engine over the shared `store` and `bus`. Call
    /// [`ConversationEngine::start`] to load the list and begin listening.
    pub fn new(store: Arc<dyn RecordStore>, bus: Arc<dyn SyncBus>) -> Arc<Self> {
        let context_id = ContextId::new();
        let store: Arc<dyn RecordStore> =
            Arc::new(NotifyingRecordStore::new(store, bus.clone(), context_id));

        Arc::new(Self {
            context_id,
            store,
            bus,
            global: RwLock::new(GlobalState::default()),
            global_listeners: Listeners::new(),
            tabs: Mutex::new(HashMap::new()),
            tab_listeners: Mutex::new(HashMap::new()),
            navigation_listeners: Mutex::new(HashMap::new()),
            dispatch_gate: AsyncMutex::new(()),
            bus_subscription: Mutex::new(None),
        })
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Subscribe to other contexts' changes, then load the conversation list.
    ///
    /// Incoming events are handled one at a time on a background task that
    /// holds only a weak reference, so dropping the engine ends it.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncEvent>();
        let subscription = self.bus.subscribe(
            self.context_id,
            Arc::new(move |event: &SyncEvent| {
                let _ = tx.send(event.clone());
            }),
        );
        *self.bus_subscription.lock() = Some(subscription);

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(engine) = weak.upgrade() else { break };
                if let Err(e) = engine.handle_sync_event(&event).await {
                    warn!(
                        error = ?e,
                        kind = ?event.kind,
                        conv_id = %event.conversation_id,
                        "Failed to apply change from another context"
                    );
                }
            }
            debug!("Sync event worker stopped");
        });

        info!(context = %self.context_id, transport = ?self.bus.transport(), "Conversation engine started");
        self.refresh_conversations().await
    }

    /// Stop reacting to other contexts. Local operations keep working.
    pub fn shutdown(&self) {
        if self.bus_subscription.lock().take().is_some() {
            info!(context = %self.context_id, "Conversation engine detached from sync bus");
        }
    }

    pub fn global_state(&self) -> GlobalState {
        self.global.read().clone()
    }

    pub fn subscribe_global(
        &self,
        listener: impl Fn(&GlobalState) + Send + Sync + 'static,
    ) -> Subscription {
        self.global_listeners.subscribe(listener)
    }

    /// Reload the conversation list from the store.
    pub async fn refresh_conversations(&self) -> EngineResult<()> {
        let conversations = self.store.list_conversations().await?;
        self.global.write().conversations = conversations;
        self.notify_global();
        Ok(())
    }

    pub async fn create_conversation(&self, origin_url: &str) -> EngineResult<String> {
        let _gate = self.dispatch_gate.lock().await;

        let id = self
            .store
            .create_conversation(NewConversation {
                title: DEFAULT_TITLE.to_string(),
                origin_url: origin_url.to_string(),
            })
            .await?;

        {
            let mut global = self.global.write();
            global.active_conversation_id = Some(id.clone());
            global.messages.clear();
        }
        info!(conv_id = %id, "Created conversation");

        self.reload_list_and_notify().await;
        Ok(id)
    }

    /// Make `id` the active conversation. Fails with `NotFound` when it was
    /// deleted, possibly by another context; the stale list is refreshed.
    pub async fn switch_to(&self, id: &str) -> EngineResult<()> {
        let _gate = self.dispatch_gate.lock().await;

        let conversation = match self.store.get_conversation(id).await {
            Ok(conversation) => conversation,
            Err(e) => {
                let err = EngineError::from(e);
                if matches!(err, EngineError::NotFound { .. }) {
                    self.reload_list_and_notify().await;
                }
                return Err(err);
            }
        };

        {
            let mut global = self.global.write();
            global.active_conversation_id = Some(conversation.id);
            global.messages = conversation.messages;
        }
        debug!(conv_id = %id, "Switched active conversation");

        self.notify_global();
        Ok(())
    }

    /// Fall back to "no active conversation".
    pub async fn clear_active(&self) {
        let _gate = self.dispatch_gate.lock().await;
        self.global.write().clear_active();
        self.notify_global();
    }

    /// The single mutation entry point for the global messages.
    pub async fn dispatch(&self, action: ConversationAction) -> EngineResult<()> {
        let _gate = self.dispatch_gate.lock().await;
        self.dispatch_locked(&action).await.map(|_| ())
    }

    /// Reduce, persist, commit, notify. Caller holds the dispatch gate.
    async fn dispatch_locked(&self, action: &ConversationAction) -> EngineResult<Vec<Message>> {
        let (active_id, current) = {
            let global = self.global.read();
            (global.active_conversation_id.clone(), global.messages.clone())
        };

        let next = reduce(&current, action);

        if let Some(id) = &active_id
            && let Err(e) = self.store.replace_messages(id, next.clone()).await
        {
            let err = EngineError::from(e);
            warn!(conv_id = %id, action = action.name(), error = %err, "Dispatch not persisted, state unchanged");
            return Err(err);
        }

        self.global.write().messages = next.clone();
        self.notify_global();

        if let Some(id) = &active_id
            && adds_first_user_message(action, &next)
        {
            match self.maybe_generate_title(id, &next).await {
                Ok(true) => self.reload_list_and_notify().await,
                Ok(false) => {}
                Err(e) => warn!(conv_id = %id, error = ?e, "Title generation failed"),
            }
        }

        Ok(next)
    }

    /// Name a conversation after its first user message while it still
    /// carries the default title. Returns whether a title was written; the
    /// caller refreshes the list.
    pub(super) async fn maybe_generate_title(
        &self,
        id: &str,
        messages: &[Message],
    ) -> EngineResult<bool> {
        let cached_default = self
            .global
            .read()
            .summary(id)
            .is_none_or(|summary| is_default_title(&summary.title));
        if !cached_default {
            return Ok(false);
        }

        let Some(first) = first_user_content(messages) else {
            return Ok(false);
        };

        // The list may be stale; the store is authoritative.
        let stored = self.store.get_conversation(id).await?;
        if !is_default_title(&stored.title) {
            return Ok(false);
        }

        let title = derive_title(first);
        if is_default_title(&title) {
            return Ok(false);
        }

        self.store.rename_conversation(id, &title).await?;
        info!(conv_id = %id, title = %title, "Generated conversation title");
        Ok(true)
    }

    pub async fn rename(&self, id: &str, title: &str) -> EngineResult<()> {
        self.store.rename_conversation(id, title).await?;
        self.reload_list_and_notify().await;
        Ok(())
    }

    /// Delete one conversation. Deleting the active one clears it.
    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        let _gate = self.dispatch_gate.lock().await;

        self.store.delete_conversation(id).await?;
        {
            let mut global = self.global.write();
            if global.is_active(id) {
                global.clear_active();
            }
        }
        info!(conv_id = %id, "Deleted conversation");

        self.reload_list_and_notify().await;
        Ok(())
    }

    /// Delete every conversation. Returns the removed ids.
    pub async fn delete_all(&self) -> EngineResult<Vec<String>> {
        let _gate = self.dispatch_gate.lock().await;

        let ids = self.store.delete_all().await?;
        self.global.write().clear_active();
        info!(count = ids.len(), "Deleted all conversations");

        self.reload_list_and_notify().await;
        Ok(ids)
    }

    pub async fn get_conversation(&self, id: &str) -> EngineResult<Conversation> {
        Ok(self.store.get_conversation(id).await?)
    }

    /// The `limit` most recently updated conversations from the cached list.
    pub fn list_recent(&self, limit: usize) -> Vec<ConversationSummary> {
        self.global.read().list_recent(limit).to_vec()
    }

    /// React to a change published by another context.
    pub(crate) async fn handle_sync_event(&self, event: &SyncEvent) -> EngineResult<()> {
        let id = event.conversation_id.as_str();
        debug!(kind = ?event.kind, conv_id = %id, "Received change notification");

        if event.kind.affects_list() {
            if event.kind == SyncEventKind::Deleted {
                let _gate = self.dispatch_gate.lock().await;
                let mut global = self.global.write();
                if global.is_active(id) {
                    info!(conv_id = %id, "Active conversation deleted elsewhere");
                    global.clear_active();
                }
            }
            return self.refresh_conversations().await;
        }

        // Message events only touch the active conversation's messages.
        let _gate = self.dispatch_gate.lock().await;
        if !self.global.read().is_active(id) {
            return Ok(());
        }

        match self.store.get_conversation(id).await {
            Ok(conversation) => {
                self.global.write().messages = conversation.messages;
            }
            Err(e) => {
                let err = EngineError::from(e);
                if !matches!(err, EngineError::NotFound { .. }) {
                    return Err(err);
                }
                self.global.write().clear_active();
            }
        }

        self.notify_global();
        Ok(())
    }

    /// Apply `action` to conversation `id` wherever it currently lives: through
    /// the normal dispatch path when it is the active one, otherwise as a
    /// read-modify-write against the store. Returns whether it was active.
    pub(crate) async fn apply_to_conversation(
        &self,
        id: &str,
        action: &ConversationAction,
    ) -> EngineResult<bool> {
        let _gate = self.dispatch_gate.lock().await;

        let focused = self.global.read().is_active(id);
        if focused {
            self.dispatch_locked(action).await?;
            return Ok(true);
        }

        let stored = self.store.get_conversation(id).await?;
        let next = reduce(&stored.messages, action);
        self.store.replace_messages(id, next).await?;
        Ok(false)
    }

    /// Refresh the list, logging instead of failing: the caller's own write
    /// already succeeded.
    pub(super) async fn reload_list_and_notify(&self) {
        match self.store.list_conversations().await {
            Ok(conversations) => self.global.write().conversations = conversations,
            Err(e) => warn!(error = ?e, "Failed to refresh conversation list"),
        }
        self.notify_global();
    }

    pub(super) fn notify_global(&self) {
        let snapshot = self.global.read().clone();
        self.global_listeners.notify(&snapshot);
    }

    pub(super) fn active_conversation_id(&self) -> Option<String> {
        self.global.read().active_conversation_id.clone()
    }

    /// Make `id` active with `messages` without going through the store.
    pub(super) fn set_active(&self, id: &str, messages: Vec<Message>) {
        let mut global = self.global.write();
        global.active_conversation_id = Some(id.to_string());
        global.messages = messages;
    }
}

/// Titling is attempted once per conversation, on the dispatch that adds its
/// first user message.
fn adds_first_user_message(action: &ConversationAction, next: &[Message]) -> bool {
    matches!(action, ConversationAction::AddUserMessage { .. })
        && next.iter().filter(|m| m.is_user()).count() == 1
}

impl Drop for ConversationEngine {
    fn drop(&mut self) {
        debug!(context = %self.context_id, "Conversation engine dropped");
    }
}
