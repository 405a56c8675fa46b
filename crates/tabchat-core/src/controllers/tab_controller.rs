use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::conversation_engine::ConversationEngine;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    ConversationAction, Listeners, Message, NavigationSignal, NewConversation, Subscription,
    TabId, TabLocation, TabNavigation, TabState, reduce,
};
use crate::repositories::RepositoryError;
use crate::services::DEFAULT_TITLE;

/// Tab-scoped conversations. A tab's conversation lives only in memory until
/// it is adopted into global history, and it is forgotten as soon as the tab
/// leaves the page it was started on.
impl ConversationEngine {
    /// State of `tab_id`, created empty at `location` on first use.
    pub fn get_tab_state(&self, tab_id: TabId, location: &TabLocation) -> TabState {
        self.tabs
            .lock()
            .entry(tab_id)
            .or_insert_with(|| {
                debug!(tab_id, url = %location.url, "Created tab state");
                TabState::new(tab_id, location)
            })
            .clone()
    }

    pub fn tab_state(&self, tab_id: TabId) -> Option<TabState> {
        self.tabs.lock().get(&tab_id).cloned()
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self.tabs.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn subscribe_tab(
        &self,
        tab_id: TabId,
        listener: impl Fn(&TabState) + Send + Sync + 'static,
    ) -> Subscription {
        self.tab_listeners
            .lock()
            .entry(tab_id)
            .or_default()
            .subscribe(listener)
    }

    /// Apply `action` to one tab's messages. Never persisted; only that tab's
    /// subscribers are notified.
    pub fn dispatch_tab(&self, tab_id: TabId, action: ConversationAction) -> EngineResult<TabState> {
        let snapshot = {
            let mut tabs = self.tabs.lock();
            let tab = tabs
                .get_mut(&tab_id)
                .ok_or(EngineError::UnknownTab { tab_id })?;
            tab.messages = reduce(&tab.messages, &action);
            tab.clone()
        };

        self.notify_tab(&snapshot);
        Ok(snapshot)
    }

    /// Called after a tab's state was cleared because it left its page.
    pub fn on_navigation(
        &self,
        tab_id: TabId,
        callback: impl Fn(&TabNavigation) + Send + Sync + 'static,
    ) -> Subscription {
        self.navigation_listeners
            .lock()
            .entry(tab_id)
            .or_default()
            .subscribe(callback)
    }

    /// Compare a tab's stored location with its live one and clear it on
    /// mismatch. Returns whether the tab was reset.
    pub fn handle_navigation(&self, signal: &NavigationSignal) -> bool {
        let (tab_id, location) = match signal {
            NavigationSignal::Navigated { tab_id, location } => (*tab_id, location),
            NavigationSignal::Closed { tab_id } => {
                self.remove_tab(*tab_id);
                return false;
            }
        };

        let (snapshot, from) = {
            let mut tabs = self.tabs.lock();
            let Some(tab) = tabs.get_mut(&tab_id) else {
                return false;
            };
            if tab.matches(location) {
                return false;
            }
            let from = tab.location();
            tab.reset_to(location);
            (tab.clone(), from)
        };

        info!(tab_id, from = %from.url, to = %location.url, "Tab navigated, conversation cleared");
        self.notify_tab(&snapshot);

        let listeners = self.navigation_listeners.lock().get(&tab_id).cloned();
        if let Some(listeners) = listeners {
            listeners.notify(&TabNavigation {
                tab_id,
                from,
                to: location.clone(),
            });
        }
        true
    }

    /// Drive [`ConversationEngine::handle_navigation`] from a signal channel.
    /// The task ends when the channel closes or the engine is dropped.
    pub fn watch_navigation(
        self: &Arc<Self>,
        mut signals: mpsc::UnboundedReceiver<NavigationSignal>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let Some(engine) = weak.upgrade() else { break };
                engine.handle_navigation(&signal);
            }
            debug!("Navigation watcher stopped");
        })
    }

    /// Forget a tab together with its listeners and navigation callbacks.
    pub fn remove_tab(&self, tab_id: TabId) -> bool {
        let removed = self.tabs.lock().remove(&tab_id).is_some();
        self.tab_listeners.lock().remove(&tab_id);
        self.navigation_listeners.lock().remove(&tab_id);
        if removed {
            debug!(tab_id, "Removed tab state");
        }
        removed
    }

    /// Promote the tab's conversation into global history and make it the
    /// active conversation. Returns `None` when the tab has no messages.
    pub async fn sync_tab_to_global(&self, tab_id: TabId) -> EngineResult<Option<String>> {
        let _gate = self.dispatch_gate.lock().await;

        let (messages, linked, origin_url) = {
            let tabs = self.tabs.lock();
            let tab = tabs.get(&tab_id).ok_or(EngineError::UnknownTab { tab_id })?;
            (tab.messages.clone(), tab.conversation_id.clone(), tab.url.clone())
        };

        if messages.is_empty() {
            return Ok(None);
        }

        let id = match linked {
            Some(id) => match self.store.replace_messages(&id, messages.clone()).await {
                Ok(()) => id,
                Err(RepositoryError::NotFound { .. }) => {
                    debug!(tab_id, conv_id = %id, "Linked conversation is gone, adopting anew");
                    self.adopt_new(&origin_url, &messages).await?
                }
                Err(e) => return Err(e.into()),
            },
            None => self.adopt_new(&origin_url, &messages).await?,
        };

        let snapshot = {
            let mut tabs = self.tabs.lock();
            tabs.get_mut(&tab_id).map(|tab| {
                tab.conversation_id = Some(id.clone());
                tab.clone()
            })
        };

        self.set_active(&id, messages.clone());
        // The conversation is adopted either way; a missing title is not fatal.
        if let Err(e) = self.maybe_generate_title(&id, &messages).await {
            warn!(tab_id, conv_id = %id, error = ?e, "Title generation failed");
        }
        self.reload_list_and_notify().await;
        if let Some(snapshot) = snapshot {
            self.notify_tab(&snapshot);
        }

        info!(tab_id, conv_id = %id, count = messages.len(), "Adopted tab conversation");
        Ok(Some(id))
    }

    async fn adopt_new(&self, origin_url: &str, messages: &[Message]) -> EngineResult<String> {
        let id = self
            .store
            .create_conversation(NewConversation {
                title: DEFAULT_TITLE.to_string(),
                origin_url: origin_url.to_string(),
            })
            .await?;

        if let Err(e) = self.store.replace_messages(&id, messages.to_vec()).await {
            // Do not leave an empty conversation behind.
            if let Err(cleanup) = self.store.delete_conversation(&id).await {
                warn!(conv_id = %id, error = ?cleanup, "Failed to remove half-adopted conversation");
            }
            return Err(e.into());
        }
        Ok(id)
    }

    /// Load conversation `id` (or the active one) into the tab and link the
    /// tab to it. Global state is not touched. Without a target this is a
    /// no-op returning the current tab state.
    pub async fn sync_global_to_tab(
        &self,
        tab_id: TabId,
        id: Option<&str>,
    ) -> EngineResult<TabState> {
        let current = self
            .tab_state(tab_id)
            .ok_or(EngineError::UnknownTab { tab_id })?;

        let Some(target) = id.map(str::to_string).or_else(|| self.active_conversation_id()) else {
            return Ok(current);
        };

        let conversation = self.store.get_conversation(&target).await?;

        let snapshot = {
            let mut tabs = self.tabs.lock();
            let tab = tabs
                .get_mut(&tab_id)
                .ok_or(EngineError::UnknownTab { tab_id })?;
            tab.messages = conversation.messages;
            tab.conversation_id = Some(target.clone());
            tab.clone()
        };

        debug!(tab_id, conv_id = %target, "Projected conversation into tab");
        self.notify_tab(&snapshot);
        Ok(snapshot)
    }

    fn notify_tab(&self, state: &TabState) {
        let listeners: Option<Listeners<TabState>> =
            self.tab_listeners.lock().get(&state.tab_id).cloned();
        if let Some(listeners) = listeners {
            listeners.notify(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::repositories::{FailingRecordStore, InMemoryRecordStore};
    use crate::services::{BroadcastSyncBus, is_default_title};
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    async fn engine() -> Arc<ConversationEngine> {
        let engine = ConversationEngine::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(BroadcastSyncBus::new(64)),
        );
        engine.start().await.unwrap();
        engine
    }

    fn page_a() -> TabLocation {
        TabLocation::new("https://a.test/article")
    }

    fn three_message_tab(engine: &ConversationEngine, tab_id: TabId) {
        engine.get_tab_state(tab_id, &page_a());
        engine
            .dispatch_tab(tab_id, ConversationAction::user("What is this page about?"))
            .unwrap();
        engine
            .dispatch_tab(
                tab_id,
                ConversationAction::AddAssistantMessage {
                    content: "It explains borrowing.".into(),
                },
            )
            .unwrap();
        engine
            .dispatch_tab(tab_id, ConversationAction::user("Thanks"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_tab_state_is_created_lazily() {
        let engine = engine().await;
        assert!(engine.tab_state(1).is_none());

        let state = engine.get_tab_state(1, &page_a());
        assert!(state.messages.is_empty());
        assert_eq!(state.conversation_id, None);
        assert_eq!(state.host, "a.test");

        // A second call returns the existing state, not a fresh one.
        engine
            .dispatch_tab(1, ConversationAction::user("hi"))
            .unwrap();
        let again = engine.get_tab_state(1, &TabLocation::new("https://elsewhere.test"));
        assert_eq!(again.messages.len(), 1);
        assert_eq!(engine.tab_ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_tab_dispatch_is_isolated_and_not_persisted() {
        let engine = engine().await;
        engine.get_tab_state(1, &page_a());
        engine.get_tab_state(2, &page_a());

        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = hits.clone();
        let _sub = engine.subscribe_tab(2, move |s| sink.lock().push(s.tab_id));

        engine
            .dispatch_tab(1, ConversationAction::user("only tab one"))
            .unwrap();

        assert_eq!(engine.tab_state(1).unwrap().messages.len(), 1);
        assert!(engine.tab_state(2).unwrap().messages.is_empty());
        assert!(hits.lock().is_empty());
        assert!(engine.global_state().messages.is_empty());
        assert!(engine.store.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_tab_fails() {
        let engine = engine().await;
        let err = engine
            .dispatch_tab(42, ConversationAction::ClearConversation)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTab { tab_id: 42 }));
    }

    #[tokio::test]
    async fn test_navigation_clears_tab_state() {
        let engine = engine().await;
        three_message_tab(&engine, 7);
        engine.sync_tab_to_global(7).await.unwrap();
        assert!(engine.tab_state(7).unwrap().conversation_id.is_some());

        let moves = Arc::new(Mutex::new(Vec::new()));
        let sink = moves.clone();
        let _nav = engine.on_navigation(7, move |nav| sink.lock().push(nav.clone()));

        let page_b = TabLocation::new("https://b.test/");
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = engine.watch_navigation(rx);

        tx.send(NavigationSignal::Navigated {
            tab_id: 7,
            location: page_b.clone(),
        })
        .unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();

        let state = engine.tab_state(7).unwrap();
        assert!(state.messages.is_empty());
        assert_eq!(state.conversation_id, None);
        assert_eq!(state.url, page_b.url);

        let moves = moves.lock();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].from, page_a());
        assert_eq!(moves[0].to, page_b);
    }

    #[tokio::test]
    async fn test_same_location_keeps_tab_state() {
        let engine = engine().await;
        three_message_tab(&engine, 3);

        let reset = engine.handle_navigation(&NavigationSignal::Navigated {
            tab_id: 3,
            location: page_a(),
        });

        assert!(!reset);
        assert_eq!(engine.tab_state(3).unwrap().messages.len(), 3);
    }

    #[tokio::test]
    async fn test_closed_tab_is_removed() {
        let engine = engine().await;
        engine.get_tab_state(5, &page_a());
        let _sub = engine.subscribe_tab(5, |_| {});

        engine.handle_navigation(&NavigationSignal::Closed { tab_id: 5 });

        assert!(engine.tab_state(5).is_none());
        assert!(engine.tab_ids().is_empty());
        assert!(!engine.remove_tab(5));
    }

    #[tokio::test]
    async fn test_adopt_round_trip_keeps_messages_and_titles() {
        let engine = engine().await;
        three_message_tab(&engine, 9);
        let tab_messages = engine.tab_state(9).unwrap().messages;

        let id = engine.sync_tab_to_global(9).await.unwrap().unwrap();

        let conversation = engine.get_conversation(&id).await.unwrap();
        assert_eq!(conversation.messages, tab_messages);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.title, "What is this page about?");
        assert!(!is_default_title(&conversation.title));
        assert_eq!(conversation.origin_url, page_a().url);

        let global = engine.global_state();
        assert!(global.is_active(&id));
        assert_eq!(global.messages, tab_messages);
        assert_eq!(engine.tab_state(9).unwrap().conversation_id, Some(id));
    }

    async fn engine_over(store: &FailingRecordStore) -> Arc<ConversationEngine> {
        let engine =
            ConversationEngine::new(Arc::new(store.clone()), Arc::new(BroadcastSyncBus::new(64)));
        engine.start().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_adoption_survives_title_failure() {
        let store = FailingRecordStore::default();
        let engine = engine_over(&store).await;
        three_message_tab(&engine, 2);
        store.fail_rename.store(true, Ordering::SeqCst);

        let global_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = global_seen.clone();
        let _global = engine.subscribe_global(move |s| {
            sink.lock().push(s.active_conversation_id.clone());
        });
        let tab_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = tab_seen.clone();
        let _tab = engine.subscribe_tab(2, move |s| sink.lock().push(s.conversation_id.clone()));

        let id = engine.sync_tab_to_global(2).await.unwrap().unwrap();

        assert!(engine.global_state().is_active(&id));
        assert_eq!(engine.tab_state(2).unwrap().conversation_id.as_deref(), Some(id.as_str()));
        assert!(global_seen.lock().contains(&Some(id.clone())));
        assert_eq!(tab_seen.lock().last().cloned().flatten(), Some(id.clone()));
        assert!(engine.global_state().summary(&id).is_some());
        assert_eq!(engine.get_conversation(&id).await.unwrap().title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_failed_adoption_leaves_no_conversation() {
        let store = FailingRecordStore::default();
        let engine = engine_over(&store).await;
        three_message_tab(&engine, 6);
        store.fail_replace.store(true, Ordering::SeqCst);

        let err = engine.sync_tab_to_global(6).await.unwrap_err();

        assert!(matches!(err, EngineError::Persistence(_)));
        assert!(engine.store.list_conversations().await.unwrap().is_empty());
        assert_eq!(engine.global_state().active_conversation_id, None);
        assert_eq!(engine.tab_state(6).unwrap().conversation_id, None);
        assert_eq!(engine.tab_state(6).unwrap().messages.len(), 3);
    }

    #[tokio::test]
    async fn test_readoption_reuses_linked_conversation() {
        let engine = engine().await;
        three_message_tab(&engine, 1);
        let first = engine.sync_tab_to_global(1).await.unwrap().unwrap();

        engine
            .dispatch_tab(1, ConversationAction::user("one more"))
            .unwrap();
        let second = engine.sync_tab_to_global(1).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.global_state().conversations.len(), 1);
        assert_eq!(engine.get_conversation(&first).await.unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_dangling_link_adopts_into_new_conversation() {
        let engine = engine().await;
        three_message_tab(&engine, 1);
        let first = engine.sync_tab_to_global(1).await.unwrap().unwrap();
        engine.store.delete_conversation(&first).await.unwrap();

        let second = engine.sync_tab_to_global(1).await.unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(engine.get_conversation(&second).await.unwrap().messages.len(), 3);
    }

    #[tokio::test]
    async fn test_adopting_empty_tab_is_noop() {
        let engine = engine().await;
        engine.get_tab_state(1, &page_a());

        assert_eq!(engine.sync_tab_to_global(1).await.unwrap(), None);
        assert!(engine.global_state().conversations.is_empty());
    }

    #[tokio::test]
    async fn test_project_global_into_tab() {
        let engine = engine().await;
        let id = engine.create_conversation("").await.unwrap();
        engine
            .dispatch(ConversationAction::user("from history"))
            .await
            .unwrap();
        engine.get_tab_state(4, &page_a());
        let before = engine.global_state();

        let tab = engine.sync_global_to_tab(4, None).await.unwrap();

        assert_eq!(tab.conversation_id.as_deref(), Some(id.as_str()));
        assert_eq!(tab.messages.len(), 1);
        assert_eq!(tab.messages[0].content, "from history");
        assert_eq!(engine.global_state(), before);
    }

    #[tokio::test]
    async fn test_project_without_target_is_noop() {
        let engine = engine().await;
        let original = engine.get_tab_state(4, &page_a());

        let tab = engine.sync_global_to_tab(4, None).await.unwrap();
        assert_eq!(tab, original);

        let err = engine.sync_global_to_tab(4, Some("missing")).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
