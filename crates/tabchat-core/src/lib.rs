//! Conversation state and cross-context synchronization for the tabchat
//! browser extension.
//!
//! Every execution context (a tab's content script, the quick-ask overlay,
//! the side panel, the history page) owns one [`ConversationEngine`]. Contexts
//! share a [`RecordStore`], a [`SettingsStore`] and a [`SyncBus`] medium, all
//! wired together by [`Host`].

pub mod config;
pub mod controllers;
pub mod error;
pub mod host;
pub mod logging;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::EngineConfig;
pub use controllers::ConversationEngine;
pub use error::{EngineError, EngineResult};
pub use host::Host;
pub use models::{
    Conversation, ConversationAction, ConversationSummary, GlobalState, Message, Role,
    Subscription, TabId, TabLocation, TabNavigation, TabState,
};
pub use repositories::{RecordStore, RepositoryError, RepositoryResult};
pub use services::{
    BroadcastSyncBus, SettingsStore, StreamChunk, StreamMerger, StreamStatus, SyncBus, SyncEvent,
    SyncEventKind,
};
