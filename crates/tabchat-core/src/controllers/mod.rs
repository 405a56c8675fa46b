pub mod conversation_engine;
pub mod tab_controller;

pub use conversation_engine::ConversationEngine;
