pub mod action;
pub mod conversation;
pub mod global_state;
pub mod message;
pub mod subscription;
pub mod tab_state;

pub use action::{ConversationAction, first_user_content, reduce};
pub use conversation::{Conversation, ConversationRecord, ConversationSummary, NewConversation};
pub use global_state::GlobalState;
pub use message::{Message, MessageRecord, Part, Role, now_millis};
pub use subscription::{Listeners, Subscription};
pub use tab_state::{NavigationSignal, TabId, TabLocation, TabNavigation, TabState};
