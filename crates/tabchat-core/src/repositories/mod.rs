pub mod conversation_sqlite_repository;
pub mod error;
#[cfg(test)]
pub(crate) mod failing_repository;
pub mod in_memory_repository;
pub mod notifying_repository;
pub mod record_store;
pub mod settings_repository;

pub use conversation_sqlite_repository::ConversationSqliteRepository;
pub use error::{RepositoryError, RepositoryResult};
#[cfg(test)]
pub(crate) use failing_repository::FailingRecordStore;
pub use in_memory_repository::InMemoryRecordStore;
pub use notifying_repository::NotifyingRecordStore;
pub use record_store::{BoxFuture, RecordStore};
pub use settings_repository::{
    InMemorySettingsRepository, SettingsError, SettingsJsonRepository, SettingsMap,
    SettingsRepository, SettingsResult,
};
