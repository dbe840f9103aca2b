//! Storage backends: LanceDB for page vectors, SQLite for conversation memory.

pub mod lancedb;
pub mod sqlite;

pub use self::lancedb::LanceVectorIndex;
pub use self::sqlite::SqliteConversationStore;
