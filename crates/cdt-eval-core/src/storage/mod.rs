pub mod json;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use json::JsonBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use store::{ResultBackend, ResultStore, StoreDocument, Summary};
