pub mod slp;
pub mod store;

pub use slp::SlpClient;
pub use store::{MemoryStore, SqliteStore};
