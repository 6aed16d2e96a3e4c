pub mod probe_client;
pub mod sample_store;

pub use probe_client::ProbeClient;
pub use sample_store::{PersistenceError, PersistenceResult, SampleStore};
