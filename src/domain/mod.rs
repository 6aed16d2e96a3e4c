pub mod endpoint;
pub mod retention;
pub mod sample;

pub use endpoint::{Endpoint, InvalidEndpoint};
pub use retention::{RetentionPolicy, DEFAULT_MAX_ENTRIES, EVICTION_BATCH};
pub use sample::{EndpointStatus, ProbeOutcome, Sample};
