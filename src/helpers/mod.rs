pub mod ttlcache;
pub mod request_queue;
pub mod http_client;
pub mod catalog;
pub mod artistsplitter;
pub mod reconciler;

pub use catalog::{CatalogClient, CatalogConfig, CatalogError};
pub use reconciler::Reconciler;
pub use request_queue::{QueueConfig, QueueError, RequestQueue, TaskOutcome};
pub use ttlcache::TtlCache;
