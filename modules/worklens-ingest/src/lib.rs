pub mod error;
pub mod linker;
pub mod normalize;
pub mod store;
pub mod sync;

pub use error::{IngestError, Result};
pub use linker::{LinkOutcome, Linker};
pub use normalize::NewEvent;
pub use store::{EventStore, StoreOutcome};
pub use sync::{SyncSummary, Syncer};
