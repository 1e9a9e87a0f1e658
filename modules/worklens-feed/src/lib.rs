pub mod cursor;
pub mod error;
pub mod listings;
pub mod read_state;
pub mod search;

pub use cursor::{Cursor, CursorCodec};
pub use error::{FeedError, Result};
pub use listings::{ItemDetail, ListFilter, Listings, Page};
pub use read_state::{is_unread, PendingSet, ReadStates};
pub use search::{Search, SearchHit};
