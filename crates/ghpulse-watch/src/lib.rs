//!
//! ghpulse-watch keeps a list of watched GitHub repositories and periodically snapshots their
//! statistics into the blob store
//!
pub mod collect;
pub mod error;
pub mod github;
pub mod repo;
pub mod snapshot;
pub mod watchlist;

pub use error::{WatchError, WatchResult};
