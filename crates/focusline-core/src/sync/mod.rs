//! Offline-first synchronization layer.
//!
//! Local-only records live in the key-value store; confirmed records live
//! in a remote collection. The reconciler merges the two into the
//! collection the UI renders, and the mutation engine applies every change
//! optimistically before trying it remotely.

pub mod http;
pub mod mutation;
pub mod reconciler;
pub mod remote;

#[cfg(test)]
mod reconciler_tests;

pub use http::HttpRemote;
pub use mutation::{CollectionView, OptimisticMutationEngine, SyncReport};
pub use reconciler::{merge, merge_sorted, pending, sort_newest_first};
pub use remote::{CallCounts, InMemoryRemote, OfflineRemote, RemoteCollection, RemoteCollectionClient};
