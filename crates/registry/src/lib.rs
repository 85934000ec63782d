//! Swap registry: keyed store of swap state shared by all running swaps
//!
//! Two backends implement [`SwapRegistry`]:
//! - `InMemoryRegistry` for tests and single-process runs
//! - `SqliteRegistry` for state that must survive a restart

pub mod error;
pub mod sqlite_store;
pub mod store;

pub use error::*;
pub use sqlite_store::*;
pub use store::*;
