//! Result persistence.
//!
//! The intersection is durable only once a [`ResultStore`] accepted it.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::{is_safe_file_stem, FileResultStore};
pub use memory::MemoryResultStore;
pub use traits::{PersistedResult, ResultStore, StoreError, RESULT_FORMAT_VERSION};
