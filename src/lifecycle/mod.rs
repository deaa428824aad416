//! Platform lifecycle binding.
//!
//! - [`ComponentRegistry`]: components by id, resolved with a capability check
//! - [`PsiLifecycle`]: `initialize` / `run` / `finalize` over one session

pub mod adapter;
pub mod registry;

pub use adapter::{ComponentBindings, PsiLifecycle};
pub use registry::{Component, ComponentRegistry};
