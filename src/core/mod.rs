//! Storage contract, reference validation, and bundle assembly.

pub mod bundle;
pub mod storage;
pub mod validator;

pub use bundle::{Bundle, BundleEntry, BundleType, assemble_history, assemble_searchset};
pub use storage::RecordStorage;
pub use validator::{RecordReference, ReferenceValidator};
