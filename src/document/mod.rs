//! MongoDB document store layer.

pub mod manager;
pub mod settings;

pub use manager::{DocumentManager, FindSpec, Page};
pub use settings::DocumentSettings;
