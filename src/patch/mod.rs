//! Patch archive download and application through butler.

pub mod apply;
pub mod butler;
pub mod download;

pub use apply::{apply_patch, apply_patch_in_place, PatchOutcome};
pub use butler::install_butler;
pub use download::PatchDownloader;

/// Anything smaller cannot be a real patch archive
pub const MIN_PATCH_SIZE: u64 = 1024 * 1024;

/// Butler staging directory, created inside the target game directory
pub const STAGING_DIR_NAME: &str = "staging-temp";
