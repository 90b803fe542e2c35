pub mod client;

pub use client::{download_file_with_retry, HashAlgorithm, RetryConfig};
