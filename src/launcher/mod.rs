pub mod auth;
pub mod binary_patch;
pub mod java;
pub mod marker;
pub mod runner;
pub mod server_list;

pub use runner::{launch_game, GameProcessHandle, LaunchOptions, LaunchSummary};
