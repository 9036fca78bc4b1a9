//! Platform OAuth adapters
//!
//! This module provides the adapter layer including:
//! - The `PlatformAdapter` trait defining the uniform OAuth contract
//! - A registry keyed by platform
//! - Google Ads, TikTok for Business and Snapchat Marketing implementations

pub mod google;
pub mod http;
pub mod registry;
pub mod snapchat;
pub mod tiktok;
pub mod trait_;

pub use google::GoogleAdapter;
pub use registry::{Registry, RegistryError};
pub use snapchat::SnapchatAdapter;
pub use tiktok::TiktokAdapter;
pub use trait_::{AdAccount, PlatformAdapter, ProviderAuthError, TokenSet};
