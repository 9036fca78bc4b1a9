//! Advertising platform identifiers.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Advertising platforms the service can connect to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[sea_orm(string_value = "google")]
    Google,
    #[sea_orm(string_value = "tiktok")]
    Tiktok,
    #[sea_orm(string_value = "snapchat")]
    Snapchat,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Google, Platform::Tiktok, Platform::Snapchat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Google => "google",
            Platform::Tiktok => "tiktok",
            Platform::Snapchat => "snapchat",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown platform slug
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{0}'")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Platform::Google),
            "tiktok" => Ok(Platform::Tiktok),
            "snapchat" => Ok(Platform::Snapchat),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}
