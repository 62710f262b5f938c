//! Shared identifier and enum types used across the control plane.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Surrogate primary keys for plans and users are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Jobs and artifacts carry opaque 128-bit ids.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// The kind of generation work a job requests and a worker can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Image,
    Video,
    Text,
    Audio,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Image => "image",
            Capability::Video => "video",
            Capability::Text => "text",
            Capability::Audio => "audio",
        }
    }

    /// Every capability, in a stable order.
    pub const ALL: [Capability; 4] = [
        Capability::Image,
        Capability::Video,
        Capability::Text,
        Capability::Audio,
    ];
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Capability::Image),
            "video" => Ok(Capability::Video),
            "text" => Ok(Capability::Text),
            "audio" => Ok(Capability::Audio),
            other => Err(format!("Unknown capability: {other}")),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Platform / Frontend
// ---------------------------------------------------------------------------

/// The identity platform a user belongs to. `(platform, platform_user_id)`
/// is the unique user key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Discord,
    Web,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Discord => "discord",
            Platform::Web => "web",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Platform::Telegram),
            "discord" => Ok(Platform::Discord),
            "web" => Ok(Platform::Web),
            other => Err(format!("Unknown platform: {other}")),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job request came from. Unlike [`Platform`] this includes `api`
/// for direct programmatic submissions with a user API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frontend {
    Telegram,
    Discord,
    Web,
    Api,
}

impl Frontend {
    pub fn as_str(self) -> &'static str {
        match self {
            Frontend::Telegram => "telegram",
            Frontend::Discord => "discord",
            Frontend::Web => "web",
            Frontend::Api => "api",
        }
    }

    /// The identity platform this frontend maps to, if any. Direct API
    /// submissions authenticate with a user key and carry no platform.
    pub fn platform(self) -> Option<Platform> {
        match self {
            Frontend::Telegram => Some(Platform::Telegram),
            Frontend::Discord => Some(Platform::Discord),
            Frontend::Web => Some(Platform::Web),
            Frontend::Api => None,
        }
    }
}

impl FromStr for Frontend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Frontend::Telegram),
            "discord" => Ok(Frontend::Discord),
            "web" => Ok(Frontend::Web),
            "api" => Ok(Frontend::Api),
            other => Err(format!("Unknown frontend: {other}")),
        }
    }
}

impl fmt::Display for Frontend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_round_trips_through_str() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
    }

    #[test]
    fn unknown_capability_is_rejected() {
        assert!("music".parse::<Capability>().is_err());
    }

    #[test]
    fn frontend_api_has_no_platform() {
        assert_eq!(Frontend::Api.platform(), None);
        assert_eq!(Frontend::Telegram.platform(), Some(Platform::Telegram));
    }

    #[test]
    fn capability_serializes_lowercase() {
        let json = serde_json::to_string(&Capability::Image).unwrap();
        assert_eq!(json, "\"image\"");
    }
}
