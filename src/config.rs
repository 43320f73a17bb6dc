//! Engine configuration parameters
//!
//! All tunable parameters for the OTA engine and discovery layer.
//! Loaded from JSON by the host application, or persisted compactly
//! with postcard.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ota::frame::MAX_FRAME_PAYLOAD;

/// Largest image the engine accepts by default (4 MB).
pub const DEFAULT_MAX_IMAGE_SIZE: u32 = 4 * 1024 * 1024;

/// Core engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    // --- Framing ---
    /// Body bytes per data frame (link MTU must fit body + 11 bytes)
    pub frame_payload_size: u16,
    /// Largest payload `load_binary` accepts
    pub max_image_size: u32,

    // --- Timeouts ---
    /// How long an outstanding data frame may wait for its ack
    pub ack_timeout_ms: u32,
    /// How long a partition read or user-data write may wait for a reply
    pub request_timeout_ms: u32,
    /// Default attribute discovery timeout
    pub discovery_timeout_ms: u32,

    // --- User data region ---
    /// First writable address for `write_user_data`
    pub user_data_base: u32,
    /// Size of the writable user-data region
    pub user_data_size: u32,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            // Framing
            frame_payload_size: 128,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,

            // Timeouts
            ack_timeout_ms: 3_000,
            request_timeout_ms: 3_000,
            discovery_timeout_ms: 5_000,

            // User data
            user_data_base: 0x0000_F000,
            user_data_size: 0x1000,
        }
    }
}

impl OtaConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.ack_timeout_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.request_timeout_ms))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.discovery_timeout_ms))
    }

    /// True when `[address, address + len)` lies inside the user-data region.
    pub fn user_data_contains(&self, address: u32, len: usize) -> bool {
        let start = u64::from(address);
        let end = start + len as u64;
        let base = u64::from(self.user_data_base);
        start >= base && end <= base + u64::from(self.user_data_size)
    }

    /// Reject values that would stall or break a transfer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_payload_size == 0 || self.frame_payload_size as usize > MAX_FRAME_PAYLOAD {
            return Err(ConfigError::ValidationFailed("frame_payload_size"));
        }
        if self.max_image_size == 0 {
            return Err(ConfigError::ValidationFailed("max_image_size"));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("ack_timeout_ms"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("request_timeout_ms"));
        }
        if self.discovery_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("discovery_timeout_ms"));
        }
        if u64::from(self.user_data_base) + u64::from(self.user_data_size) > u64::from(u32::MAX) + 1 {
            return Err(ConfigError::ValidationFailed("user_data_size"));
        }
        Ok(())
    }

    /// Compact binary form for persistent storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing plain integers into a Vec cannot fail.
        postcard::to_allocvec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn default_config_is_sane() {
        let c = OtaConfig::default();
        assert!(c.validate().is_ok());
        assert!(c.frame_payload_size as usize <= MAX_FRAME_PAYLOAD);
        assert_eq!(c.discovery_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn serde_roundtrip() {
        let c = OtaConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: OtaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: OtaConfig = serde_json::from_str(r#"{ "frame_payload_size": 20 }"#).unwrap();
        assert_eq!(c.frame_payload_size, 20);
        assert_eq!(c.ack_timeout_ms, OtaConfig::default().ack_timeout_ms);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = OtaConfig {
            frame_payload_size: 20,
            ..OtaConfig::default()
        };
        let c2 = OtaConfig::from_bytes(&c.to_bytes()).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn corrupted_bytes_rejected() {
        assert_eq!(OtaConfig::from_bytes(&[0xFF]), Err(Error::Config(ConfigError::Corrupted)));
    }

    #[test]
    fn validation_names_the_field() {
        let c = OtaConfig {
            frame_payload_size: 0,
            ..OtaConfig::default()
        };
        assert_eq!(
            c.validate(),
            Err(ConfigError::ValidationFailed("frame_payload_size"))
        );

        let c = OtaConfig {
            ack_timeout_ms: 0,
            ..OtaConfig::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::ValidationFailed("ack_timeout_ms")));
    }

    #[test]
    fn user_data_bounds() {
        let c = OtaConfig::default();
        assert!(c.user_data_contains(0xF000, 16));
        assert!(c.user_data_contains(0xFFF0, 16));
        assert!(!c.user_data_contains(0xFFF1, 16));
        assert!(!c.user_data_contains(0xEFFF, 1));
        assert!(!c.user_data_contains(u32::MAX, 2));
    }
}
