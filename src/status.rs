use crate::error::{LmsError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable projection of a player's status
///
/// Built fresh from every status payload; never patched field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// Mixer volume, clamped to zero or above
    pub volume: f64,
    /// True when the volume is zero. The server reports muting as a negative
    /// volume, so a player turned all the way down also reads as muted.
    pub mute: bool,
    /// Player power state
    pub active: bool,
    /// Playback mode such as `play`, `pause` or `stop`
    pub mode: String,
}

impl PlayerStatus {
    /// Project a raw status object
    ///
    /// Fails with [`LmsError::ProtocolInvariant`] when `power` is anything but
    /// 0 or 1, or when `mixer volume` is missing or not a number.
    pub fn from_raw(data: &Map<String, Value>) -> Result<Self> {
        let active = match data.get("power") {
            Some(power) if is_exactly(power, 0.0) => false,
            Some(power) if is_exactly(power, 1.0) => true,
            Some(other) => {
                return Err(LmsError::ProtocolInvariant(format!(
                    "power must be 0 or 1, got {}",
                    other
                )))
            }
            None => {
                return Err(LmsError::ProtocolInvariant(
                    "status has no power field".to_string(),
                ))
            }
        };

        let raw_volume = data
            .get("mixer volume")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                LmsError::ProtocolInvariant("status has no numeric mixer volume".to_string())
            })?;
        let volume = raw_volume.max(0.0);

        let mode = data
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            volume,
            mute: volume == 0.0,
            active,
            mode,
        })
    }
}

fn is_exactly(value: &Value, expected: f64) -> bool {
    value.as_f64() == Some(expected)
}
