//! Launch monitor service messages.
//!
//! Requests, responses and alerts travel as opaque protobuf payloads inside
//! `B313`/`B413` messages. Their field-level encoding is supplied by a
//! [`ServiceCodec`]; this module only defines the values the device logic
//! works with.

use crate::error::DeviceError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversion factor for the tee distance setting.
pub const FEET_TO_METERS: f32 = 1.0 / 3.281;

/// Launch monitor state as reported by status responses and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Unknown,
    Standby,
    Waiting,
    Armed,
    Error,
}

impl DeviceState {
    /// Returns whether the device can take a shot.
    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceState::Waiting)
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            DeviceState::Unknown => 0,
            DeviceState::Standby => 1,
            DeviceState::Waiting => 2,
            DeviceState::Armed => 3,
            DeviceState::Error => 4,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceState::Standby,
            2 => DeviceState::Waiting,
            3 => DeviceState::Armed,
            4 => DeviceState::Error,
            _ => DeviceState::Unknown,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Standby => "standby",
            DeviceState::Waiting => "waiting",
            DeviceState::Armed => "armed",
            DeviceState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Device tilt in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Tilt {
    pub roll: f32,
    pub pitch: f32,
}

impl fmt::Display for Tilt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "roll {:.1}, pitch {:.1}", self.roll, self.pitch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeStatus {
    Success,
    AlreadyAwake,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Serious,
    Fatal,
}

/// Environmental conditions sent with the shot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotConditions {
    /// Temperature in degrees Fahrenheit.
    pub temperature: f32,
    pub humidity: f32,
    /// Altitude in feet.
    pub altitude: f32,
    pub air_density: f32,
    /// Distance from the device to the tee, in feet.
    pub tee_distance_ft: f32,
}

impl Default for ShotConditions {
    fn default() -> Self {
        Self {
            temperature: 60.0,
            humidity: 1.0,
            altitude: 0.0,
            air_density: 1.0,
            tee_distance_ft: 7.0,
        }
    }
}

impl ShotConditions {
    /// Returns the tee range in meters, as the device expects it.
    pub fn tee_range(&self) -> f32 {
        self.tee_distance_ft * FEET_TO_METERS
    }
}

/// Requests issued by the launch monitor logic.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceRequest {
    WakeUp,
    Status,
    Tilt,
    SubscribeAlerts,
    StartTiltCalibration,
    ResetTiltCalibration { should_reset: bool },
    ShotConfig(ShotConditions),
}

impl ServiceRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceRequest::WakeUp => "wake_up",
            ServiceRequest::Status => "status",
            ServiceRequest::Tilt => "tilt",
            ServiceRequest::SubscribeAlerts => "subscribe_alerts",
            ServiceRequest::StartTiltCalibration => "start_tilt_calibration",
            ServiceRequest::ResetTiltCalibration { .. } => "reset_tilt_calibration",
            ServiceRequest::ShotConfig(_) => "shot_config",
        }
    }
}

/// Decoded responses, one per request kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResponse {
    WakeUp(WakeStatus),
    Status(Option<DeviceState>),
    Tilt(Tilt),
    SubscribeAlerts { accepted: bool },
    StartTiltCalibration { accepted: bool },
    ResetTiltCalibration { accepted: bool },
    ShotConfig { success: bool },
}

/// A fault reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFault {
    pub code: Option<String>,
    pub severity: Severity,
    pub detail: Option<String>,
}

impl DeviceFault {
    pub fn message(&self) -> String {
        match (&self.code, &self.detail) {
            (Some(code), Some(detail)) => format!("{} {}", code, detail),
            (Some(code), None) => code.clone(),
            (None, Some(detail)) => detail.clone(),
            (None, None) => String::new(),
        }
    }
}

/// Unsolicited alert notification. Any combination of fields may be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alert {
    pub state: Option<DeviceState>,
    pub error: Option<DeviceFault>,
    /// Opaque shot measurement payload.
    pub metrics: Option<Bytes>,
    pub tilt_calibration: bool,
}

/// Field-level encoding of service messages.
pub trait ServiceCodec: Send + Sync + 'static {
    /// Serializes a request payload.
    fn encode_request(&self, request: &ServiceRequest) -> Result<Vec<u8>, DeviceError>;

    /// Deserializes the response to `request`.
    fn decode_response(
        &self,
        request: &ServiceRequest,
        payload: &[u8],
    ) -> Result<ServiceResponse, DeviceError>;

    /// Deserializes an unsolicited request. Returns `None` for requests that
    /// carry no alert.
    fn decode_alert(&self, payload: &[u8]) -> Result<Option<Alert>, DeviceError>;
}
