//! Launch monitor session logic.
//!
//! Wraps a [`Device`] with the service exchanges run after connecting and
//! tracks the device state reported by status responses and alerts.

use crate::config::{Config, MonitorConfig};
use crate::device::{Device, DeviceDriver};
use crate::error::DeviceError;
use crate::events::{DeviceEvent, EventBus};
use crate::log::ComponentLog;
use crate::service::{
    Alert, DeviceState, ServiceCodec, ServiceRequest, ServiceResponse, Severity, ShotConditions,
    Tilt, WakeStatus,
};
use crate::transport::Transport;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// A connected launch monitor.
pub struct LaunchMonitor<T: Transport, C: ServiceCodec> {
    device: Device<T>,
    codec: C,
    state: AtomicU8,
    tilt: Mutex<Option<Tilt>>,
    config: MonitorConfig,
    log: ComponentLog,
}

impl<T: Transport, C: ServiceCodec> LaunchMonitor<T, C> {
    /// Creates the monitor and starts its workers. Call
    /// [`DeviceDriver::setup`] to run the connection sequence.
    pub fn new(transport: Arc<T>, codec: C, config: &Config) -> Arc<Self> {
        let monitor = Arc::new(Self {
            device: Device::new(transport, config),
            codec,
            state: AtomicU8::new(DeviceState::Unknown.as_u8()),
            tilt: Mutex::new(None),
            config: config.monitor.clone(),
            log: ComponentLog::new("monitor"),
        });
        monitor.device.start(Arc::downgrade(&monitor));
        monitor
    }

    /// Creates the monitor and runs the full setup sequence. The link is
    /// torn down if setup fails.
    pub async fn connect(transport: Arc<T>, codec: C, config: &Config) -> Result<Arc<Self>, DeviceError> {
        let monitor = Self::new(transport, codec, config);
        if let Err(e) = monitor.setup().await {
            monitor.shutdown().await;
            return Err(e);
        }
        Ok(monitor)
    }

    pub fn device(&self) -> &Device<T> {
        &self.device
    }

    pub fn events(&self) -> &EventBus {
        self.device.events()
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns true while the device waits for a shot.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Returns the last tilt read from the device.
    pub fn tilt(&self) -> Option<Tilt> {
        *self.tilt.lock()
    }

    fn set_state(&self, state: DeviceState) {
        let previous = DeviceState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst));
        if previous == state {
            return;
        }

        self.log.info(format_args!("state {} -> {}", previous, state));
        self.events().publish(DeviceEvent::StateChanged { state });
        if previous.is_ready() != state.is_ready() {
            self.events().publish(DeviceEvent::ReadinessChanged {
                ready: state.is_ready(),
            });
        }
    }

    /// Runs one service exchange. `Ok(None)` means the request timed out.
    async fn call(&self, request: ServiceRequest) -> Result<Option<ServiceResponse>, DeviceError> {
        let payload = self.codec.encode_request(&request)?;
        self.log.outgoing(format_args!("{} request", request.name()));

        match self.device.send_protobuf_request(&payload).await? {
            Some(response) => {
                let response = self.codec.decode_response(&request, &response)?;
                self.log.incoming(format_args!("{} response: {:?}", request.name(), response));
                Ok(Some(response))
            }
            None => {
                self.log.error(format_args!("{} request timed out", request.name()));
                Ok(None)
            }
        }
    }

    pub async fn wake_up(&self) -> Result<Option<WakeStatus>, DeviceError> {
        match self.call(ServiceRequest::WakeUp).await? {
            Some(ServiceResponse::WakeUp(status)) => Ok(Some(status)),
            Some(other) => Err(mismatch(&ServiceRequest::WakeUp, other)),
            None => Ok(None),
        }
    }

    /// Asks for the device state. Returns `None` if the response carries no
    /// state or never arrives.
    pub async fn status(&self) -> Result<Option<DeviceState>, DeviceError> {
        match self.call(ServiceRequest::Status).await? {
            Some(ServiceResponse::Status(state)) => Ok(state),
            Some(other) => Err(mismatch(&ServiceRequest::Status, other)),
            None => Ok(None),
        }
    }

    /// Reads the device tilt and publishes it.
    pub async fn fetch_tilt(&self) -> Result<Option<Tilt>, DeviceError> {
        let tilt = match self.call(ServiceRequest::Tilt).await? {
            Some(ServiceResponse::Tilt(tilt)) => tilt,
            Some(other) => return Err(mismatch(&ServiceRequest::Tilt, other)),
            None => return Ok(None),
        };

        *self.tilt.lock() = Some(tilt);
        self.events().publish(DeviceEvent::TiltUpdated { tilt });
        Ok(Some(tilt))
    }

    pub async fn subscribe_alerts(&self) -> Result<Option<bool>, DeviceError> {
        match self.call(ServiceRequest::SubscribeAlerts).await? {
            Some(ServiceResponse::SubscribeAlerts { accepted }) => Ok(Some(accepted)),
            Some(other) => Err(mismatch(&ServiceRequest::SubscribeAlerts, other)),
            None => Ok(None),
        }
    }

    pub async fn start_tilt_calibration(&self) -> Result<Option<bool>, DeviceError> {
        match self.call(ServiceRequest::StartTiltCalibration).await? {
            Some(ServiceResponse::StartTiltCalibration { accepted }) => Ok(Some(accepted)),
            Some(other) => Err(mismatch(&ServiceRequest::StartTiltCalibration, other)),
            None => Ok(None),
        }
    }

    pub async fn reset_tilt_calibration(&self, should_reset: bool) -> Result<Option<bool>, DeviceError> {
        let request = ServiceRequest::ResetTiltCalibration { should_reset };
        match self.call(request.clone()).await? {
            Some(ServiceResponse::ResetTiltCalibration { accepted }) => Ok(Some(accepted)),
            Some(other) => Err(mismatch(&request, other)),
            None => Ok(None),
        }
    }

    /// Sends the environmental conditions used for shot processing.
    pub async fn shot_config(&self, conditions: ShotConditions) -> Result<Option<bool>, DeviceError> {
        let request = ServiceRequest::ShotConfig(conditions);
        match self.call(request.clone()).await? {
            Some(ServiceResponse::ShotConfig { success }) => Ok(Some(success)),
            Some(other) => Err(mismatch(&request, other)),
            None => Ok(None),
        }
    }

    /// Applies an unsolicited alert.
    pub async fn handle_alert(&self, alert: Alert) {
        if let Some(state) = alert.state {
            self.set_state(state);
            if state == DeviceState::Standby {
                self.on_standby().await;
            }
        }

        if let Some(fault) = alert.error {
            if fault.code.is_some() {
                let message = fault.message();
                self.log.error(format_args!("device error: {}", message));
                self.events().publish(DeviceEvent::Error {
                    severity: fault.severity,
                    message,
                });
            }
        }

        if let Some(metrics) = alert.metrics {
            self.log.incoming(format_args!("shot metrics, {} bytes", metrics.len()));
            self.events().publish(DeviceEvent::ShotMetrics {
                metrics,
                received_at: Utc::now(),
            });
        }

        if alert.tilt_calibration {
            if let Err(e) = self.fetch_tilt().await {
                self.log.error(format_args!("failed to refresh tilt: {}", e));
            }
        }
    }

    async fn on_standby(&self) {
        if self.config.auto_wake {
            self.log.info("device in standby, waking");
            if let Err(e) = self.wake_up().await {
                self.log.error(format_args!("wake up failed: {}", e));
            }
        } else {
            let message = "device asleep; wake it with its button or enable auto_wake";
            self.log.error(message);
            self.events().publish(DeviceEvent::Error {
                severity: Severity::Warning,
                message: message.to_string(),
            });
        }
    }

    pub async fn shutdown(&self) {
        self.device.shutdown().await;
    }
}

fn mismatch(request: &ServiceRequest, response: ServiceResponse) -> DeviceError {
    DeviceError::Codec(format!(
        "{} request answered with {:?}",
        request.name(),
        response
    ))
}

impl<T: Transport, C: ServiceCodec> DeviceDriver for LaunchMonitor<T, C> {
    async fn setup(&self) -> Result<(), DeviceError> {
        self.device.setup().await?;

        if let Some(status) = self.wake_up().await? {
            self.log.info(format_args!("wake up: {:?}", status));
        }
        let state = self.status().await?.unwrap_or(DeviceState::Error);
        self.set_state(state);
        self.fetch_tilt().await?;

        if self.subscribe_alerts().await? != Some(true) {
            self.log.error("alert subscription not confirmed");
        }
        if self.config.calibrate_tilt_on_connect {
            self.start_tilt_calibration().await?;
        }
        if self.shot_config(self.config.shot).await? != Some(true) {
            self.log.error("shot configuration not confirmed");
        }

        let info = self.device.info();
        self.log.info(format_args!(
            "ready: {}, state {}, tilt {}, battery {}",
            self.is_ready(),
            self.state(),
            self.tilt()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string()),
            self.device
                .battery()
                .or(info.battery)
                .map(|b| format!("{}%", b))
                .unwrap_or_else(|| "?".to_string()),
        ));
        Ok(())
    }

    async fn handle_request(&self, payload: Bytes) {
        match self.codec.decode_alert(&payload) {
            Ok(Some(alert)) => self.handle_alert(alert).await,
            Ok(None) => self.log.incoming("request carries no alert"),
            Err(e) => self.log.error(format_args!("failed to decode request: {}", e)),
        }
    }
}
