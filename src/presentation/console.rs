//! Console display
//!
//! Headless consumer of [`AppEvent`]s. Prints the latest orientation and
//! velocity, keeps the chart history and decides which device to connect to
//! once a scan ends.

use crate::domain::history::QuaternionHistory;
use crate::domain::models::{
    AppEvent, BluetoothCommand, ConnectionStatus, DiscoveredDevice, MessageSeverity,
    OrientationSample, VelocitySample,
};
use crate::domain::render_limiter::RenderLimiter;
use crate::domain::settings::Settings;
use std::io::{self, Write};
use tracing::{debug, info};

/// Shown for every value until the first sample arrives
pub const UNKNOWN_VALUE: &str = "---";

fn format_value(value: Option<f32>) -> String {
    value.map_or_else(|| UNKNOWN_VALUE.to_string(), |v| format!("{:+.3}", v))
}

fn format_components(components: Option<[f32; 4]>) -> String {
    ["w", "x", "y", "z"]
        .iter()
        .enumerate()
        .map(|(i, label)| format!("{}={}", label, format_value(components.map(|c| c[i]))))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct ConsoleDisplay<W: Write> {
    out: W,
    history: QuaternionHistory,
    limiter: RenderLimiter,
    orientation: Option<OrientationSample>,
    velocity: Option<VelocitySample>,
    progress: Option<String>,
    status: ConnectionStatus,

    // Device selection
    devices: Vec<DiscoveredDevice>,
    preferred_device: Option<String>,
    requested_device: Option<String>,
    auto_connect: bool,
    scan_attempts: u32,
    max_scan_attempts: u32,
}

impl<W: Write> ConsoleDisplay<W> {
    pub fn new(out: W, settings: &Settings) -> Self {
        Self {
            out,
            history: QuaternionHistory::new(settings.chart_capacity),
            limiter: RenderLimiter::new(settings.render_max_frequency_hz),
            orientation: None,
            velocity: None,
            progress: None,
            status: ConnectionStatus::Disconnected,
            devices: Vec::new(),
            preferred_device: settings.last_connected_device.clone(),
            requested_device: None,
            auto_connect: settings.auto_connect,
            scan_attempts: 0,
            max_scan_attempts: settings.max_scan_attempts,
        }
    }

    pub fn history(&self) -> &QuaternionHistory {
        &self.history
    }

    pub fn progress(&self) -> Option<&str> {
        self.progress.as_deref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// Device the display asked to connect to, if any
    pub fn connected_device(&self) -> Option<&str> {
        self.requested_device.as_deref()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Text of the value line as it is currently shown
    pub fn value_line(&self) -> String {
        format!(
            "Orientation {} | Velocity {}",
            format_components(self.orientation.map(|s| s.components())),
            format_components(self.velocity.map(|s| s.components())),
        )
    }

    pub fn render(&mut self) -> io::Result<()> {
        let line = self.value_line();
        writeln!(self.out, "{}", line)?;
        self.out.flush()
    }

    fn render_limited(&mut self) -> io::Result<()> {
        if self.limiter.can_request_render() {
            self.render()?;
        }
        Ok(())
    }

    /// Update the display. Returns a command when the display wants the
    /// Bluetooth core to act.
    pub fn handle_event(&mut self, event: AppEvent) -> io::Result<Option<BluetoothCommand>> {
        match event {
            AppEvent::Orientation(sample) => {
                self.history.push(&sample);
                self.orientation = Some(sample);
                self.render_limited()?;
            }
            AppEvent::Velocity(sample) => {
                self.velocity = Some(sample);
                self.render_limited()?;
            }
            AppEvent::Progress(message) => {
                writeln!(self.out, "... {}", message)?;
                self.progress = Some(message);
            }
            AppEvent::SensorsReady => {
                self.progress = None;
                writeln!(self.out, "Sensors ready")?;
            }
            AppEvent::Cleared => {
                self.progress = None;
                self.orientation = None;
                self.velocity = None;
                self.history.clear();
                self.render()?;
            }
            AppEvent::DeviceFound(device) => {
                writeln!(self.out, "Found {} ({})", device.display_name, device.id)?;
                self.devices.push(device);
            }
            AppEvent::ScanStatus(true) => {
                self.scan_attempts += 1;
                self.devices.clear();
                writeln!(self.out, "Scanning...")?;
            }
            AppEvent::ScanStatus(false) => return self.on_scan_finished(),
            AppEvent::ConnectionStatus(status) => {
                debug!("Connection status: {:?}", status);
                self.status = status;
                if status == ConnectionStatus::Disconnected {
                    self.requested_device = None;
                }
            }
            AppEvent::LogMessage(message) => {
                let tag = match message.severity {
                    MessageSeverity::Info => "info",
                    MessageSeverity::Success => "ok",
                    MessageSeverity::Warning => "warning",
                    MessageSeverity::Error => "error",
                };
                writeln!(self.out, "[{}] {}", tag, message.message)?;
            }
        }
        Ok(None)
    }

    fn on_scan_finished(&mut self) -> io::Result<Option<BluetoothCommand>> {
        writeln!(self.out, "Scan finished, {} device(s) found", self.devices.len())?;
        if !self.auto_connect || self.requested_device.is_some() {
            return Ok(None);
        }

        if let Some(device) = self.select_device().cloned() {
            info!("Selecting {} ({})", device.display_name, device.id);
            self.requested_device = Some(device.id.clone());
            return Ok(Some(BluetoothCommand::Connect(device.id)));
        }

        if self.scan_attempts < self.max_scan_attempts {
            return Ok(Some(BluetoothCommand::StartScan));
        }
        writeln!(
            self.out,
            "No device found after {} scan(s)",
            self.scan_attempts
        )?;
        Ok(None)
    }

    /// The last connected device when it is in range, else the first one found
    fn select_device(&self) -> Option<&DiscoveredDevice> {
        self.preferred_device
            .as_deref()
            .and_then(|id| self.devices.iter().find(|d| d.id == id))
            .or_else(|| self.devices.first())
    }
}
