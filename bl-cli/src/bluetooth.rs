/*!
 * Bluetooth Device Management
 * Power, connection, status and recovery for one configured headset
 */

use clap::ValueEnum;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Device;
use crate::error::ActionError;
use crate::host::Host;
use crate::patterns::Invocation;
use crate::session::Outcome;

/// Long enough to put the headset in pairing mode
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

const BLUETOOTH_SERVICE: &str = "bluetooth";
const BLUETOOTH_DRIVER: &str = "btusb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResetMethod {
    /// Forget the device, scan for it and pair again
    Pair,
    /// Restart the bluetooth service
    Systemd,
    /// Reload the bluetooth kernel module
    Driver,
    /// Lift a soft block on the radio
    Rfkill,
}

pub struct BluetoothManager<'a, H: Host> {
    host: &'a H,
    device: &'a Device,
}

impl<'a, H: Host> BluetoothManager<'a, H> {
    pub fn new(host: &'a H, device: &'a Device) -> Self {
        Self { host, device }
    }

    /// Power on, then connect
    pub async fn go(&self) -> Result<String, ActionError> {
        self.power(true).await?;
        self.connect().await
    }

    pub async fn power(&self, on: bool) -> Result<String, ActionError> {
        let state = if on { "on" } else { "off" };
        let mut session = self.host.open_session()?;

        match session.exec(&Invocation::power(on)?).await? {
            Outcome::Success => Ok(format!("Bluetooth powered {}", state)),
            Outcome::Failure(reason) => Err(ActionError::Refused(format!(
                "Could not power {} bluetooth: {}",
                state, reason
            ))),
        }
    }

    pub async fn connect(&self) -> Result<String, ActionError> {
        info!("Connecting to {} ({})", self.device.name, self.device.address);
        let mut session = self.host.open_session()?;

        match session.exec(&Invocation::connect(&self.device.address)?).await? {
            Outcome::Success => Ok(format!("Connected to {}", self.device.name)),
            Outcome::Failure(_) => Err(ActionError::Refused(format!(
                "Could not connect to {}",
                self.device.name
            ))),
        }
    }

    pub async fn status(&self) -> Result<String, ActionError> {
        let mut session = self.host.open_session()?;

        match session.exec(&Invocation::info(&self.device.address)?).await? {
            Outcome::Success => Ok(format!("{} is connected", self.device.name)),
            Outcome::Failure(_) => Err(ActionError::Refused(format!(
                "{} is disconnected",
                self.device.name
            ))),
        }
    }

    /// Pairing reset followed by a connection attempt
    pub async fn fix(&self) -> Result<String, ActionError> {
        self.reset_pairing().await?;
        self.connect().await
    }

    pub async fn reset(&self, method: ResetMethod) -> Result<String, ActionError> {
        match method {
            ResetMethod::Pair => self.reset_pairing().await,
            ResetMethod::Systemd => self.reset_service().await,
            ResetMethod::Driver => self.reset_driver().await,
            ResetMethod::Rfkill => self.reset_rfkill().await,
        }
    }

    /// One session throughout so discovery stays on between steps.
    async fn reset_pairing(&self) -> Result<String, ActionError> {
        let device = self.device;
        let mut session = self.host.open_session()?;

        // Not being paired yet is fine
        match session.exec(&Invocation::remove(&device.address)?).await? {
            Outcome::Success => info!("Removed {}", device.address),
            Outcome::Failure(reason) => warn!("Could not remove {}: {}", device.address, reason),
        }

        println!("Searching for {}, put it in pairing mode", device.name);
        if let Outcome::Failure(reason) = session
            .exec_within(&Invocation::scan_on(device)?, SCAN_TIMEOUT)
            .await?
        {
            return Err(ActionError::Refused(format!(
                "Could not search for {}: {}",
                device.name, reason
            )));
        }

        if let Outcome::Failure(reason) = session.exec(&Invocation::pair(&device.address)?).await? {
            return Err(ActionError::Refused(format!(
                "Could not pair with {}: {}",
                device.name, reason
            )));
        }

        if let Outcome::Failure(reason) = session.exec(&Invocation::trust(&device.address)?).await? {
            warn!("Could not trust {}: {}", device.address, reason);
        }
        if let Outcome::Failure(reason) = session.exec(&Invocation::scan_off()?).await? {
            warn!("Could not stop discovery: {}", reason);
        }

        Ok(format!("Paired with {}", device.name))
    }

    async fn reset_service(&self) -> Result<String, ActionError> {
        self.host
            .run("restart bluetooth service", "systemctl", &["restart", BLUETOOTH_SERVICE])
            .await?;
        Ok("Bluetooth service restarted".to_string())
    }

    async fn reset_driver(&self) -> Result<String, ActionError> {
        self.host
            .run("stop bluetooth service", "systemctl", &["stop", BLUETOOTH_SERVICE])
            .await?;
        self.host
            .run("unload bluetooth driver", "modprobe", &["-r", BLUETOOTH_DRIVER])
            .await?;
        self.host
            .run("load bluetooth driver", "modprobe", &[BLUETOOTH_DRIVER])
            .await?;
        self.host
            .run("start bluetooth service", "systemctl", &["start", BLUETOOTH_SERVICE])
            .await?;
        Ok("Bluetooth driver reloaded".to_string())
    }

    async fn reset_rfkill(&self) -> Result<String, ActionError> {
        self.host
            .run("unblock bluetooth radio", "rfkill", &["unblock", "bluetooth"])
            .await?;
        Ok("Bluetooth radio unblocked".to_string())
    }
}
