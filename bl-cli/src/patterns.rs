/*!
 * Control Utility Vocabulary
 * Commands sent to bluetoothctl and the output that answers them
 */

use regex::{escape, Regex};

use crate::config::Device;

/// One request/response unit for a session
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: String,
    pub success: Regex,
    pub failure: Regex,
}

impl Invocation {
    pub fn new(command: impl Into<String>, success: &str, failure: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            command: command.into(),
            success: Regex::new(success)?,
            failure: Regex::new(failure)?,
        })
    }

    pub fn power(on: bool) -> Result<Self, regex::Error> {
        let state = if on { "on" } else { "off" };
        Self::new(
            format!("power {}", state),
            &format!("Changing power {} succeeded", state),
            &format!("Failed to set power {}|No default controller available", state),
        )
    }

    pub fn connect(address: &str) -> Result<Self, regex::Error> {
        Self::new(
            format!("connect {}", address),
            "Connection successful",
            &format!("Failed to connect|Device {} not available", escape(address)),
        )
    }

    /// Succeeds when the device reports itself connected
    pub fn info(address: &str) -> Result<Self, regex::Error> {
        Self::new(
            format!("info {}", address),
            "Connected: yes",
            &format!("Connected: no|Device {} not available", escape(address)),
        )
    }

    pub fn remove(address: &str) -> Result<Self, regex::Error> {
        Self::new(
            format!("remove {}", address),
            "Device has been removed",
            &format!("Device {} not available|Failed to remove", escape(address)),
        )
    }

    /// Waits until the device shows up as newly discovered, by address or by name
    pub fn scan_on(device: &Device) -> Result<Self, regex::Error> {
        Self::new(
            "scan on",
            &format!(
                r"(?m)NEW\S*\] Device (?:{}|\S+ {}\s*$)",
                escape(&device.address),
                escape(&device.name)
            ),
            "Failed to start discovery",
        )
    }

    pub fn scan_off() -> Result<Self, regex::Error> {
        Self::new("scan off", "Discovery stopped", "Failed to stop discovery")
    }

    pub fn pair(address: &str) -> Result<Self, regex::Error> {
        Self::new(
            format!("pair {}", address),
            "Pairing successful",
            "Failed to pair",
        )
    }

    pub fn trust(address: &str) -> Result<Self, regex::Error> {
        Self::new(
            format!("trust {}", address),
            &format!("Changing {} trust succeeded", escape(address)),
            "Failed to set trusted",
        )
    }
}
