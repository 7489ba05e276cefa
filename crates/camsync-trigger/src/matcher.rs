//! Serial-port selection by USB identity.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::TriggerError;
use crate::TriggerResult;

/// A serial port and the USB identity behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device node, e.g. `/dev/ttyACM0`.
    pub path: PathBuf,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial: Option<String>,
}

/// Identity a synchroniser port must match.
///
/// Parsed from whitespace separated tokens: `VID:PID=16C0:0483`,
/// `SER=13567420` or `PORT=/dev/ttyACM0`. Every given token must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMatcher {
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial: Option<String>,
    pub port: Option<PathBuf>,
}

impl DeviceMatcher {
    /// Check one port against the matcher.
    pub fn matches(&self, port: &PortInfo) -> bool {
        if let Some(path) = &self.port {
            if &port.path != path {
                return false;
            }
        }
        if self.vid.is_some() && self.vid != port.vid {
            return false;
        }
        if self.pid.is_some() && self.pid != port.pid {
            return false;
        }
        if self.serial.is_some() && self.serial != port.serial {
            return false;
        }
        true
    }

    /// First matching port in `ports`.
    pub fn select<'a>(&self, ports: &'a [PortInfo]) -> Option<&'a PortInfo> {
        ports.iter().find(|p| self.matches(p))
    }
}

fn parse_hex(value: &str, matcher: &str) -> TriggerResult<u16> {
    u16::from_str_radix(value, 16).map_err(|_| TriggerError::InvalidMatcher(matcher.to_string()))
}

impl FromStr for DeviceMatcher {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut matcher = DeviceMatcher::default();

        for token in s.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| TriggerError::InvalidMatcher(s.to_string()))?;

            match key.to_ascii_uppercase().as_str() {
                "VID:PID" => {
                    let (vid, pid) = value
                        .split_once(':')
                        .ok_or_else(|| TriggerError::InvalidMatcher(s.to_string()))?;
                    matcher.vid = Some(parse_hex(vid, s)?);
                    matcher.pid = Some(parse_hex(pid, s)?);
                }
                "VID" => matcher.vid = Some(parse_hex(value, s)?),
                "PID" => matcher.pid = Some(parse_hex(value, s)?),
                "SER" => matcher.serial = Some(value.to_string()),
                "PORT" => matcher.port = Some(PathBuf::from(value)),
                _ => return Err(TriggerError::InvalidMatcher(s.to_string())),
            }
        }

        if matcher == DeviceMatcher::default() {
            return Err(TriggerError::InvalidMatcher(s.to_string()));
        }
        Ok(matcher)
    }
}

/// Lists serial ports from the kernel's tty class directory.
#[derive(Debug, Clone)]
pub struct SysfsPortLocator {
    class_dir: PathBuf,
    dev_dir: PathBuf,
}

impl Default for SysfsPortLocator {
    fn default() -> Self {
        Self::new("/sys/class/tty", "/dev")
    }
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl SysfsPortLocator {
    /// Locator over a custom tree.
    pub fn new(class_dir: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            class_dir: class_dir.into(),
            dev_dir: dev_dir.into(),
        }
    }

    /// Ports backed by a device, sorted by name.
    pub fn ports(&self) -> TriggerResult<Vec<PortInfo>> {
        let mut ports = Vec::new();

        for entry in fs::read_dir(&self.class_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let device = entry.path().join("device");
            if !device.exists() {
                continue;
            }

            // The USB interface's parent holds the identity attributes.
            let usb = device.join("..");
            let vid = read_attr(&usb, "idVendor").and_then(|v| u16::from_str_radix(&v, 16).ok());
            let pid = read_attr(&usb, "idProduct").and_then(|v| u16::from_str_radix(&v, 16).ok());
            let serial = read_attr(&usb, "serial");
            trace!(port = ?name, ?vid, ?pid, ?serial, "Serial port");

            ports.push(PortInfo {
                path: self.dev_dir.join(&name),
                vid,
                pid,
                serial,
            });
        }

        ports.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(ports)
    }

    /// Resolve `matcher` to a device node.
    pub fn locate(&self, matcher: &DeviceMatcher) -> TriggerResult<PathBuf> {
        if let Some(port) = &matcher.port {
            if matcher.vid.is_none() && matcher.pid.is_none() && matcher.serial.is_none() {
                return Ok(port.clone());
            }
        }

        let ports = self.ports()?;
        debug!(count = ports.len(), "Scanned serial ports");
        matcher
            .select(&ports)
            .map(|p| p.path.clone())
            .ok_or_else(|| TriggerError::NotFound(format!("{:?}", matcher)))
    }
}
