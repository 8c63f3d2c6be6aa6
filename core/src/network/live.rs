use std::io::ErrorKind;
use std::time::{Duration, Instant};
use chrono::Utc;
use pnet::datalink::{self, Channel, NetworkInterface};
use serde::{Deserialize, Serialize};

use crate::{NetsiftError, Result};
use super::capture::Frame;

/// How often a blocked read gives up so the deadline can be checked.
const READ_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub display_name: String,
    pub device_handle: String,
}

/// Whatever actually talks to the capture device. Calls block, so async
/// callers run them on a blocking thread.
pub trait LiveCaptureAdapter: Send + Sync {
    fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>>;

    /// Capture up to `max_packets` frames or until `timeout` elapses.
    /// Either every captured frame comes back or an error does.
    fn capture(&self, interface: &str, max_packets: usize, timeout: Duration) -> Result<Vec<Frame>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PnetCaptureAdapter;

impl PnetCaptureAdapter {
    pub fn new() -> Self {
        Self
    }

    fn find_interface(name: &str) -> Result<NetworkInterface> {
        datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| NetsiftError::CaptureDevice(format!("Interface {} not found", name)))
    }

    fn describe(iface: &NetworkInterface) -> String {
        let mut name = if iface.description.is_empty() {
            iface.name.clone()
        } else {
            format!("{} ({})", iface.description, iface.name)
        };
        let addrs: Vec<String> = iface.ips.iter().map(|net| net.ip().to_string()).collect();
        if !addrs.is_empty() {
            name.push_str(&format!(" [{}]", addrs.join(", ")));
        }
        name
    }
}

impl LiveCaptureAdapter for PnetCaptureAdapter {
    fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        Ok(datalink::interfaces()
            .iter()
            .map(|iface| InterfaceInfo {
                display_name: Self::describe(iface),
                device_handle: iface.name.clone(),
            })
            .collect())
    }

    fn capture(&self, interface: &str, max_packets: usize, timeout: Duration) -> Result<Vec<Frame>> {
        let iface = Self::find_interface(interface)?;
        let config = datalink::Config {
            read_timeout: Some(READ_POLL),
            ..Default::default()
        };

        let mut rx = match datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(_, rx)) => rx,
            Ok(_) => {
                return Err(NetsiftError::CaptureDevice(format!(
                    "Unhandled channel type on {}",
                    interface
                )))
            }
            Err(e) => {
                return Err(NetsiftError::CaptureDevice(format!(
                    "Failed to open {}: {}",
                    interface, e
                )))
            }
        };

        log::info!("Capturing up to {} packets on {} for {:?}", max_packets, interface, timeout);
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::new();

        while frames.len() < max_packets && Instant::now() < deadline {
            match rx.next() {
                Ok(packet) => {
                    let now = Utc::now();
                    frames.push(Frame::new(
                        now.timestamp(),
                        now.timestamp_subsec_micros(),
                        packet.len() as u32,
                        packet.to_vec(),
                    ));
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => continue,
                Err(e) => {
                    return Err(NetsiftError::CaptureDevice(format!(
                        "Error receiving packet on {}: {}",
                        interface, e
                    )))
                }
            }
        }

        if frames.is_empty() {
            return Err(NetsiftError::CaptureDevice(format!(
                "No packets captured on {} within {:?}",
                interface, timeout
            )));
        }

        log::info!("Captured {} packets on {}", frames.len(), interface);
        Ok(frames)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Replays a fixed frame list, or fails like a missing device.
    pub(crate) struct StaticAdapter {
        pub interfaces: Vec<InterfaceInfo>,
        pub frames: Vec<Frame>,
    }

    impl LiveCaptureAdapter for StaticAdapter {
        fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>> {
            Ok(self.interfaces.clone())
        }

        fn capture(&self, interface: &str, max_packets: usize, _timeout: Duration) -> Result<Vec<Frame>> {
            if !self.interfaces.iter().any(|i| i.device_handle == interface) {
                return Err(NetsiftError::CaptureDevice(format!("Interface {} not found", interface)));
            }
            if self.frames.is_empty() {
                return Err(NetsiftError::CaptureDevice("No packets captured".to_string()));
            }
            Ok(self.frames.iter().take(max_packets).cloned().collect())
        }
    }

    #[test]
    fn test_unknown_interface_is_a_device_error() {
        let err = PnetCaptureAdapter::new()
            .capture("netsift-no-such-if0", 1, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, NetsiftError::CaptureDevice(_)));
    }

    #[test]
    fn test_list_interfaces_uses_device_names_as_handles() {
        let interfaces = PnetCaptureAdapter::new().list_interfaces().unwrap();
        for info in interfaces {
            assert!(!info.device_handle.is_empty());
            assert!(info.display_name.contains(&info.device_handle));
        }
    }
}
