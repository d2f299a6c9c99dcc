//! Driver: the polymorphic adapter that speaks a vendor's management
//! protocol.
//!
//! All Driver methods are synchronous and blocking (§4.2) — they run on a
//! CommandQueue worker via `spawn_blocking`, never on the RPC or file-server
//! path. Each invocation opens, uses, and releases its own transport; a
//! Driver keeps no state across calls.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::domain::device::Device;
use crate::domain::ephemeral::EphemeralStore;
use crate::domain::errors::DriverError;

const INITIAL_SETUP_RETRIES: u32 = 10;
const EOF_BACKOFF: Duration = Duration::from_secs(10);
const SESSION_TIMEOUT: Duration = Duration::from_secs(10);
const KEYGEN_TIMEOUT: Duration = Duration::from_secs(120);

/// Bootstrap credentials and callback DN substituted into an emitted base
/// configuration (`liscain_adopt_dn`, `liscain_init_username`,
/// `liscain_init_password` from configuration, §6).
#[derive(Debug, Clone)]
pub struct BootstrapParams {
    pub adopt_dn: String,
    pub init_username: String,
    pub init_password: String,
}

/// A transport-level failure distinct from a vendor protocol error: the
/// Driver retries or folds these into a boolean rather than propagating
/// them, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The connection attempt timed out — retry immediately.
    Timeout,
    /// The remote end closed the connection early, typically because the
    /// switch is still booting — back off before retrying.
    PrematureEof,
}

/// A single open session to a switch's management protocol.
pub trait SwitchTransport: Send {
    fn write(&mut self, data: &str) -> Result<(), TransportError>;

    /// Block until `pattern` (a regex) matches the incoming stream, or
    /// `timeout` elapses.
    fn expect(&mut self, pattern: &str, timeout: Duration) -> Result<String, TransportError>;
}

/// Opens a fresh [`SwitchTransport`] session per call, matching §5's "each
/// invocation opens, uses, and releases its own transport."
pub trait SwitchTransportFactory: Send + Sync {
    fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn SwitchTransport>, TransportError>;
}

/// Raw TCP transport to a switch's telnet management port (port 23). The
/// only production [`SwitchTransportFactory`] this crate ships — other
/// vendors' Drivers would bring their own.
pub struct TcpTelnetTransportFactory;

struct TcpTelnetTransport {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl SwitchTransport for TcpTelnetTransport {
    fn write(&mut self, data: &str) -> Result<(), TransportError> {
        self.stream
            .write_all(data.as_bytes())
            .map_err(|_| TransportError::PrematureEof)
    }

    fn expect(&mut self, pattern: &str, timeout: Duration) -> Result<String, TransportError> {
        let regex = Regex::new(pattern).map_err(|_| TransportError::PrematureEof)?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 4096];

        loop {
            if let Ok(text) = std::str::from_utf8(&self.buffer) {
                if regex.is_match(text) {
                    let result = text.to_string();
                    self.buffer.clear();
                    return Ok(result);
                }
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            self.stream
                .set_read_timeout(Some(deadline.saturating_duration_since(Instant::now())))
                .map_err(|_| TransportError::PrematureEof)?;
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::PrematureEof),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(TransportError::Timeout)
                }
                Err(_) => return Err(TransportError::PrematureEof),
            }
        }
    }
}

impl SwitchTransportFactory for TcpTelnetTransportFactory {
    fn connect(&self, address: &str, timeout: Duration) -> Result<Box<dyn SwitchTransport>, TransportError> {
        let addr = format!("{address}:23");
        let stream = TcpStream::connect(&addr).map_err(|_| TransportError::Timeout)?;
        stream.set_read_timeout(Some(timeout)).map_err(|_| TransportError::Timeout)?;
        Ok(Box::new(TcpTelnetTransport {
            stream,
            buffer: Vec::new(),
        }))
    }
}

/// Polymorphic adapter dispatched to by `device_class` (§9: tagged variants,
/// not runtime re-classing).
pub trait Driver: Send + Sync {
    /// Render the bootstrap configuration for `device`. Pure function of the
    /// device's `identifier` and the static bootstrap params (§8 invariant 6)
    /// — no transport I/O.
    fn emit_base_config(&self, device: &Device, params: &BootstrapParams) -> Result<String, DriverError>;

    /// Log in with bootstrap credentials, discover mac/model/version,
    /// generate SSH key material, and write the harvested attributes back
    /// onto `device`. Returns `false` after all retries are exhausted.
    fn initial_setup(&self, device: &mut Device, params: &BootstrapParams) -> bool;

    /// Upload `configuration` as the device's startup config and reload.
    /// May hand large configs off through the ephemeral store instead of
    /// streaming them inline.
    fn configure(&self, device: &Device, configuration: &str, ephemeral_store: &Arc<EphemeralStore>) -> bool;

    /// Rename the device in-band. The caller (Task) is responsible for
    /// rolling the persisted `identifier` back on failure.
    fn change_identity(&self, device: &Device, identity: &str) -> bool;

    /// A vendor-agnostic textual neighbor dump; `"unknown"` on transport
    /// failure.
    fn neighbor_info(&self, device: &Device) -> String;
}

/// Dispatches `device_class` to a registered Driver (§9: tagged variants,
/// replacing the source's runtime re-classing of a loaded row into a
/// vendor-specific subclass).
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, device_class: impl Into<String>, driver: Arc<dyn Driver>) {
        self.drivers.insert(device_class.into(), driver);
    }

    pub fn get(&self, device_class: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(device_class).cloned()
    }
}

/// Cisco IOS driver, grounded on the original `devices/ciscoios.py` and
/// `devices/ciscoswitch.py` telnet transcripts: `PID:`, `Cisco IOS ...
/// Version`, and `EtherSVI, address is` patterns harvest model, firmware,
/// and MAC address respectively.
pub struct CiscoIosDriver {
    transport: Arc<dyn SwitchTransportFactory>,
    base_config_template: String,
}

impl CiscoIosDriver {
    pub fn new(transport: Arc<dyn SwitchTransportFactory>, base_config_template: String) -> Self {
        Self {
            transport,
            base_config_template,
        }
    }

    fn mac_regex() -> Regex {
        Regex::new(r"EtherSVI, address is ([0-9a-fA-F.]+)").unwrap()
    }

    fn pid_regex() -> Regex {
        Regex::new(r"PID:\s*(\S+)").unwrap()
    }

    fn version_regex() -> Regex {
        Regex::new(r"Cisco IOS.+Version ([^\s,]+),").unwrap()
    }

    /// One initial-setup attempt: connect, log in, harvest attributes.
    /// Returns `Err(TransportError)` on connection failure so the caller can
    /// apply the retry policy; `Ok(None)` if the session completed but no
    /// attributes could be parsed out of the transcript.
    fn try_initial_setup(
        &self,
        device: &Device,
        params: &BootstrapParams,
    ) -> Result<Option<(String, String, crate::domain::value_objects::MacAddress)>, TransportError> {
        let mut session = self.transport.connect(&device.address, SESSION_TIMEOUT)?;
        session.write(&format!("{}\r\n", params.init_username))?;
        session.write(&format!("{}\r\n", params.init_password))?;
        let version_dump = session.expect("#", SESSION_TIMEOUT)?;

        session.write("show inventory\r\n")?;
        let inventory_dump = session.expect("#", SESSION_TIMEOUT)?;

        session.write("show interface vlan1\r\n")?;
        let iface_dump = session.expect("#", SESSION_TIMEOUT)?;

        session.write("crypto key generate rsa modulus 2048\r\n")?;
        session.expect("#", KEYGEN_TIMEOUT)?;

        let pid = Self::pid_regex()
            .captures(&inventory_dump)
            .map(|c| c[1].to_string());
        let version = Self::version_regex()
            .captures(&version_dump)
            .map(|c| c[1].to_string());
        let mac = Self::mac_regex()
            .captures(&iface_dump)
            .and_then(|c| crate::domain::value_objects::MacAddress::parse(&c[1]).ok());

        match (pid, version, mac) {
            (Some(pid), Some(version), Some(mac)) => Ok(Some((pid, version, mac))),
            _ => Ok(None),
        }
    }
}

impl Driver for CiscoIosDriver {
    fn emit_base_config(&self, device: &Device, params: &BootstrapParams) -> Result<String, DriverError> {
        if self.base_config_template.is_empty() {
            return Err(DriverError::MissingTemplate("CiscoIOS".to_string()));
        }
        Ok(self
            .base_config_template
            .replace("{liscain_hostname}", &device.identifier)
            .replace("{liscain_adopt_dn}", &params.adopt_dn)
            .replace("{liscain_init_username}", &params.init_username)
            .replace("{liscain_init_password}", &params.init_password))
    }

    fn initial_setup(&self, device: &mut Device, params: &BootstrapParams) -> bool {
        for attempt in 0..INITIAL_SETUP_RETRIES {
            match self.try_initial_setup(device, params) {
                Ok(Some((pid, version, mac))) => {
                    device.device_type = pid;
                    device.version = version;
                    device.mac_address = mac;
                    return true;
                }
                Ok(None) => return false,
                Err(TransportError::Timeout) => continue,
                Err(TransportError::PrematureEof) => {
                    if attempt + 1 < INITIAL_SETUP_RETRIES {
                        std::thread::sleep(EOF_BACKOFF);
                    }
                }
            }
        }
        false
    }

    fn configure(&self, device: &Device, configuration: &str, ephemeral_store: &Arc<EphemeralStore>) -> bool {
        const INLINE_SESSION_LIMIT: usize = 4096;

        let mut session = match self.transport.connect(&device.address, SESSION_TIMEOUT) {
            Ok(s) => s,
            Err(_) => return false,
        };

        let payload = if configuration.len() > INLINE_SESSION_LIMIT {
            let token = ephemeral_store.store_blocking(configuration.to_string());
            format!("copy tftp://controller/adopt/{token} startup-config\r\n")
        } else {
            format!("copy terminal startup-config\r\n{configuration}\r\n")
        };

        if session.write(&payload).is_err() {
            return false;
        }
        if session.expect("#", SESSION_TIMEOUT).is_err() {
            return false;
        }
        if session.write("reload\r\n").is_err() {
            return false;
        }
        true
    }

    fn change_identity(&self, device: &Device, identity: &str) -> bool {
        let mut session = match self.transport.connect(&device.address, SESSION_TIMEOUT) {
            Ok(s) => s,
            Err(_) => return false,
        };
        if session.write(&format!("hostname {identity}\r\n")).is_err() {
            return false;
        }
        session.expect("#", SESSION_TIMEOUT).is_ok()
    }

    fn neighbor_info(&self, device: &Device) -> String {
        let mut session = match self.transport.connect(&device.address, SESSION_TIMEOUT) {
            Ok(s) => s,
            Err(_) => return "unknown".to_string(),
        };
        if session.write("show cdp neighbors detail\r\n").is_err() {
            return "unknown".to_string();
        }
        session
            .expect("#", SESSION_TIMEOUT)
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::DeviceId;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<String, TransportError>>>,
    }

    impl SwitchTransport for ScriptedTransport {
        fn write(&mut self, _data: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn expect(&mut self, _pattern: &str, _timeout: Duration) -> Result<String, TransportError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(String::new()))
        }
    }

    struct ScriptedFactory {
        connect_err: Option<TransportError>,
        script: Vec<Result<String, TransportError>>,
    }

    impl SwitchTransportFactory for ScriptedFactory {
        fn connect(
            &self,
            _address: &str,
            _timeout: Duration,
        ) -> Result<Box<dyn SwitchTransport>, TransportError> {
            if let Some(err) = self.connect_err {
                return Err(err);
            }
            Ok(Box::new(ScriptedTransport {
                responses: Mutex::new(self.script.clone().into()),
            }))
        }
    }

    fn device() -> Device {
        Device::new(
            DeviceId(1),
            "lc-01".to_string(),
            "10.0.0.1".to_string(),
            "CiscoIOS".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn emit_base_config_substitutes_placeholders() {
        let driver = CiscoIosDriver::new(
            Arc::new(ScriptedFactory {
                connect_err: None,
                script: vec![],
            }),
            "hostname {liscain_hostname}\ndn {liscain_adopt_dn}\nuser {liscain_init_username}\npass {liscain_init_password}\n"
                .to_string(),
        );
        let params = BootstrapParams {
            adopt_dn: "ztp.example.com".to_string(),
            init_username: "admin".to_string(),
            init_password: "secret".to_string(),
        };
        let rendered = driver.emit_base_config(&device(), &params).unwrap();
        assert!(rendered.contains("hostname lc-01"));
        assert!(rendered.contains("dn ztp.example.com"));
        assert!(rendered.contains("user admin"));
        assert!(rendered.contains("pass secret"));
    }

    #[test]
    fn emit_base_config_missing_template_is_an_error() {
        let driver = CiscoIosDriver::new(
            Arc::new(ScriptedFactory {
                connect_err: None,
                script: vec![],
            }),
            String::new(),
        );
        let params = BootstrapParams {
            adopt_dn: "x".to_string(),
            init_username: "x".to_string(),
            init_password: "x".to_string(),
        };
        assert!(matches!(
            driver.emit_base_config(&device(), &params),
            Err(DriverError::MissingTemplate(_))
        ));
    }

    #[test]
    fn initial_setup_harvests_mac_pid_and_version() {
        let driver = CiscoIosDriver::new(
            Arc::new(ScriptedFactory {
                connect_err: None,
                script: vec![
                    Ok("Cisco IOS Software, Version 15.2(4)E5, RELEASE SOFTWARE".to_string()),
                    Ok("PID: WS-C2960X-24PS-L".to_string()),
                    Ok("EtherSVI, address is 04fe.7f07.9040 (bia 04fe.7f07.9040)".to_string()),
                    Ok(String::new()),
                ],
            }),
            String::new(),
        );
        let mut dev = device();
        let params = BootstrapParams {
            adopt_dn: "x".to_string(),
            init_username: "admin".to_string(),
            init_password: "secret".to_string(),
        };
        assert!(driver.initial_setup(&mut dev, &params));
        assert_eq!(dev.device_type, "WS-C2960X-24PS-L");
        assert_eq!(dev.version, "15.2(4)E5");
        assert_eq!(dev.mac_address.as_str(), "04:fe:7f:07:90:40");
    }

    #[test]
    fn neighbor_info_returns_unknown_sentinel_on_transport_failure() {
        let driver = CiscoIosDriver::new(
            Arc::new(ScriptedFactory {
                connect_err: Some(TransportError::Timeout),
                script: vec![],
            }),
            String::new(),
        );
        assert_eq!(driver.neighbor_info(&device()), "unknown");
    }
}
