//! Session configuration: addressing widths, protocol timers and window
//! sizes, with the ranges the companion standard sets for them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::SystemParams;
use crate::error::{IecError, IecResult};

/// IANA assigned port for plain IEC 60870-5-104.
pub const PORT: u16 = 2404;

/// IANA assigned port for the TLS-secured variant.
pub const PORT_SECURE: u16 = 19_998;

/// Interval between retries of a transiently failed socket operation.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// IEC 60870-5-104 session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iec104Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Addressing widths of the peering
    pub params: SystemParams,
    /// t0: connection establishment timeout
    pub connect_timeout: Duration,
    /// t1: acknowledge timeout for sent I-frames and U-frame requests
    pub send_timeout: Duration,
    /// t2: acknowledge emission latency after receiving an I-frame;
    /// should stay below t1
    pub recv_ack_delay: Duration,
    /// t3: idle interval before a TESTFR keep-alive
    pub idle_timeout: Duration,
    /// k: maximum unacknowledged sent I-frames
    pub k: u16,
    /// w: acknowledge at the latest after this many received I-frames;
    /// should not exceed two thirds of k
    pub w: u16,
}

impl Default for Iec104Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: PORT,
            params: SystemParams::wide(),
            connect_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(15),
            recv_ack_delay: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(20),
            k: 12,
            w: 8,
        }
    }
}

impl Iec104Config {
    /// Enforce the standard's parameter ranges. Violations of the SHOULD
    /// recommendations only log a warning.
    pub fn validate(&self) -> IecResult<()> {
        if self.host.is_empty() {
            return Err(IecError::InvalidParam("host must not be empty"));
        }
        if self.port == 0 {
            return Err(IecError::InvalidParam("port must not be zero"));
        }
        let t1 = self.send_timeout.as_secs();
        if !(1..=255).contains(&t1) {
            return Err(IecError::InvalidParam("t1 not in 1..=255 seconds"));
        }
        let t2 = self.recv_ack_delay.as_secs();
        if !(1..=255).contains(&t2) {
            return Err(IecError::InvalidParam("t2 not in 1..=255 seconds"));
        }
        let t3 = self.idle_timeout.as_secs();
        if !(1..=48 * 3600).contains(&t3) {
            return Err(IecError::InvalidParam("t3 not in 1 second..=48 hours"));
        }
        if !(1..=32767).contains(&self.k) {
            return Err(IecError::InvalidParam("k not in 1..=32767"));
        }
        if !(1..=32767).contains(&self.w) {
            return Err(IecError::InvalidParam("w not in 1..=32767"));
        }
        if self.recv_ack_delay >= self.send_timeout {
            warn!(
                t1 = t1,
                t2 = t2,
                "t2 should stay below t1; late acknowledgements will look lost"
            );
        }
        if u32::from(self.w) * 3 > u32::from(self.k) * 2 {
            warn!(k = self.k, w = self.w, "w should not exceed two thirds of k");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Iec104Config::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_timers_rejected() {
        let mut cfg = Iec104Config::default();
        cfg.send_timeout = Duration::from_secs(0);
        assert!(cfg.validate().is_err());

        let mut cfg = Iec104Config::default();
        cfg.idle_timeout = Duration::from_secs(49 * 3600);
        assert!(cfg.validate().is_err());

        let mut cfg = Iec104Config::default();
        cfg.k = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Iec104Config::default();
        cfg.w = 40_000;
        assert!(cfg.validate().is_err());
    }
}
