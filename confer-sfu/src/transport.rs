//! Worker-side WebRTC transport state

use confer_broker::messages::TransportOptions;
use confer_core::{RouterId, TransportId};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
}

impl IceParameters {
    fn generate() -> Self {
        let password = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        Self {
            username_fragment: nanoid::nanoid!(16),
            password,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

impl DtlsFingerprint {
    /// Random SHA-256 style fingerprint (`AB:CD:...`)
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":");
        Self {
            algorithm: "sha-256".to_string(),
            value,
        }
    }
}

/// A transport hosted by the worker
#[derive(Debug, Clone)]
pub struct WorkerTransport {
    pub id: TransportId,
    pub router: RouterId,
    pub is_producer: bool,
    pub port: u16,
    pub ice: IceParameters,
    pub fingerprint: DtlsFingerprint,
    pub connected: bool,
}

impl WorkerTransport {
    #[must_use]
    pub fn new(id: TransportId, router: RouterId, is_producer: bool, port: u16) -> Self {
        Self {
            id,
            router,
            is_producer,
            port,
            ice: IceParameters::generate(),
            fingerprint: DtlsFingerprint::generate(),
            connected: false,
        }
    }

    /// Connection parameters handed back to the coordinator
    #[must_use]
    pub fn options(&self, announced_ip: &str) -> TransportOptions {
        TransportOptions(json!({
            "id": self.id,
            "iceParameters": self.ice,
            "iceCandidates": [{
                "ip": announced_ip,
                "port": self.port,
                "protocol": "udp",
                "type": "host",
            }],
            "dtlsParameters": {
                "role": "auto",
                "fingerprints": [self.fingerprint],
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_shape() {
        let transport = WorkerTransport::new(TransportId::new(7), RouterId::new(1), true, 40000);
        let options = transport.options("10.0.0.1").0;

        assert_eq!(options["id"], 7);
        assert_eq!(options["iceCandidates"][0]["ip"], "10.0.0.1");
        assert_eq!(options["iceCandidates"][0]["port"], 40000);
        assert_eq!(
            options["iceParameters"]["usernameFragment"].as_str().map(str::len),
            Some(16)
        );
        assert_eq!(options["iceParameters"]["password"].as_str().map(str::len), Some(32));
        assert_eq!(options["dtlsParameters"]["fingerprints"][0]["algorithm"], "sha-256");
    }

    #[test]
    fn test_credentials_differ_per_transport() {
        let a = WorkerTransport::new(TransportId::new(1), RouterId::new(1), true, 1);
        let b = WorkerTransport::new(TransportId::new(2), RouterId::new(1), true, 2);
        assert_ne!(a.ice, b.ice);
        assert_ne!(a.fingerprint, b.fingerprint);
    }
}
