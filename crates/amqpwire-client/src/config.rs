use std::fmt;
use std::time::Duration;

use amqpwire_frame::method::Tune;
use amqpwire_frame::{FieldTable, DEFAULT_FRAME_MAX};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Channel limit proposed by default.
pub const DEFAULT_CHANNEL_MAX: u16 = 2047;
/// Heartbeat interval proposed by default.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);
/// Locale proposed by default.
pub const DEFAULT_LOCALE: &str = "en_US";

/// SASL mechanism and response bytes sent in `start-ok`.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Credentials {
    pub mechanism: String,
    /// Opaque response; never logged.
    pub response: Vec<u8>,
}

impl Credentials {
    /// SASL `PLAIN`: `\0user\0password`.
    pub fn plain(username: &str, password: &str) -> Self {
        let mut response = Vec::with_capacity(username.len() + password.len() + 2);
        response.push(0);
        response.extend_from_slice(username.as_bytes());
        response.push(0);
        response.extend_from_slice(password.as_bytes());
        Self {
            mechanism: "PLAIN".to_string(),
            response,
        }
    }

    /// Any other mechanism, e.g. `EXTERNAL` with an empty response.
    pub fn new(mechanism: impl Into<String>, response: impl Into<Vec<u8>>) -> Self {
        Self {
            mechanism: mechanism.into(),
            response: response.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::plain("guest", "guest")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mechanism", &self.mechanism)
            .field(
                "response",
                &format_args!("<redacted:{} bytes>", self.response.len()),
            )
            .finish()
    }
}

/// Configuration for opening a connection.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectionConfig {
    pub credentials: Credentials,
    /// Virtual host to open.
    pub vhost: String,
    /// Proposed highest channel id; 0 asks for no limit.
    pub channel_max: u16,
    /// Proposed largest frame in bytes; 0 asks for no limit.
    pub frame_max: u32,
    /// Proposed heartbeat interval, whole seconds; zero disables heartbeats.
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub heartbeat: Duration,
    pub locale: String,
    /// Sent in `start-ok`. Not part of serialized configuration.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub client_properties: FieldTable,
    /// Upper bound on the whole handshake.
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub handshake_timeout: Duration,
    /// Grace period for the peer's `close-ok`.
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            vhost: "/".to_string(),
            channel_max: DEFAULT_CHANNEL_MAX,
            frame_max: DEFAULT_FRAME_MAX as u32,
            heartbeat: DEFAULT_HEARTBEAT,
            locale: DEFAULT_LOCALE.to_string(),
            client_properties: default_client_properties(),
            handshake_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    /// The `tune-ok` values this configuration proposes.
    pub(crate) fn proposed(&self) -> Tune {
        Tune {
            channel_max: self.channel_max,
            frame_max: self.frame_max,
            heartbeat: u16::try_from(self.heartbeat.as_secs()).unwrap_or(u16::MAX),
        }
    }
}

/// Client properties advertising the extensions this client handles.
pub fn default_client_properties() -> FieldTable {
    let capabilities = FieldTable::new()
        .with("publisher_confirms", true)
        .with("consumer_cancel_notify", true)
        .with("basic.nack", true)
        .with("connection.blocked", true)
        .with("exchange_exchange_bindings", true)
        .with("authentication_failure_close", true)
        .with("per_consumer_qos", true);
    FieldTable::new()
        .with("product", "amqpwire")
        .with("version", env!("CARGO_PKG_VERSION"))
        .with("platform", "Rust")
        .with("capabilities", capabilities)
}

/// Values in effect after `tune`/`tune-ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    /// Highest usable channel id; 0 means the whole 16-bit range.
    pub channel_max: u16,
    /// Largest frame in bytes; 0 means unlimited.
    pub frame_max: u32,
    /// Zero when heartbeats are disabled.
    pub heartbeat: Duration,
}

impl Tuning {
    /// Combine the client's proposal with the server's `tune`.
    pub fn negotiate(client: Tune, server: Tune) -> Self {
        Self {
            channel_max: pick(client.channel_max, server.channel_max),
            frame_max: pick(client.frame_max, server.frame_max),
            heartbeat: Duration::from_secs(u64::from(pick(client.heartbeat, server.heartbeat))),
        }
    }

    /// The highest channel id the allocator may hand out.
    pub fn max_channel_id(&self) -> u16 {
        if self.channel_max == 0 {
            u16::MAX
        } else {
            self.channel_max
        }
    }

    pub(crate) fn to_tune(self) -> Tune {
        Tune {
            channel_max: self.channel_max,
            frame_max: self.frame_max,
            heartbeat: u16::try_from(self.heartbeat.as_secs()).unwrap_or(u16::MAX),
        }
    }
}

/// The smaller of two proposals, where 0 means "no limit" and yields to the other side.
fn pick<T: Ord + Default + Copy>(client: T, server: T) -> T {
    let zero = T::default();
    if client == zero {
        server
    } else if server == zero {
        client
    } else {
        client.min(server)
    }
}

#[cfg(feature = "serde")]
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tune(channel_max: u16, frame_max: u32, heartbeat: u16) -> Tune {
        Tune {
            channel_max,
            frame_max,
            heartbeat,
        }
    }

    #[test]
    fn defaults() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.vhost, "/");
        assert_eq!(cfg.channel_max, 2047);
        assert_eq!(cfg.frame_max, 131_072);
        assert_eq!(cfg.heartbeat, Duration::from_secs(10));
        assert_eq!(cfg.locale, "en_US");
        assert_eq!(cfg.credentials.mechanism, "PLAIN");
        let caps = cfg
            .client_properties
            .get("capabilities")
            .and_then(|v| v.as_table())
            .unwrap();
        assert_eq!(caps.get("basic.nack").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(
            caps.get("consumer_cancel_notify").and_then(|v| v.as_bool()),
            Some(true)
        );
    }

    #[test]
    fn negotiation_takes_smaller_nonzero() {
        let t = Tuning::negotiate(tune(2047, 131_072, 10), tune(0, 4096, 60));
        assert_eq!(t.channel_max, 2047);
        assert_eq!(t.frame_max, 4096);
        assert_eq!(t.heartbeat, Duration::from_secs(10));

        let t = Tuning::negotiate(tune(0, 0, 0), tune(100, 0, 30));
        assert_eq!(t.channel_max, 100);
        assert_eq!(t.frame_max, 0);
        assert_eq!(t.heartbeat, Duration::from_secs(30));
    }

    #[test]
    fn unlimited_channels_span_the_id_range() {
        let t = Tuning::negotiate(tune(0, 0, 0), tune(0, 0, 0));
        assert_eq!(t.max_channel_id(), u16::MAX);
        assert_eq!(t.to_tune(), tune(0, 0, 0));
    }

    #[test]
    fn plain_response_layout() {
        let creds = Credentials::plain("user", "pa55");
        assert_eq!(creds.response, b"\0user\0pa55");
    }

    #[test]
    fn debug_output_redacts_response() {
        let cfg = ConnectionConfig {
            credentials: Credentials::plain("guest", "hunter2"),
            ..ConnectionConfig::default()
        };
        let out = format!("{cfg:?}");
        assert!(out.contains("<redacted:14 bytes>"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    #[cfg(feature = "serde")]
    fn deserializes_partial_config() {
        let cfg: ConnectionConfig =
            serde_json::from_str(r#"{"vhost":"/prod","heartbeat":30,"close_timeout":2}"#).unwrap();
        assert_eq!(cfg.vhost, "/prod");
        assert_eq!(cfg.heartbeat, Duration::from_secs(30));
        assert_eq!(cfg.close_timeout, Duration::from_secs(2));
        assert_eq!(cfg.channel_max, DEFAULT_CHANNEL_MAX);
        assert!(cfg.client_properties.contains_key("capabilities"));
    }

    #[test]
    #[cfg(feature = "serde")]
    fn serializes_durations_as_seconds() {
        let json = serde_json::to_value(ConnectionConfig::default()).unwrap();
        assert_eq!(json["heartbeat"], 10);
        assert_eq!(json["handshake_timeout"], 30);
        assert!(json.get("client_properties").is_none());
    }
}
