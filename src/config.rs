//! Configuration management

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::store::CertificateStore;
use crate::trust::{CertificatePaths, TlsVersion};
use crate::{Error, Result};

/// Environment variable prefix; nested keys are separated by `__`
/// (`MTLS_GUARD_SERVER__PORT=9443`).
pub const ENV_PREFIX: &str = "MTLS_GUARD_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Trust material locations
    pub trust: TrustConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the listener cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::Config("server.host must not be empty".to_string()));
        }
        if self.server.handshake_timeout.is_zero() {
            return Err(Error::Config(
                "server.handshake_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Upper bound on one TLS handshake
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Lowest TLS version accepted
    pub min_protocol_version: TlsVersion,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8443,
            handshake_timeout: Duration::from_secs(5),
            min_protocol_version: TlsVersion::default(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Where the certificate store lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Certificate store directory
    pub cert_dir: PathBuf,
    /// CA bundle, overriding `<cert_dir>/ca.crt`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
    /// Server certificate, overriding `<cert_dir>/server.crt`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_cert: Option<PathBuf>,
    /// Server key, overriding `<cert_dir>/server.key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_key: Option<PathBuf>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from("certs"),
            ca_cert: None,
            server_cert: None,
            server_key: None,
        }
    }
}

impl TrustConfig {
    /// The certificate store rooted at `cert_dir`.
    #[must_use]
    pub fn store(&self) -> CertificateStore {
        CertificateStore::new(&self.cert_dir)
    }

    /// Paths the loader reads, with explicit overrides applied.
    #[must_use]
    pub fn certificate_paths(&self) -> CertificatePaths {
        let defaults = self.store().paths();
        CertificatePaths {
            ca_bundle: self.ca_cert.clone().unwrap_or(defaults.ca_bundle),
            server_cert: self.server_cert.clone().unwrap_or(defaults.server_cert),
            server_key: self.server_key.clone().unwrap_or(defaults.server_key),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        // "ms" before "s": "100ms" also ends in 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            // Assume seconds
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.server.min_protocol_version, TlsVersion::Tls13);
        assert_eq!(config.trust.cert_dir, PathBuf::from("certs"));
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/mtls-guard.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn load_yaml_file() {
        // GIVEN: a YAML config
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
server:
  host: "0.0.0.0"
  port: 9443
  handshake_timeout: "500ms"
  min_protocol_version: "1.2"
trust:
  cert_dir: /etc/mtls
  server_key: /run/secrets/server.key
"#
        )
        .unwrap();
        drop(f);

        // WHEN
        let config = Config::load(Some(&path)).unwrap();

        // THEN
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.handshake_timeout, Duration::from_millis(500));
        assert_eq!(config.server.min_protocol_version, TlsVersion::Tls12);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(10));
        let paths = config.trust.certificate_paths();
        assert_eq!(paths.ca_bundle, PathBuf::from("/etc/mtls/ca.crt"));
        assert_eq!(paths.server_key, PathBuf::from("/run/secrets/server.key"));
    }

    #[test]
    fn zero_handshake_timeout_is_rejected() {
        let mut config = Config::default();
        config.server.handshake_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn humantime_parses_units() {
        assert_eq!(humantime_serde::parse("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(humantime_serde::parse("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(humantime_serde::parse("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(humantime_serde::parse("7").unwrap(), Duration::from_secs(7));
        assert!(humantime_serde::parse("soon").is_err());
    }

    #[test]
    fn humantime_round_trips_sub_second() {
        let config = ServerConfig {
            handshake_timeout: Duration::from_millis(250),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("250ms"), "{yaml}");
        let back: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.handshake_timeout, Duration::from_millis(250));
    }
}
