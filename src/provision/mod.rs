//! Certificate provisioning.
//!
//! The server core never issues certificates; it only consumes PEM files.
//! Issuance sits behind [`ProvisioningService`] so the `certs` CLI commands
//! and the test suites can produce trust material without any external
//! toolkit.  [`LocalCa`] is the `rcgen`-backed implementation.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Duration, Utc};

use crate::{Error, Result};

mod bootstrap;
mod local_ca;

pub use bootstrap::{BootstrapReport, DEFAULT_CLIENTS, bootstrap, issue_client};
pub use local_ca::LocalCa;

/// Default CA lifetime: ten years.
pub const CA_VALIDITY_DAYS: i64 = 3650;

/// Default leaf (server / client) lifetime: one year.
pub const LEAF_VALIDITY_DAYS: i64 = 365;

/// Backdating applied to `not_before` so a freshly issued certificate is
/// already valid for peers whose clock runs slightly behind.
const NOT_BEFORE_SKEW_MINUTES: i64 = 5;

/// Issues certificate/key pairs.
pub trait ProvisioningService {
    /// Issue a certificate for `subject`, returning PEM cert and key.
    fn issue_certificate(&self, subject: &SubjectParams) -> Result<IssuedCertificate>;
}

/// A PEM certificate and its PEM private key.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// What a certificate will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateUsage {
    /// Certificate authority (may sign other certificates).
    Ca,
    /// TLS server.
    Server,
    /// TLS client.
    Client,
}

/// Subject and validity of a certificate to issue.
#[derive(Debug, Clone)]
pub struct SubjectParams {
    /// Common Name (CN).
    pub common_name: String,
    /// Organization (O).
    pub organization: Option<String>,
    /// Organizational Unit (OU).
    pub organizational_unit: Option<String>,
    /// Locality (L).
    pub locality: Option<String>,
    /// State or province (ST).
    pub state: Option<String>,
    /// Country (C).
    pub country: Option<String>,
    /// Email address (emailAddress).
    pub email: Option<String>,
    /// Intended use.
    pub usage: CertificateUsage,
    /// DNS Subject Alternative Names.
    pub san_dns: Vec<String>,
    /// IP Subject Alternative Names.
    pub san_ips: Vec<IpAddr>,
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
}

impl SubjectParams {
    fn new(common_name: &str, usage: CertificateUsage, days: i64) -> Self {
        let now = Utc::now();
        Self {
            common_name: common_name.to_owned(),
            organization: None,
            organizational_unit: None,
            locality: None,
            state: None,
            country: None,
            email: None,
            usage,
            san_dns: Vec::new(),
            san_ips: Vec::new(),
            not_before: now - Duration::minutes(NOT_BEFORE_SKEW_MINUTES),
            not_after: now + Duration::days(days),
        }
    }

    /// A CA subject valid for [`CA_VALIDITY_DAYS`].
    #[must_use]
    pub fn ca(common_name: &str) -> Self {
        Self::new(common_name, CertificateUsage::Ca, CA_VALIDITY_DAYS)
    }

    /// A server subject valid for [`LEAF_VALIDITY_DAYS`], reachable as
    /// `localhost`, `127.0.0.1` and `::1` in addition to `common_name`.
    #[must_use]
    pub fn server(common_name: &str) -> Self {
        let mut params = Self::new(common_name, CertificateUsage::Server, LEAF_VALIDITY_DAYS);
        params.san_dns.push("localhost".to_owned());
        if common_name != "localhost" {
            params.san_dns.push(common_name.to_owned());
        }
        params.san_ips = vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
        params
    }

    /// A client subject valid for [`LEAF_VALIDITY_DAYS`].
    #[must_use]
    pub fn client(common_name: &str) -> Self {
        Self::new(common_name, CertificateUsage::Client, LEAF_VALIDITY_DAYS)
    }

    /// Valid from a few minutes ago until `days` from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provisioning`] if `days` is not positive or the end
    /// of validity is past the representable date range.
    pub fn valid_for_days(self, days: i64) -> Result<Self> {
        if days < 1 {
            return Err(Error::Provisioning(format!(
                "Validity must be at least one day, got {days}"
            )));
        }
        let now = Utc::now();
        let not_after = Duration::try_days(days)
            .and_then(|span| now.checked_add_signed(span))
            .ok_or_else(|| {
                Error::Provisioning(format!("Validity of {days} days is out of range"))
            })?;
        Ok(self.valid_between(now - Duration::minutes(NOT_BEFORE_SKEW_MINUTES), not_after))
    }

    /// Explicit validity window.
    #[must_use]
    pub fn valid_between(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Set the Organization (O).
    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Set the Organizational Unit (OU).
    #[must_use]
    pub fn with_organizational_unit(mut self, unit: impl Into<String>) -> Self {
        self.organizational_unit = Some(unit.into());
        self
    }

    /// Set the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}
