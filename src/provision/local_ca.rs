//! `rcgen`-backed certificate authority.

use std::fmt;

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, string::Ia5String,
};
use time::OffsetDateTime;

use super::{CertificateUsage, IssuedCertificate, ProvisioningService, SubjectParams};
use crate::{Error, Result};

/// PKCS#9 emailAddress.
const OID_EMAIL_ADDRESS: [u64; 7] = [1, 2, 840, 113549, 1, 9, 1];

/// A CA able to sign server and client certificates.
pub struct LocalCa {
    issuer: Issuer<'static, KeyPair>,
    cert_pem: String,
    key_pem: String,
}

impl LocalCa {
    /// Generate a new self-signed CA.
    ///
    /// # Errors
    ///
    /// Returns an error if `subject` is not a CA subject, or if key
    /// generation or self-signing fails.
    pub fn create(subject: &SubjectParams) -> Result<Self> {
        if subject.usage != CertificateUsage::Ca {
            return Err(Error::Provisioning(format!(
                "'{}' is not a CA subject",
                subject.common_name
            )));
        }

        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Provisioning(format!("Failed to generate CA key: {e}")))?;
        let params = certificate_params(subject)?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Provisioning(format!("CA cert generation failed: {e}")))?;

        let cert_pem = cert.pem();
        let key_pem = key_pair.serialize_pem();
        Ok(Self {
            issuer: Issuer::new(params, key_pair),
            cert_pem,
            key_pem,
        })
    }

    /// Reconstruct a CA from its persisted PEM certificate and key.
    ///
    /// # Errors
    ///
    /// Returns an error if either PEM cannot be parsed.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| Error::Provisioning(format!("Failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(cert_pem, key_pair)
            .map_err(|e| Error::Provisioning(format!("Failed to parse CA cert: {e}")))?;

        Ok(Self {
            issuer,
            cert_pem: cert_pem.to_owned(),
            key_pem: key_pem.to_owned(),
        })
    }

    /// PEM-encoded CA certificate.
    #[must_use]
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    /// The CA certificate and key as an [`IssuedCertificate`].
    #[must_use]
    pub fn to_issued(&self) -> IssuedCertificate {
        IssuedCertificate {
            cert_pem: self.cert_pem.clone(),
            key_pem: self.key_pem.clone(),
        }
    }
}

impl ProvisioningService for LocalCa {
    fn issue_certificate(&self, subject: &SubjectParams) -> Result<IssuedCertificate> {
        if subject.usage == CertificateUsage::Ca {
            return Err(Error::Provisioning(
                "Intermediate CAs are not issued; use LocalCa::create".to_owned(),
            ));
        }

        let leaf_key = KeyPair::generate()
            .map_err(|e| Error::Provisioning(format!("Failed to generate leaf key: {e}")))?;
        let params = certificate_params(subject)?;
        let leaf_cert = params
            .signed_by(&leaf_key, &self.issuer)
            .map_err(|e| Error::Provisioning(format!("Leaf cert signing failed: {e}")))?;

        Ok(IssuedCertificate {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }
}

impl fmt::Debug for LocalCa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCa").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn certificate_params(subject: &SubjectParams) -> Result<CertificateParams> {
    if subject.not_after <= subject.not_before {
        return Err(Error::Provisioning(format!(
            "'{}': validity window ends before it starts",
            subject.common_name
        )));
    }

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(subject);
    params.not_before = to_offset(subject.not_before)?;
    params.not_after = to_offset(subject.not_after)?;

    match subject.usage {
        CertificateUsage::Ca => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
            ];
        }
        CertificateUsage::Server => {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
            params.use_authority_key_identifier_extension = true;
        }
        CertificateUsage::Client => {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
            params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
            params.use_authority_key_identifier_extension = true;
        }
    }

    let mut sans: Vec<SanType> = Vec::new();
    for dns in &subject.san_dns {
        let ia5 = Ia5String::try_from(dns.as_str())
            .map_err(|e| Error::Provisioning(format!("Invalid DNS SAN '{dns}': {e}")))?;
        sans.push(SanType::DnsName(ia5));
    }
    sans.extend(subject.san_ips.iter().copied().map(SanType::IpAddress));
    params.subject_alt_names = sans;

    Ok(params)
}

fn distinguished_name(subject: &SubjectParams) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject.common_name.as_str());
    let optional = [
        (DnType::OrganizationName, &subject.organization),
        (DnType::OrganizationalUnitName, &subject.organizational_unit),
        (DnType::LocalityName, &subject.locality),
        (DnType::StateOrProvinceName, &subject.state),
        (DnType::CountryName, &subject.country),
        (DnType::CustomDnType(OID_EMAIL_ADDRESS.to_vec()), &subject.email),
    ];
    for (ty, value) in optional {
        if let Some(value) = value {
            dn.push(ty, value.as_str());
        }
    }
    dn
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| Error::Provisioning(format!("Date calculation error: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
