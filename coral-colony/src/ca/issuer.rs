//! Leaf issuance and revocation.
//!
//! Agent leaves are signed by the agent intermediate and carry the
//! SPIFFE-like identity `spiffe://<colony_id>/agent/<agent_id>` in their SAN
//! set. Serials are 128-bit CSPRNG values checked for uniqueness against
//! the store; re-issuing for an agent revokes the prior active certificate
//! (`superseded`) in the same transaction.
//!
//! Error causes are prefixed `ticket:` or `csr:` so the enrollment surface
//! can report a distinguishing sub-kind without parsing human text.

use super::{
    identity::ColonyIdentity,
    ticket::{spki_thumbprint, TicketClaims, TicketVerifier},
};
use crate::error::{Error, ErrorKind, Result};
use crate::store::{
    certificates::{CertStatus, CertificateRecord},
    ColonyDb,
};
use coral_common::{crypto, timestamp::Timestamp};
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, ExtendedKeyUsagePurpose, Ia5String, IsCa,
    KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use time::{Duration, OffsetDateTime};
use x509_parser::prelude::{FromDer, X509CertificationRequest};

const LEAF_VALIDITY_DAYS: i64 = 30;
const SERVER_CERT_VALIDITY_DAYS: i64 = 90;
/// Clock-skew allowance on `not_before`.
const BACKDATE_MINUTES: i64 = 5;
const SERIAL_RETRY_LIMIT: usize = 8;

/// A freshly issued leaf with its full chain.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedChain {
    pub serial: String,
    pub leaf_pem: String,
    /// Issuing chain: intermediate, then root.
    pub chain_pems: Vec<String>,
    /// Unix seconds.
    pub expires_at: u64,
}

/// A server certificate for the public endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerCertificate {
    /// Leaf, server intermediate, root.
    pub chain_pems: Vec<String>,
    pub key_pem: String,
}

/// Issues and revokes colony certificates.
pub struct CertificateIssuer {
    identity: Arc<ColonyIdentity>,
    db: ColonyDb,
    verifier: TicketVerifier,
    /// Bumped on every revocation; the mTLS verifier reloads its revoked
    /// set when the generation moves.
    revocation_generation: Arc<AtomicU64>,
}

impl CertificateIssuer {
    pub fn new(identity: Arc<ColonyIdentity>, db: ColonyDb, verifier: TicketVerifier) -> Self {
        Self {
            identity,
            db,
            verifier,
            revocation_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current revocation generation, monotonically increasing.
    pub fn revocation_generation(&self) -> u64 {
        self.revocation_generation.load(Ordering::Acquire)
    }

    pub(crate) fn generation_handle(&self) -> Arc<AtomicU64> {
        self.revocation_generation.clone()
    }

    /// Validate a referral ticket and sign the CSR it vouches for.
    ///
    /// Validation order: ticket signature, colony binding, validity window
    /// (all inside the verifier), then the CSR public key against the
    /// ticket's `spki_thumbprint`. The bootstrap-PSK check is admission's
    /// job and happens before this is called.
    pub async fn issue_for_enrollment(
        &self,
        csr_pem: &str,
        ticket: &str,
    ) -> Result<(TicketClaims, IssuedChain)> {
        let claims = self.validate_ticket_and_csr(csr_pem, ticket).await?;
        let chain = self.sign_csr(&claims.agent_id, csr_pem).await?;
        Ok((claims, chain))
    }

    /// Re-issue for an already-admitted agent. The ticket must be bound to
    /// `agent_id`; the check runs before anything is signed or superseded.
    pub async fn reissue_for_agent(
        &self,
        agent_id: &str,
        csr_pem: &str,
        ticket: &str,
    ) -> Result<IssuedChain> {
        let claims = self.validate_ticket_and_csr(csr_pem, ticket).await?;
        if claims.agent_id != agent_id {
            return Err(Error::with_cause(
                ErrorKind::Unauthorized,
                "ticket is bound to a different agent",
            ));
        }
        self.sign_csr(agent_id, csr_pem).await
    }

    async fn validate_ticket_and_csr(
        &self,
        csr_pem: &str,
        ticket: &str,
    ) -> Result<TicketClaims> {
        let claims = self.verifier.validate(ticket).await?;

        let spki_der = csr_spki_der(csr_pem)?;
        if spki_thumbprint(&spki_der) != claims.spki_thumbprint {
            return Err(Error::with_cause(
                ErrorKind::InvalidReferral,
                "csr: public key does not match ticket thumbprint",
            ));
        }

        Ok(claims)
    }

    /// Sign a CSR for `agent_id`, superseding any prior active certificate.
    pub async fn sign_csr(&self, agent_id: &str, csr_pem: &str) -> Result<IssuedChain> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| Error::with_cause(ErrorKind::MalformedRequest, format!("csr: {e}")))?;

        let serial = self.unique_serial().await?;
        let spiffe_id = format!(
            "spiffe://{}/agent/{agent_id}",
            self.identity.colony_id()
        );

        let now = OffsetDateTime::now_utc();
        let not_before = now - Duration::minutes(BACKDATE_MINUTES);
        let not_after = now + Duration::days(LEAF_VALIDITY_DAYS);

        csr.params.serial_number = Some(SerialNumber::from_slice(
            &hex::decode(&serial).expect("serial is generated hex"),
        ));
        csr.params.is_ca = IsCa::NoCa;
        csr.params.not_before = not_before;
        csr.params.not_after = not_after;
        csr.params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        csr.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        csr.params.subject_alt_names = vec![SanType::URI(
            Ia5String::try_from(spiffe_id.clone())
                .map_err(|e| Error::internal(format!("spiffe id not ia5: {e}")))?,
        )];

        let authority = &self.identity.agent_intermediate;
        let leaf = csr
            .signed_by(&authority.signer, &authority.key)
            .map_err(|e| Error::with_cause(ErrorKind::MalformedRequest, format!("csr: {e}")))?;

        let record = CertificateRecord {
            serial: serial.clone(),
            agent_id: agent_id.to_string(),
            spiffe_id,
            issued_at: Timestamp::now(),
            not_before: Timestamp::from_secs(not_before.unix_timestamp() as u64),
            not_after: Timestamp::from_secs(not_after.unix_timestamp() as u64),
            status: CertStatus::Active,
            revoked_at: None,
            revocation_reason: None,
            revoked_by: None,
        };

        let superseded = self.db.supersede_and_insert(&record).await?;
        if !superseded.is_empty() {
            self.revocation_generation.fetch_add(1, Ordering::AcqRel);
            tracing::info!(agent_id, ?superseded, "superseded prior certificates");
        }

        Ok(IssuedChain {
            serial,
            leaf_pem: leaf.pem(),
            chain_pems: vec![
                authority.cert_pem.clone(),
                self.identity.root_cert_pem().to_string(),
            ],
            expires_at: not_after.unix_timestamp() as u64,
        })
    }

    /// Mark `serial` revoked and force the mTLS verifier to reload.
    pub async fn revoke(&self, serial: &str, reason: &str, actor: &str) -> Result<()> {
        self.db.revoke_certificate(serial, reason, actor).await?;
        self.revocation_generation.fetch_add(1, Ordering::AcqRel);
        tracing::info!(serial, reason, actor, "revoked certificate");
        Ok(())
    }

    /// Issue a server certificate for the public endpoint. SANs always
    /// include `localhost`, loopback and the colony id, so clients pinning
    /// by fingerprint can connect either way.
    pub fn server_certificate(&self, hostnames: &[String]) -> Result<ServerCertificate> {
        let mut sans: Vec<String> = vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
            self.identity.colony_id().to_string(),
        ];
        for hostname in hostnames {
            if !sans.contains(hostname) {
                sans.push(hostname.clone());
            }
        }

        let key = KeyPair::generate().map_err(|e| Error::internal(e))?;
        let mut params =
            CertificateParams::new(sans).map_err(|e| Error::internal(e))?;
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::minutes(BACKDATE_MINUTES);
        params.not_after = now + Duration::days(SERVER_CERT_VALIDITY_DAYS);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let authority = &self.identity.server_intermediate;
        let leaf = params
            .signed_by(&key, &authority.signer, &authority.key)
            .map_err(|e| Error::internal(e))?;

        Ok(ServerCertificate {
            chain_pems: vec![
                leaf.pem(),
                authority.cert_pem.clone(),
                self.identity.root_cert_pem().to_string(),
            ],
            key_pem: key.serialize_pem(),
        })
    }

    async fn unique_serial(&self) -> Result<String> {
        for _ in 0..SERIAL_RETRY_LIMIT {
            let serial = hex::encode(crypto::random_bytes::<16>());
            if !self.db.serial_exists(&serial).await? {
                return Ok(serial);
            }
        }
        // 128 bits of entropy colliding eight times means the RNG is broken.
        Err(Error::internal("serial generation exhausted retries"))
    }
}

/// The DER-encoded SubjectPublicKeyInfo of a PEM CSR.
pub(crate) fn csr_spki_der(csr_pem: &str) -> Result<Vec<u8>> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(csr_pem.as_bytes())
        .map_err(|e| Error::with_cause(ErrorKind::MalformedRequest, format!("csr: {e}")))?;
    let (_, csr) = X509CertificationRequest::from_der(&pem.contents)
        .map_err(|e| Error::with_cause(ErrorKind::MalformedRequest, format!("csr: {e}")))?;

    csr.verify_signature().map_err(|e| {
        Error::with_cause(ErrorKind::MalformedRequest, format!("csr: bad signature: {e}"))
    })?;

    Ok(csr.certification_request_info.subject_pki.raw.to_vec())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ca::ticket::test_support::TicketSigner;
    use crate::ca::PskManager;
    use tempfile::TempDir;

    /// A CA stack on a temp dir plus the ticket signer it trusts.
    pub struct TestCa {
        pub identity: Arc<ColonyIdentity>,
        pub issuer: CertificateIssuer,
        pub psk: PskManager,
        pub signer: TicketSigner,
        pub db: ColonyDb,
        _dir: TempDir,
    }

    pub async fn test_ca(colony_id: &str) -> TestCa {
        let dir = TempDir::new().unwrap();
        let identity =
            Arc::new(ColonyIdentity::init_or_load(&dir.path().join("ca"), colony_id).unwrap());
        let db = ColonyDb::test().await;
        let signer = TicketSigner::generate();
        let verifier = TicketVerifier::new(signer.provider(), colony_id);
        let issuer = CertificateIssuer::new(identity.clone(), db.clone(), verifier);
        let psk = PskManager::new(db.clone(), identity.psk_wrapping_key());
        psk.ensure_psk().await.unwrap();
        TestCa {
            identity,
            issuer,
            psk,
            signer,
            db,
            _dir: dir,
        }
    }

    /// A fresh agent key and its CSR PEM.
    pub fn agent_csr() -> (KeyPair, String) {
        let key = KeyPair::generate().unwrap();
        let params = CertificateParams::default();
        let csr = params.serialize_request(&key).unwrap();
        (key, csr.pem().unwrap())
    }
}
