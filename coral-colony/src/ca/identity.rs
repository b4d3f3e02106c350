//! The colony's CA hierarchy.
//!
//! Initialized once and persisted under `ca/` in the colony directory
//! (0700, keys 0600):
//!
//! - self-signed root, ~10-year validity
//! - server and agent intermediates signed by the root, ~2-year validity
//! - a policy-signing leaf signed by the root
//!
//! On reload, signing handles are reconstructed from the persisted PEMs;
//! the on-disk certificate bytes stay authoritative for chain assembly.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};

const ROOT_VALIDITY_DAYS: i64 = 3650;
const INTERMEDIATE_VALIDITY_DAYS: i64 = 730;
const POLICY_VALIDITY_DAYS: i64 = 730;

/// A CA certificate with its signing handle.
pub(crate) struct SigningAuthority {
    /// The persisted certificate, authoritative for chains.
    pub cert_pem: String,
    /// Signing handle; subject and key match `cert_pem`.
    pub signer: Certificate,
    pub key: KeyPair,
}

/// The colony's cryptographic identity. Created at initialization,
/// immutable afterwards except by explicit rotation.
pub struct ColonyIdentity {
    colony_id: String,
    pub(crate) root: SigningAuthority,
    pub(crate) server_intermediate: SigningAuthority,
    pub(crate) agent_intermediate: SigningAuthority,
    policy_cert_pem: String,
    policy_key: KeyPair,
}

impl std::fmt::Debug for ColonyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColonyIdentity")
            .field("colony_id", &self.colony_id)
            .finish_non_exhaustive()
    }
}

struct MaterialPaths {
    root_cert: PathBuf,
    root_key: PathBuf,
    server_cert: PathBuf,
    server_key: PathBuf,
    agent_cert: PathBuf,
    agent_key: PathBuf,
    policy_cert: PathBuf,
    policy_key: PathBuf,
}

impl MaterialPaths {
    fn new(ca_dir: &Path) -> Self {
        Self {
            root_cert: ca_dir.join("root.cert.pem"),
            root_key: ca_dir.join("root.key.pem"),
            server_cert: ca_dir.join("server-intermediate.cert.pem"),
            server_key: ca_dir.join("server-intermediate.key.pem"),
            agent_cert: ca_dir.join("agent-intermediate.cert.pem"),
            agent_key: ca_dir.join("agent-intermediate.key.pem"),
            policy_cert: ca_dir.join("policy-signing.cert.pem"),
            policy_key: ca_dir.join("policy-signing.key.pem"),
        }
    }

    fn all_exist(&self) -> bool {
        [
            &self.root_cert,
            &self.root_key,
            &self.server_cert,
            &self.server_key,
            &self.agent_cert,
            &self.agent_key,
            &self.policy_cert,
            &self.policy_key,
        ]
        .iter()
        .all(|p| p.exists())
    }
}

impl ColonyIdentity {
    /// Initialize the hierarchy under `ca_dir`, or load it if it already
    /// exists. Partial material is an error, never silently regenerated.
    pub fn init_or_load(ca_dir: &Path, colony_id: &str) -> anyhow::Result<Self> {
        let paths = MaterialPaths::new(ca_dir);

        if paths.all_exist() {
            return Self::load(&paths, colony_id);
        }

        if ca_dir.exists() && paths.root_cert.exists() != paths.root_key.exists() {
            anyhow::bail!(
                "partial CA material in {}; refusing to regenerate",
                ca_dir.display()
            );
        }

        std::fs::create_dir_all(ca_dir)?;
        #[cfg(unix)]
        {
            std::fs::set_permissions(ca_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Self::generate(&paths, colony_id)
    }

    fn generate(paths: &MaterialPaths, colony_id: &str) -> anyhow::Result<Self> {
        let now = OffsetDateTime::now_utc();

        // Root
        let root_key = KeyPair::generate()?;
        let mut root_params = CertificateParams::default();
        root_params.distinguished_name = ca_dn(&format!("Coral Root CA {colony_id}"));
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        root_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        root_params.not_before = now;
        root_params.not_after = now + Duration::days(ROOT_VALIDITY_DAYS);
        let root_cert = root_params.self_signed(&root_key)?;
        let root_pem = root_cert.pem();

        let server_intermediate = Self::generate_intermediate(
            &format!("Coral Server CA {colony_id}"),
            now,
            &root_cert,
            &root_key,
        )?;
        let agent_intermediate = Self::generate_intermediate(
            &format!("Coral Agent CA {colony_id}"),
            now,
            &root_cert,
            &root_key,
        )?;

        // Policy-signing leaf, signed by the root.
        let policy_key = KeyPair::generate()?;
        let mut policy_params = CertificateParams::default();
        policy_params.distinguished_name = ca_dn(&format!("Coral Policy Signing {colony_id}"));
        policy_params.is_ca = IsCa::NoCa;
        policy_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        policy_params.not_before = now;
        policy_params.not_after = now + Duration::days(POLICY_VALIDITY_DAYS);
        let policy_cert = policy_params.signed_by(&policy_key, &root_cert, &root_key)?;
        let policy_pem = policy_cert.pem();

        write_cert(&paths.root_cert, &root_pem)?;
        write_key(&paths.root_key, &root_key.serialize_pem())?;
        write_cert(&paths.server_cert, &server_intermediate.0)?;
        write_key(&paths.server_key, &server_intermediate.2.serialize_pem())?;
        write_cert(&paths.agent_cert, &agent_intermediate.0)?;
        write_key(&paths.agent_key, &agent_intermediate.2.serialize_pem())?;
        write_cert(&paths.policy_cert, &policy_pem)?;
        write_key(&paths.policy_key, &policy_key.serialize_pem())?;

        tracing::info!(colony_id, "generated colony CA hierarchy");

        Ok(Self {
            colony_id: colony_id.to_string(),
            root: SigningAuthority {
                cert_pem: root_pem,
                signer: root_cert,
                key: root_key,
            },
            server_intermediate: SigningAuthority {
                cert_pem: server_intermediate.0,
                signer: server_intermediate.1,
                key: server_intermediate.2,
            },
            agent_intermediate: SigningAuthority {
                cert_pem: agent_intermediate.0,
                signer: agent_intermediate.1,
                key: agent_intermediate.2,
            },
            policy_cert_pem: policy_pem,
            policy_key,
        })
    }

    fn generate_intermediate(
        common_name: &str,
        now: OffsetDateTime,
        root_cert: &Certificate,
        root_key: &KeyPair,
    ) -> anyhow::Result<(String, Certificate, KeyPair)> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::default();
        params.distinguished_name = ca_dn(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.not_before = now;
        params.not_after = now + Duration::days(INTERMEDIATE_VALIDITY_DAYS);
        let cert = params.signed_by(&key, root_cert, root_key)?;
        let pem = cert.pem();
        Ok((pem, cert, key))
    }

    fn load(paths: &MaterialPaths, colony_id: &str) -> anyhow::Result<Self> {
        let root = load_authority(&paths.root_cert, &paths.root_key)?;
        let server_intermediate = load_authority(&paths.server_cert, &paths.server_key)?;
        let agent_intermediate = load_authority(&paths.agent_cert, &paths.agent_key)?;
        let policy_cert_pem = std::fs::read_to_string(&paths.policy_cert)?;
        let policy_key = KeyPair::from_pem(&std::fs::read_to_string(&paths.policy_key)?)?;

        tracing::debug!(colony_id, "loaded colony CA hierarchy from disk");

        Ok(Self {
            colony_id: colony_id.to_string(),
            root,
            server_intermediate,
            agent_intermediate,
            policy_cert_pem,
            policy_key,
        })
    }

    /// The colony id this identity was created for.
    pub fn colony_id(&self) -> &str {
        &self.colony_id
    }

    /// PEM of the root certificate.
    pub fn root_cert_pem(&self) -> &str {
        &self.root.cert_pem
    }

    /// PEM of the agent intermediate, the trust anchor for mesh clients.
    pub fn agent_intermediate_pem(&self) -> &str {
        &self.agent_intermediate.cert_pem
    }

    /// PEM of the policy-signing leaf.
    pub fn policy_cert_pem(&self) -> &str {
        &self.policy_cert_pem
    }

    /// Sign an in-colony policy artifact with the policy leaf.
    pub fn policy_key(&self) -> &KeyPair {
        &self.policy_key
    }

    /// The key wrapping PSK values at rest, derived from the root CA
    /// private key. Never persisted on its own.
    pub fn psk_wrapping_key(&self) -> [u8; 32] {
        coral_common::crypto::derive_key(
            "coral colony psk wrap v1",
            self.root.key.serialize_pem().as_bytes(),
        )
    }
}

fn ca_dn(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Coral");
    dn
}

fn load_authority(cert_path: &Path, key_path: &Path) -> anyhow::Result<SigningAuthority> {
    let cert_pem = std::fs::read_to_string(cert_path)?;
    let key = KeyPair::from_pem(&std::fs::read_to_string(key_path)?)?;

    // Rebuild a signing handle with the persisted subject and key. Leaves
    // signed with it chain to the on-disk certificate, which keeps serving
    // the authoritative bytes.
    let params = CertificateParams::from_ca_cert_pem(&cert_pem)?;
    let signer = params.self_signed(&key)?;

    Ok(SigningAuthority {
        cert_pem,
        signer,
        key,
    })
}

fn write_cert(path: &Path, pem: &str) -> anyhow::Result<()> {
    std::fs::write(path, pem)?;
    Ok(())
}

fn write_key(path: &Path, pem: &str) -> anyhow::Result<()> {
    std::fs::write(path, pem)?;
    #[cfg(unix)]
    {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_writes_all_material_with_restrictive_modes() {
        let dir = TempDir::new().unwrap();
        let ca_dir = dir.path().join("ca");

        let identity = ColonyIdentity::init_or_load(&ca_dir, "my-shop-prod-a3f2").unwrap();
        assert_eq!(identity.colony_id(), "my-shop-prod-a3f2");

        for name in [
            "root.cert.pem",
            "root.key.pem",
            "server-intermediate.cert.pem",
            "server-intermediate.key.pem",
            "agent-intermediate.cert.pem",
            "agent-intermediate.key.pem",
            "policy-signing.cert.pem",
            "policy-signing.key.pem",
        ] {
            assert!(ca_dir.join(name).exists(), "{name} missing");
        }

        #[cfg(unix)]
        {
            let dir_mode = std::fs::metadata(&ca_dir).unwrap().permissions().mode();
            assert_eq!(dir_mode & 0o777, 0o700);
            let key_mode = std::fs::metadata(ca_dir.join("root.key.pem"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(key_mode & 0o777, 0o600);
        }
    }

    #[test]
    fn reload_preserves_certificates_and_wrapping_key() {
        let dir = TempDir::new().unwrap();
        let ca_dir = dir.path().join("ca");

        let first = ColonyIdentity::init_or_load(&ca_dir, "test-colony").unwrap();
        let root_pem = first.root_cert_pem().to_string();
        let wrap = first.psk_wrapping_key();
        drop(first);

        let second = ColonyIdentity::init_or_load(&ca_dir, "test-colony").unwrap();
        assert_eq!(second.root_cert_pem(), root_pem);
        assert_eq!(second.psk_wrapping_key(), wrap);
    }

    #[test]
    fn intermediates_chain_to_root() {
        use x509_parser::certificate::X509Certificate;
        use x509_parser::prelude::FromDer;

        let dir = TempDir::new().unwrap();
        let identity = ColonyIdentity::init_or_load(&dir.path().join("ca"), "test").unwrap();

        let root_der = pem_to_der(identity.root_cert_pem());
        let agent_der = pem_to_der(identity.agent_intermediate_pem());

        let (_, root) = X509Certificate::from_der(&root_der).unwrap();
        let (_, agent) = X509Certificate::from_der(&agent_der).unwrap();

        assert_eq!(agent.issuer(), root.subject());
        assert!(agent
            .verify_signature(Some(root.public_key()))
            .is_ok());
        assert!(agent.is_ca());
    }

    fn pem_to_der(pem: &str) -> Vec<u8> {
        let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).unwrap();
        parsed.contents
    }
}
