//! Referral-ticket validation.
//!
//! A referral ticket is a short-lived JWT minted by the discovery service,
//! binding an agent id to a public-key thumbprint and a colony. The colony
//! verifies it against the discovery service's published JWKS. Validation
//! order is fixed: signature, colony binding, validity window; the SPKI
//! check happens in the issuer where the CSR is at hand.

use crate::error::{Error, ErrorKind, Result};
use async_trait::async_trait;
use coral_common::timestamp::Timestamp;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::{
    str::FromStr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use url::Url;

/// Claims carried by a referral ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketClaims {
    pub colony_id: String,
    pub agent_id: String,
    /// Hex blake3 of the enrolling key's SubjectPublicKeyInfo (DER).
    pub spki_thumbprint: String,
    pub nbf: u64,
    pub exp: u64,
    pub iss: String,
}

/// Hex blake3 thumbprint of an SPKI DER blob, the form tickets carry.
pub fn spki_thumbprint(spki_der: &[u8]) -> String {
    hex::encode(coral_common::crypto::hash(spki_der).as_bytes())
}

/// One usable verification key from the discovery JWKS.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: Option<String>,
    pub key: DecodingKey,
    pub algorithm: Algorithm,
}

/// Source of the discovery service's ticket-signing keys.
#[async_trait]
pub trait JwksProvider: Send + Sync {
    async fn keys(&self) -> Result<Vec<VerificationKey>>;
}

/// Fetches the JWKS over HTTPS with a short-lived cache.
pub struct HttpJwksProvider {
    url: Url,
    client: reqwest::Client,
    cache: Mutex<Option<(Vec<VerificationKey>, Instant)>>,
    cache_ttl: Duration,
}

impl HttpJwksProvider {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            cache: Mutex::new(None),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[async_trait]
impl JwksProvider for HttpJwksProvider {
    async fn keys(&self) -> Result<Vec<VerificationKey>> {
        {
            let cache = self.cache.lock().expect("jwks cache poisoned");
            if let Some((keys, fetched_at)) = cache.as_ref() {
                if fetched_at.elapsed() < self.cache_ttl {
                    return Ok(keys.clone());
                }
            }
        }

        let jwks: JwkSet = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| Error::with_cause(ErrorKind::InvalidReferral, format!("jwks fetch: {e}")))?
            .json()
            .await
            .map_err(|e| {
                Error::with_cause(ErrorKind::InvalidReferral, format!("jwks parse: {e}"))
            })?;

        let keys = convert_jwks(&jwks)?;

        let mut cache = self.cache.lock().expect("jwks cache poisoned");
        *cache = Some((keys.clone(), Instant::now()));
        Ok(keys)
    }
}

fn convert_jwks(jwks: &JwkSet) -> Result<Vec<VerificationKey>> {
    let mut keys = Vec::with_capacity(jwks.keys.len());
    for jwk in &jwks.keys {
        let key = match DecodingKey::from_jwk(jwk) {
            Ok(key) => key,
            Err(error) => {
                tracing::warn!(%error, "skipping unusable jwk");
                continue;
            }
        };
        let algorithm = jwk
            .common
            .key_algorithm
            .and_then(|a| Algorithm::from_str(&a.to_string()).ok())
            .unwrap_or(Algorithm::ES256);
        keys.push(VerificationKey {
            kid: jwk.common.key_id.clone(),
            key,
            algorithm,
        });
    }
    if keys.is_empty() {
        return Err(Error::with_cause(
            ErrorKind::InvalidReferral,
            "discovery jwks contains no usable keys",
        ));
    }
    Ok(keys)
}

/// Used when discovery integration is off: every ticket validation fails
/// with `NotInitialized` instead of silently trusting a baked-in key.
pub struct DisabledJwksProvider;

#[async_trait]
impl JwksProvider for DisabledJwksProvider {
    async fn keys(&self) -> Result<Vec<VerificationKey>> {
        Err(Error::with_cause(
            ErrorKind::NotInitialized,
            "discovery integration is disabled; no ticket-signing keys available",
        ))
    }
}

/// A fixed key set, used by tests and air-gapped deployments.
pub struct StaticJwksProvider {
    keys: Vec<VerificationKey>,
}

impl StaticJwksProvider {
    /// A single ES256 public key in PEM form.
    pub fn from_ec_pem(public_key_pem: &str) -> anyhow::Result<Self> {
        let key = DecodingKey::from_ec_pem(public_key_pem.as_bytes())?;
        Ok(Self {
            keys: vec![VerificationKey {
                kid: None,
                key,
                algorithm: Algorithm::ES256,
            }],
        })
    }
}

#[async_trait]
impl JwksProvider for StaticJwksProvider {
    async fn keys(&self) -> Result<Vec<VerificationKey>> {
        Ok(self.keys.clone())
    }
}

/// Validates referral tickets for one colony.
pub struct TicketVerifier {
    provider: Arc<dyn JwksProvider>,
    colony_id: String,
}

impl TicketVerifier {
    pub fn new(provider: Arc<dyn JwksProvider>, colony_id: impl Into<String>) -> Self {
        Self {
            provider,
            colony_id: colony_id.into(),
        }
    }

    /// Validate signature, colony binding and validity window, in that
    /// order. Every failure is `InvalidReferral`.
    pub async fn validate(&self, ticket: &str) -> Result<TicketClaims> {
        let header = decode_header(ticket)
            .map_err(|e| Error::with_cause(ErrorKind::InvalidReferral, format!("header: {e}")))?;

        let keys = self.provider.keys().await?;
        let candidates: Vec<&VerificationKey> = match &header.kid {
            Some(kid) => keys
                .iter()
                .filter(|k| k.kid.as_deref() == Some(kid.as_str()))
                .collect(),
            None => keys.iter().collect(),
        };

        let mut claims: Option<TicketClaims> = None;
        for candidate in candidates {
            let mut validation = Validation::new(candidate.algorithm);
            // Window checks run below so their ordering is deterministic.
            validation.validate_exp = false;
            validation.validate_nbf = false;
            validation.required_spec_claims.clear();

            if let Ok(data) = decode::<TicketClaims>(ticket, &candidate.key, &validation) {
                claims = Some(data.claims);
                break;
            }
        }

        let claims = claims.ok_or_else(|| {
            Error::with_cause(ErrorKind::InvalidReferral, "ticket signature does not verify")
        })?;

        if claims.colony_id != self.colony_id {
            return Err(Error::with_cause(
                ErrorKind::InvalidReferral,
                "ticket is bound to a different colony",
            ));
        }

        let now = Timestamp::now().as_secs();
        if now < claims.nbf {
            return Err(Error::with_cause(
                ErrorKind::InvalidReferral,
                "ticket is not yet valid",
            ));
        }
        if now > claims.exp {
            return Err(Error::with_cause(ErrorKind::InvalidReferral, "ticket expired"));
        }

        Ok(claims)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn valid_ticket_passes() {
        let signer = TicketSigner::generate();
        let verifier = TicketVerifier::new(signer.provider(), "my-shop-prod-a3f2");

        let ticket = signer.sign(&valid_claims("my-shop-prod-a3f2", "agent-1", "deadbeef"));
        let claims = verifier.validate(&ticket).await.unwrap();

        assert_eq!(claims.agent_id, "agent-1");
        assert_eq!(claims.spki_thumbprint, "deadbeef");
    }

    #[tokio::test]
    async fn foreign_signature_is_rejected() {
        let signer = TicketSigner::generate();
        let other_signer = TicketSigner::generate();
        let verifier = TicketVerifier::new(signer.provider(), "c");

        let ticket = other_signer.sign(&valid_claims("c", "agent-1", "x"));
        let err = verifier.validate(&ticket).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidReferral);
    }

    #[tokio::test]
    async fn colony_mismatch_is_rejected() {
        let signer = TicketSigner::generate();
        let verifier = TicketVerifier::new(signer.provider(), "colony-a");

        let ticket = signer.sign(&valid_claims("colony-b", "agent-1", "x"));
        let err = verifier.validate(&ticket).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidReferral);
        assert!(err.to_string().contains("different colony"));
    }

    #[tokio::test]
    async fn expired_and_premature_tickets_are_rejected() {
        let signer = TicketSigner::generate();
        let verifier = TicketVerifier::new(signer.provider(), "c");
        let now = Timestamp::now().as_secs();

        let mut expired = valid_claims("c", "agent-1", "x");
        expired.exp = now - 10;
        let err = verifier.validate(&signer.sign(&expired)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidReferral);

        let mut premature = valid_claims("c", "agent-1", "x");
        premature.nbf = now + 120;
        let err = verifier
            .validate(&signer.sign(&premature))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidReferral);
    }

    #[tokio::test]
    async fn garbage_ticket_is_rejected() {
        let signer = TicketSigner::generate();
        let verifier = TicketVerifier::new(signer.provider(), "c");

        let err = verifier.validate("not-a-jwt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidReferral);
    }

    #[test]
    fn thumbprint_is_stable_hex() {
        let a = spki_thumbprint(b"spki-bytes");
        let b = spki_thumbprint(b"spki-bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, spki_thumbprint(b"other"));
    }
}
