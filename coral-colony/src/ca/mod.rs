//!
//! The embedded certificate authority and bootstrap-PSK subsystem.
//!
//! Owns every piece of cryptographic identity in the colony: the root and
//! intermediate CAs, the policy-signing leaf, the bootstrap PSK lifecycle,
//! referral-ticket validation and leaf issuance/revocation. Private keys
//! never leave this module.
//!

mod identity;
mod issuer;
mod psk;
mod ticket;

pub use identity::ColonyIdentity;
pub use issuer::{CertificateIssuer, IssuedChain, ServerCertificate};
pub use psk::PskManager;
pub use ticket::{
    spki_thumbprint, DisabledJwksProvider, HttpJwksProvider, JwksProvider, StaticJwksProvider,
    TicketClaims, TicketVerifier,
};

pub(crate) use issuer::csr_spki_der;

#[cfg(test)]
pub(crate) use issuer::test_support;
#[cfg(test)]
pub(crate) use ticket::test_support as ticket_test_support;
