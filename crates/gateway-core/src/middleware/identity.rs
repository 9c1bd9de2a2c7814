//! Identity projection: strips client-supplied identity headers before they
//! ever reach the forward engine's header composition step, then re-attaches
//! a signed identity for authenticated requests.
//!
//! The gateway never terminates end-user authentication itself — it assumes
//! an upstream collaborator (not part of this crate) has already attached an
//! [`AuthContext`] to the request. This module's only job is preventing a
//! client from forging that identity on the way out.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Headers a client could use to spoof an identity the gateway is about to
/// assert on its behalf. Stripped unconditionally, authenticated or not —
/// this is a hard invariant, not a policy toggle.
pub const SPOOFABLE_HEADERS: &[&str] = &[
    "x-user-id",
    "x-user-role",
    "x-user-id-signature",
    "x-user-id-timestamp",
    "x-gateway-service",
];

pub fn is_spoofable(header_name: &str) -> bool {
    let lower = header_name.to_ascii_lowercase();
    SPOOFABLE_HEADERS.contains(&lower.as_str())
}

/// The identity established by whatever authenticates requests upstream of
/// the gateway (e.g. a JWT-validating step). Absent entirely for guest
/// traffic on routes that don't require auth.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub user_role: Option<String>,
}

/// The four headers attached to an authenticated outbound request. Exactly
/// these four and no others — per the testable invariant that an
/// authenticated request carries exactly four signed headers.
#[derive(Debug, Clone)]
pub struct SignedIdentity {
    pub user_id: String,
    pub user_role: String,
    pub timestamp: String,
    pub signature: String,
}

/// HMAC-SHA256 signer over `(userId, userRole, timestamp)`. One instance is
/// constructed at startup from `GatewaySettings`'s identity secret and
/// shared across every request.
pub struct IdentitySigner {
    secret: Vec<u8>,
}

impl IdentitySigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    fn sign(&self, user_id: &str, user_role: &str, timestamp: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(user_id.as_bytes());
        mac.update(b":");
        mac.update(user_role.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Produces the signed identity for an authenticated context, or `None`
    /// for an unauthenticated one — callers must never attach signed headers
    /// in that case.
    pub fn project(&self, ctx: &AuthContext) -> Option<SignedIdentity> {
        if !ctx.authenticated {
            return None;
        }
        let user_id = ctx.user_id.clone()?;
        let user_role = ctx.user_role.clone().unwrap_or_else(|| "user".to_string());
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&user_id, &user_role, &timestamp);
        Some(SignedIdentity {
            user_id,
            user_role,
            timestamp,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spoofable_header_check_is_case_insensitive() {
        assert!(is_spoofable("X-User-Id"));
        assert!(is_spoofable("x-gateway-service"));
        assert!(!is_spoofable("content-type"));
    }

    #[test]
    fn unauthenticated_context_projects_nothing() {
        let signer = IdentitySigner::new(b"secret".to_vec());
        let ctx = AuthContext::default();
        assert!(signer.project(&ctx).is_none());
    }

    #[test]
    fn authenticated_context_is_deterministic_over_identity() {
        let signer = IdentitySigner::new(b"secret".to_vec());
        let sig_a = signer.sign("U1", "user", "1000");
        let sig_b = signer.sign("U1", "user", "1000");
        assert_eq!(sig_a, sig_b);
        let sig_c = signer.sign("U1", "admin", "1000");
        assert_ne!(sig_a, sig_c);
    }

    #[test]
    fn projected_identity_never_echoes_spoofed_role() {
        let signer = IdentitySigner::new(b"secret".to_vec());
        let ctx = AuthContext {
            authenticated: true,
            user_id: Some("U1".to_string()),
            user_role: Some("user".to_string()),
        };
        let identity = signer.project(&ctx).unwrap();
        assert_eq!(identity.user_id, "U1");
        assert_eq!(identity.user_role, "user");
        assert!(!identity.signature.is_empty());
    }
}
