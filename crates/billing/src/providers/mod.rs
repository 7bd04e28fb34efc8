//! Provider webhook adapters
//!
//! One adapter per payment provider. Each adapter validates payload
//! authenticity and normalizes the provider's vocabulary into a
//! [`CanonicalBillingEvent`]. Adapters are pure: parsing has no side
//! effects, and all mutation happens downstream of the dedup ledger.

pub mod cakto;
pub mod hotmart;
pub mod kiwify;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::RejectionReason;
use crate::events::{CanonicalBillingEvent, Provider};

pub use cakto::CaktoAdapter;
pub use hotmart::HotmartAdapter;
pub use kiwify::KiwifyAdapter;

type HmacSha256 = Hmac<Sha256>;

/// Authentication material extracted from the inbound HTTP request.
///
/// Which field a given adapter reads depends on the provider's scheme:
/// Hotmart sends an integration token header, Kiwify signs the raw body,
/// Cakto embeds a shared secret in the payload itself.
#[derive(Debug, Clone, Default)]
pub struct WebhookAuth {
    /// Value of the provider's token header, if present
    pub token: Option<String>,
    /// Hex-encoded body signature, if present
    pub signature: Option<String>,
}

/// Contract implemented by every provider adapter
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Validate authenticity and normalize the raw payload.
    ///
    /// Pure: no side effects. `RejectionReason::AuthenticationFailed`
    /// must surface as a 401; any other rejection is logged and ACKed.
    fn parse(
        &self,
        raw_body: &str,
        auth: &WebhookAuth,
    ) -> Result<CanonicalBillingEvent, RejectionReason>;
}

/// Constant-time string equality for shared-secret checks
pub(crate) fn secrets_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Verify an HMAC-SHA256 hex signature over the raw body, in constant time
pub(crate) fn verify_body_signature(secret: &str, body: &str, signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());
    secrets_match(&computed, signature_hex)
}

/// Convert a provider cents amount into a two-decimal amount
pub(crate) fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Convert a provider float amount, rejecting non-finite values
pub(crate) fn float_to_decimal(value: f64) -> Result<Decimal, RejectionReason> {
    Decimal::try_from(value)
        .map_err(|e| RejectionReason::Malformed(format!("unrepresentable amount {value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_match_rejects_different_lengths() {
        assert!(secrets_match("hottok-abc", "hottok-abc"));
        assert!(!secrets_match("hottok-abc", "hottok-ab"));
        assert!(!secrets_match("hottok-abc", "hottok-abd"));
    }

    #[test]
    fn body_signature_round_trip() {
        let secret = "whk_secret";
        let body = r#"{"order_id":"abc"}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_body_signature(secret, body, &sig));
        assert!(!verify_body_signature(secret, body, "deadbeef"));
        assert!(!verify_body_signature("wrong", body, &sig));
    }

    #[test]
    fn cents_conversion() {
        assert_eq!(cents_to_decimal(9700).to_string(), "97.00");
        assert_eq!(cents_to_decimal(4365).to_string(), "43.65");
        assert_eq!(cents_to_decimal(0).to_string(), "0.00");
    }
}
