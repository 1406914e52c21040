use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::Subscription;

type HmacSha256 = Hmac<Sha256>;

/// Default header carrying the hex HMAC of the body.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Relay-Signature";

/// Signature header to attach to one outbound request.
pub fn build_signature_header(
    subscription: &Subscription,
    header_name: &str,
    body: &[u8],
) -> Option<(String, String)> {
    let secret = subscription.secret.as_ref()?;
    Some((header_name.to_string(), compute_signature(secret.as_bytes(), body)))
}

/// Hex-encoded HMAC-SHA256 of `payload` keyed by `secret`.
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a received hex signature in constant time.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);

    mac.verify_slice(&signature).is_ok()
}

/// Find a header value by case-insensitive name.
pub fn find_signature_header<'a, I>(headers: I, signature_header: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(signature_header))
        .map(|(_, value)| value)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("signature header missing")]
    MissingSignature,

    #[error("signature does not match body")]
    InvalidSignature,
}

/// Verify an incoming webhook request in one call.
///
/// Intended for subscribers receiving deliveries from this crate.
pub fn verify_webhook_request<'a, I>(
    headers: I,
    payload: &[u8],
    secret: &[u8],
    signature_header: &str,
) -> Result<(), VerificationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let signature =
        find_signature_header(headers, signature_header).ok_or(VerificationError::MissingSignature)?;

    if verify_signature(secret, payload, signature) {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}
