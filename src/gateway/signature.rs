use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ServiceError::InternalError(format!("invalid HMAC key: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex signature in constant time. Malformed input is a mismatch, never an error.
pub fn verify_hmac_sha256_hex(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Payload the gateway signs for the checkout callback: `"{order_id}|{payment_id}"`.
pub fn client_signature_payload(order_id: &str, payment_id: &str) -> String {
    format!("{}|{}", order_id, payment_id)
}
