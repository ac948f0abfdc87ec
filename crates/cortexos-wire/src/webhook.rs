use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    MalformedHeader,
    Mismatch,
}

/// Verifies `x-signature-256: sha256=<hex>` over the raw request body.
///
/// Comparison is constant-time (spec.md §6) so a timing side-channel can't
/// be used to guess the digest byte-by-byte.
pub fn verify_signature(
    secret: &[u8],
    raw_body: &[u8],
    header_value: &str,
) -> Result<(), SignatureError> {
    let hex_digest = header_value
        .strip_prefix("sha256=")
        .ok_or(SignatureError::MalformedHeader)?;
    let expected_bytes = hex::decode(hex_digest).map_err(|_| SignatureError::MalformedHeader)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::MalformedHeader)?;
    mac.update(raw_body);
    let computed = mac.finalize().into_bytes();

    if computed.ct_eq(&expected_bytes).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

pub fn sign(secret: &[u8], raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(raw_body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_signature() {
        let secret = b"topsecret";
        let body = br#"{"x":1}"#;
        let header = sign(secret, body);
        assert!(verify_signature(secret, body, &header).is_ok());
    }

    #[test]
    fn rejects_wrong_signature() {
        let secret = b"topsecret";
        let body = br#"{"x":1}"#;
        let header = "sha256=0000000000000000000000000000000000000000000000000000000000000000";
        assert_eq!(
            verify_signature(secret, body, header),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_malformed_header() {
        let secret = b"topsecret";
        let body = br#"{"x":1}"#;
        assert_eq!(
            verify_signature(secret, body, "not-a-signature"),
            Err(SignatureError::MalformedHeader)
        );
    }
}
