//! Slack request signing (`v0=` HMAC-SHA256 over `v0:{timestamp}:{body}`).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Requests older (or newer) than this are treated as replays.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60 * 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature headers")]
    Missing,
    #[error("request timestamp is malformed")]
    BadTimestamp,
    #[error("request timestamp is outside the allowed window")]
    Stale,
    #[error("signature does not match")]
    Mismatch,
    #[error("signing secret is unusable")]
    BadSecret,
}

pub fn verify(
    signing_secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now_unix: i64,
) -> Result<(), SignatureError> {
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(SignatureError::Missing);
    };

    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::BadTimestamp)?;
    if (now_unix - sent_at).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(SignatureError::Stale);
    }

    let expected = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(SignatureError::Mismatch)?;

    mac_for(signing_secret, timestamp, body)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// The `X-Slack-Signature` value Slack would send for this request.
pub fn sign(signing_secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = mac_for(signing_secret, timestamp, body)?;
    Ok(format!("v0={}", hex::encode(mac.finalize().into_bytes())))
}

fn mac_for(signing_secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(signing_secret.as_bytes())
        .map_err(|_| SignatureError::BadSecret)?;
    mac.update(b"v0:");
    mac.update(timestamp.trim().as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = b"token=xyz&team_id=T1&command=%2Fcodecov";

    #[test]
    fn signed_requests_verify() {
        let sig = sign(SECRET, "1531420618", BODY).unwrap();
        assert_eq!(verify(SECRET, Some("1531420618"), Some(sig.as_str()), BODY, 1531420618), Ok(()));
        assert_eq!(verify(SECRET, Some("1531420618"), Some(sig.as_str()), BODY, 1531420618 + 120), Ok(()));
    }

    #[test]
    fn tampering_is_detected() {
        let sig = sign(SECRET, "1531420618", BODY).unwrap();
        assert_eq!(
            verify(SECRET, Some("1531420618"), Some(sig.as_str()), b"token=abc", 1531420618),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify("other", Some("1531420618"), Some(sig.as_str()), BODY, 1531420618),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify(SECRET, Some("1531420618"), Some("v0=nothex"), BODY, 1531420618),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_or_missing_headers_are_rejected() {
        let sig = sign(SECRET, "1531420618", BODY).unwrap();
        assert_eq!(
            verify(SECRET, Some("1531420618"), Some(sig.as_str()), BODY, 1531420618 + 301),
            Err(SignatureError::Stale)
        );
        assert_eq!(verify(SECRET, None, Some(sig.as_str()), BODY, 0), Err(SignatureError::Missing));
        assert_eq!(
            verify(SECRET, Some("yesterday"), Some(sig.as_str()), BODY, 0),
            Err(SignatureError::BadTimestamp)
        );
    }
}
