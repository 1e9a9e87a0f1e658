//! Opaque, signed pagination cursors.
//!
//! Cursors round-trip through clients, so the payload is HMAC-signed: a
//! forged or edited cursor fails verification and decodes to `None`, which
//! callers treat as "start from the beginning". The payload is
//! `"<rfc3339>|<uuid>|<hex signature>"`, base64url-encoded without padding.

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Position in a strict `(sort_key DESC, id DESC)` scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub sort_key: DateTime<Utc>,
    pub tiebreak_id: Uuid,
}

/// Encodes and verifies cursors with a server-side secret. Constructed
/// explicitly and injected; no module-level state.
#[derive(Clone)]
pub struct CursorCodec {
    secret: String,
}

impl CursorCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn encode(&self, cursor: &Cursor) -> String {
        let payload = format!("{}|{}", cursor.sort_key.to_rfc3339(), cursor.tiebreak_id);
        let sig = self.sign(&payload);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!("{payload}|{sig}"))
    }

    /// Decode and verify. Any malformed or tampered input yields `None`,
    /// never an error.
    pub fn decode(&self, token: &str) -> Option<Cursor> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .ok()?;
        let raw = String::from_utf8(bytes).ok()?;

        let parts: Vec<&str> = raw.splitn(3, '|').collect();
        if parts.len() != 3 {
            return None;
        }
        let (ts, id, sig) = (parts[0], parts[1], parts[2]);
        if ts.is_empty() || id.is_empty() || sig.is_empty() {
            return None;
        }

        let payload = format!("{ts}|{id}");
        let expected = self.sign(&payload);
        if !constant_time_eq(sig.as_bytes(), expected.as_bytes()) {
            return None;
        }

        let sort_key = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
        let tiebreak_id: Uuid = id.parse().ok()?;

        Some(Cursor {
            sort_key,
            tiebreak_id,
        })
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
