//! Capability implemented by commands that must execute at most once.

use serde::Serialize;
use sha2::{Digest, Sha256};

use wallet_core::UserId;

/// Owner segment used when a command has no authenticated user.
pub const ANONYMOUS: &str = "anonymous";

/// `"{user_id}:{client_key}"`, so keys from different users never collide.
pub fn scoped_key(user_id: Option<UserId>, client_key: &str) -> String {
    match user_id {
        Some(user) => format!("{user}:{client_key}"),
        None => format!("{ANONYMOUS}:{client_key}"),
    }
}

/// Hex SHA-256 over `kind` and the canonical JSON of `command`.
///
/// `serde_json::Value` objects keep keys sorted, so field order in the source
/// struct does not change the digest.
pub fn request_hash<T: Serialize + ?Sized>(
    kind: &str,
    command: &T,
) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(&serde_json::to_value(command)?)?;

    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\n");
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

pub trait IdempotentCommand: Serialize {
    /// Stable command name mixed into the request hash.
    const KIND: &'static str;

    /// Client-supplied key (unscoped).
    fn idempotency_key(&self) -> &str;

    fn user_id(&self) -> Option<UserId> {
        None
    }

    fn scoped_key(&self) -> String {
        scoped_key(self.user_id(), self.idempotency_key())
    }

    /// The form of the command that is hashed. Override to drop formatting
    /// differences that do not change the request, such as decimal scale.
    fn canonical(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn request_hash(&self) -> Result<String, serde_json::Error> {
        request_hash(Self::KIND, &self.canonical()?)
    }
}
