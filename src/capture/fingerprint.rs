use serde_json::json;
use sha2::{Digest, Sha256};

use super::types::OutputFormat;
use crate::driver::AppSource;
use crate::interaction::InteractionCommand;

/// Version tag mixed into every fingerprint; bump to invalidate old keys.
pub const FINGERPRINT_SALT: &str = "v1";

/// Default number of hex characters kept from the digest.
pub const DEFAULT_KEY_LENGTH: usize = 16;

/// Deterministic cache key for a capture request.
///
/// The key is a SHA-256 digest over canonical JSON of the app identity
/// (program, arguments, terminal size), the context label, the parsed
/// interactions and the output format, truncated to `key_length` hex chars.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    key_length: usize,
    salt: String,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self {
            key_length: DEFAULT_KEY_LENGTH,
            salt: FINGERPRINT_SALT.to_string(),
        }
    }
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex characters to keep, clamped to the digest length (64).
    pub fn key_length(mut self, len: usize) -> Self {
        self.key_length = len.clamp(8, 64);
        self
    }

    pub fn salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn fingerprint(
        &self,
        app: &AppSource,
        context: &str,
        interactions: &[InteractionCommand],
        format: OutputFormat,
    ) -> String {
        let size = app.terminal_size();
        // serde_json maps are ordered by key, so this serialisation is canonical.
        let canonical = json!({
            "app": app.program(),
            "args": app.arguments(),
            "size": [size.cols, size.rows],
            "context": context,
            "interactions": interactions.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "format": format.as_str(),
            "salt": self.salt,
        });

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        let mut key = hex::encode(digest);
        key.truncate(self.key_length);
        key
    }
}
