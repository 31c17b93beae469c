use crate::error::CoreError;

const WEBHOOK_KEY_CONTEXT: &str = "studygate webhook signing v1";

/// Shared-secret authority for inbound provider webhooks.
///
/// Deterministic keyed hashing keeps signatures reproducible for tests and
/// local provider simulation. In production deployments the secret should
/// come from a managed secret store and rotate with the provider endpoint.
#[derive(Debug, Clone)]
pub struct WebhookAuthority {
    key: [u8; 32],
}

impl WebhookAuthority {
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(WEBHOOK_KEY_CONTEXT, secret.as_bytes()),
        }
    }

    /// Hex signature over the exact raw payload bytes.
    pub fn sign(&self, payload: &[u8]) -> String {
        blake3::keyed_hash(&self.key, payload).to_hex().to_string()
    }

    /// Verify a signature header against raw payload bytes, before any
    /// parsing. Comparison is constant-time.
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<(), CoreError> {
        let provided = blake3::Hash::from_hex(signature.trim()).map_err(|_| {
            CoreError::SignatureVerification("malformed signature header".to_string())
        })?;

        let expected = blake3::keyed_hash(&self.key, payload);
        if provided != expected {
            return Err(CoreError::SignatureVerification(
                "signature mismatch".to_string(),
            ));
        }

        Ok(())
    }
}
