//! Pluggable transformation of message bodies.
//!
//! The router hands every text body to a [`BodyTransform`] twice: once
//! before it is written to the message log and once before it is delivered.
//! Capabilities such as payload decryption or translation plug in here
//! without touching the router. The default, [`Passthrough`], leaves bodies
//! unchanged.

/// A transform could not process a body.
#[derive(Debug, thiserror::Error)]
#[error("body transform failed: {0}")]
pub struct TransformError(pub String);

/// Strategy applied to text bodies by the router.
///
/// Both methods default to returning the body unchanged, so an
/// implementation only overrides the stage it cares about.
pub trait BodyTransform: Send + Sync {
    /// Produces the text written to the message log.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] if the body cannot be processed; the
    /// router then logs the body as received.
    fn for_log(&self, body: &str) -> Result<String, TransformError> {
        Ok(body.to_string())
    }

    /// Produces the text delivered to the recipient.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] if the body cannot be processed; the
    /// router then drops the delivery.
    fn for_delivery(&self, body: &str) -> Result<String, TransformError> {
        Ok(body.to_string())
    }
}

/// Leaves bodies untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl BodyTransform for Passthrough {}
