//! Extension point for per-record transforms applied while dumping.
//!
//! The original ships a masking module that rewrites sensitive field values
//! (hashing, redaction, substitution) as documents pass through a dump job,
//! driven by a user-supplied masking config file. This core exposes the
//! same seam as a trait so a caller can plug in a real masking
//! implementation; the default is a pass-through no-op.

use serde_json::Value;

/// Transforms one document's JSON value before it is written to a dump
/// file. Implementations must be safe to call concurrently from multiple
/// worker threads.
pub trait Masking: Send + Sync {
    /// Returns the (possibly rewritten) document. The default
    /// implementation, [`NoOpMasking`], returns `document` unchanged.
    fn apply(&self, collection_name: &str, document: Value) -> Value;
}

/// The default masking policy: every document passes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMasking;

impl Masking for NoOpMasking {
    fn apply(&self, _collection_name: &str, document: Value) -> Value {
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_op_masking_returns_input_unchanged() {
        let masking = NoOpMasking;
        let doc = json!({"name": "alice", "ssn": "123-45-6789"});
        assert_eq!(masking.apply("people", doc.clone()), doc);
    }
}
