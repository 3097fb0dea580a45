//! Resource identity and the opaque lease-id codec.
//!
//! Every lockable resource is addressed by a (resource, scope) pair. Both
//! halves are normalised (trimmed, lower-cased) before any use, then hashed
//! into fixed-width keys:
//!
//! - `resource_uid(resource, scope)` names the coordination blob and keys the
//!   in-process serialiser
//! - `partition_key(scope)` partitions the journal table by scope
//!
//! MD5 is used purely as a name compressor for storage keys, not for
//! security; collisions would require adversarial inputs and only degrade
//! liveness (two resources sharing a gate), never mutual exclusion.
//!
//! The lease id handed to callers is `base64("{row_key}|{partition_key}")`.
//! Decoding is strict: malformed base64, non-UTF-8 payloads, or payloads
//! without exactly one separator yield `None`, which the coordinator maps to
//! an invalid-argument error at the call site.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest, Md5};
use uuid::Uuid;

/// Scope applied when the caller does not name one.
pub const DEFAULT_SCOPE: &str = "default";

/// Separator between the row and partition halves of a lease id.
const LEASE_ID_SEPARATOR: char = '|';

/// Normalises a caller-supplied resource or scope name.
///
/// Surrounding whitespace is trimmed and the remainder lower-cased, so
/// `" Tenant-1 "` and `"tenant-1"` address the same resource.
#[must_use]
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Stable identifier for a (resource, scope) pair.
///
/// Used as the coordination blob name and as the in-process serialiser key.
/// Inputs must already be normalised.
#[must_use]
pub fn resource_uid(resource: &str, scope: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(resource.as_bytes());
    hasher.update(scope.as_bytes());
    hex::encode(hasher.finalize())
}

/// Journal partition key for a (normalised) scope.
#[must_use]
pub fn partition_key(scope: &str) -> String {
    hex::encode(Md5::digest(scope.as_bytes()))
}

/// Mints a fresh journal row key: a lower-case hex UUID without separators.
#[must_use]
pub fn new_row_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Identifies one journal record by its row and partition keys.
///
/// The encoded form is the opaque lease id shipped to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Journal row key.
    pub row_key: String,
    /// Journal partition key.
    pub partition_key: String,
}

impl RecordId {
    /// Creates a record id from its two halves.
    #[must_use]
    pub fn new(row_key: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            row_key: row_key.into(),
            partition_key: partition_key.into(),
        }
    }

    /// Encodes this record id as an opaque lease id.
    #[must_use]
    pub fn encode(&self) -> String {
        BASE64.encode(format!(
            "{}{}{}",
            self.row_key, LEASE_ID_SEPARATOR, self.partition_key
        ))
    }

    /// Decodes an opaque lease id back into a record id.
    ///
    /// Returns `None` for malformed input: invalid base64, a non-UTF-8
    /// payload, a payload without exactly one `'|'`, or an empty half.
    #[must_use]
    pub fn decode(lease_id: &str) -> Option<Self> {
        let raw = BASE64.decode(lease_id).ok()?;
        let text = String::from_utf8(raw).ok()?;
        let mut halves = text.split(LEASE_ID_SEPARATOR);
        let row_key = halves.next()?;
        let partition_key = halves.next()?;
        if halves.next().is_some() || row_key.is_empty() || partition_key.is_empty() {
            return None;
        }
        Some(Self::new(row_key, partition_key))
    }
}
