//! Message identifiers.

/// Identifier for a queued message.
///
/// The identifier is the message's filename in the spool root. Producers
/// choose the name (our own [`generate`](MessageId::generate) uses a ULID so
/// concurrent producers never collide); this type only guarantees the name
/// is safe to join onto the spool path and cannot collide with the
/// dot-prefixed marker files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    /// Parse a message ID from a spool filename.
    ///
    /// Rejects anything that could escape the spool root or shadow a marker:
    /// path separators, `..` sequences, and dot-prefixed names.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.is_empty() || filename.starts_with('.') {
            return None;
        }
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }
        Some(Self(filename.to_string()))
    }

    /// Generate a fresh unique message ID for a newly enqueued message.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// The identifier as the filename it maps to.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
