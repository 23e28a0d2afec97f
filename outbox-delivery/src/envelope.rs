//! The queued message format.
//!
//! Producers prepend two envelope header lines to the raw payload:
//!
//! ```text
//! X-Zope-From: sender@example.com
//! X-Zope-To: one@example.com, two@example.com
//! <payload bytes, untouched>
//! ```
//!
//! The format is inherited from the Zope queued-delivery convention, which
//! is what existing producers write.

const FROM_MARKER: &[u8] = b"X-Zope-From: ";
const TO_MARKER: &[u8] = b"X-Zope-To: ";

/// Everything needed for one delivery attempt: sender, recipients, payload.
///
/// A fresh `Envelope` is parsed from the message file's current content on
/// every attempt; it is never cached or mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender address; may be empty (the SMTP null reverse-path).
    pub from: String,
    /// Recipient addresses, in producer order.
    pub to: Vec<String>,
    /// Raw payload with the two envelope headers stripped.
    pub body: Vec<u8>,
}

impl Envelope {
    /// Parse queued bytes into an envelope.
    ///
    /// This never fails: an unrecognized from-line yields an empty sender,
    /// an unrecognized to-line yields no recipients, and content with fewer
    /// than two newlines is returned whole as the body. Deciding whether
    /// such an envelope is still deliverable is the mailer's job.
    #[must_use]
    pub fn parse(content: &[u8]) -> Self {
        let Some((first, after_first)) = split_line(content) else {
            return Self::fallback(content);
        };
        let Some((second, body)) = split_line(after_first) else {
            return Self::fallback(content);
        };

        let from = header_value(first, FROM_MARKER).unwrap_or_default();
        let to = header_value(second, TO_MARKER)
            .filter(|value| !value.is_empty())
            .map(|value| value.split(", ").map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            from,
            to,
            body: body.to_vec(),
        }
    }

    /// Render an envelope back into the queued format, for producers.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 64);
        out.extend_from_slice(FROM_MARKER);
        out.extend_from_slice(self.from.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(TO_MARKER);
        out.extend_from_slice(self.to.join(", ").as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out
    }

    /// Recipients joined for log output.
    #[must_use]
    pub fn recipients(&self) -> String {
        self.to.join(", ")
    }

    fn fallback(content: &[u8]) -> Self {
        Self {
            from: String::new(),
            to: Vec::new(),
            body: content.to_vec(),
        }
    }
}

/// Split off the first line (without its terminator) from `content`.
fn split_line(content: &[u8]) -> Option<(&[u8], &[u8])> {
    let nl = content.iter().position(|&b| b == b'\n')?;
    Some((&content[..nl], &content[nl + 1..]))
}

/// Extract a header line's value if it starts with `marker` and decodes as
/// UTF-8. A trailing `\r` is tolerated on the line.
fn header_value(line: &[u8], marker: &[u8]) -> Option<String> {
    let value = line.strip_prefix(marker)?;
    let value = value.strip_suffix(b"\r").unwrap_or(value);
    std::str::from_utf8(value).ok().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_message() {
        let content = b"X-Zope-From: foo@example.com\n\
                        X-Zope-To: bar@example.com, baz@example.com\n\
                        Header: value\n\nBody\n";
        let envelope = Envelope::parse(content);
        assert_eq!(envelope.from, "foo@example.com");
        assert_eq!(envelope.to, vec!["bar@example.com", "baz@example.com"]);
        assert_eq!(envelope.body, b"Header: value\n\nBody\n");
    }

    #[test]
    fn missing_markers_default_to_empty_envelope() {
        let envelope = Envelope::parse(b"first line\nsecond line\nbody");
        assert_eq!(envelope.from, "");
        assert!(envelope.to.is_empty());
        assert_eq!(envelope.body, b"body");
    }

    #[test]
    fn short_content_is_kept_whole_as_body() {
        let content = b"no newlines at all";
        let envelope = Envelope::parse(content);
        assert_eq!(envelope.from, "");
        assert!(envelope.to.is_empty());
        assert_eq!(envelope.body, content);

        let content = b"X-Zope-From: foo@example.com\nonly one newline";
        let envelope = Envelope::parse(content);
        assert_eq!(envelope.from, "");
        assert_eq!(envelope.body, content);
    }

    #[test]
    fn empty_to_header_means_no_recipients() {
        let envelope = Envelope::parse(b"X-Zope-From: a@x\nX-Zope-To: \nbody");
        assert!(envelope.to.is_empty());
    }

    #[test]
    fn body_is_preserved_byte_for_byte() {
        let mut content = b"X-Zope-From: a@x\nX-Zope-To: b@x\n".to_vec();
        let binary_body = [0u8, 159, 146, 150, b'\n', 0xff];
        content.extend_from_slice(&binary_body);
        assert_eq!(Envelope::parse(&content).body, binary_body);
    }

    #[test]
    fn round_trips_through_to_bytes() {
        let envelope = Envelope {
            from: "foo@example.com".to_string(),
            to: vec!["bar@example.com".to_string(), "baz@example.com".to_string()],
            body: b"Subject: hi\n\nhello\n".to_vec(),
        };
        assert_eq!(Envelope::parse(&envelope.to_bytes()), envelope);
    }
}
