//! SMTP response parsing.

use crate::error::{ClientError, Result};

/// A complete (possibly multi-line) SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Three-digit status code shared by every line of the reply.
    pub code: u16,
    /// Text of each reply line, status code and separator stripped.
    pub lines: Vec<String>,
}

impl Response {
    /// All reply text joined with newlines, for logging.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx: the command was accepted.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 4xx: a temporary condition, worth retrying later.
    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// 5xx: a permanent refusal, retrying as-is will not help.
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parse one complete reply from the front of `buffer`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a full reply
    /// (more data must be read), otherwise the reply and the number of bytes
    /// it consumed. Lines may be terminated by CRLF or bare LF.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut lines = Vec::new();
        let mut code: Option<u16> = None;

        loop {
            let rest = &buffer[consumed..];
            let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let raw = rest[..nl].strip_suffix(b"\r").unwrap_or(&rest[..nl]);
            consumed += nl + 1;

            let line = std::str::from_utf8(raw)?;
            let (line_code, is_last, text) = split_line(line)?;

            match code {
                Some(expected) if expected != line_code => {
                    return Err(ClientError::Parse(format!(
                        "status code changed mid-reply: {expected} then {line_code}"
                    )));
                }
                None => code = Some(line_code),
                Some(_) => {}
            }
            lines.push(text.to_string());

            if is_last {
                return Ok(Some((Self { code: line_code, lines }, consumed)));
            }
        }
    }
}

/// Split one reply line into (code, is-last-line, text).
///
/// A space after the code ends the reply, a dash continues it, and a bare
/// three-digit line counts as final (some servers send exactly that).
fn split_line(line: &str) -> Result<(u16, bool, &str)> {
    if line.len() < 3 || !line.is_char_boundary(3) {
        return Err(ClientError::Parse(format!("malformed reply line: {line:?}")));
    }
    let code = line[..3]
        .parse::<u16>()
        .map_err(|_| ClientError::Parse(format!("invalid status code in {line:?}")))?;
    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(_) => Err(ClientError::Parse(format!(
            "invalid separator in reply line: {line:?}"
        ))),
    }
}
