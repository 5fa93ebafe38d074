//! Relay reply parsing.

use super::error::{ClientError, Result};

/// A single line of a (possibly multi-line) reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` when the code is followed by `-`, i.e. more lines follow.
    pub is_last: bool,
    pub message: String,
}

/// A complete reply from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The reply text with lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx: the server wants more input (DATA, AUTH challenges).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code >= 400 && self.code < 600
    }

    /// Turn a reply into a [`ClientError`] unless it has the expected code class.
    ///
    /// # Errors
    /// `SmtpError` for 4xx/5xx replies, `UnexpectedResponse` for anything else.
    pub fn expect_class(self, class: u16) -> Result<Self> {
        if self.code / 100 == class {
            Ok(self)
        } else if self.is_error() {
            Err(ClientError::SmtpError {
                code: self.code,
                message: self.message(),
            })
        } else {
            Err(ClientError::UnexpectedResponse {
                code: self.code,
                message: self.message(),
            })
        }
    }

    /// Parses a single reply line.
    ///
    /// # Errors
    /// If the line doesn't start with a three digit code and a valid separator.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| ClientError::ParseError(format!("Invalid reply line: '{line}'")))?
            .parse::<u16>()
            .map_err(|e| ClientError::ParseError(e.to_string()))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` if more data is needed.
    ///
    /// # Errors
    /// If the buffered reply is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut lines = Vec::new();
        let mut consumed = 0;
        let mut first_code = None;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let line = std::str::from_utf8(raw)?.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(line)?;
            match first_code {
                Some(code) if code != parsed.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(parsed.code),
            }

            lines.push(parsed.message);

            if parsed.is_last {
                return Ok(Some((Self::new(parsed.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_single_line() {
        assert_eq!(
            Response::parse_line("220 relay.example.com ESMTP").unwrap(),
            ResponseLine {
                code: 220,
                is_last: true,
                message: "relay.example.com ESMTP".to_string(),
            }
        );
        assert!(Response::parse_line("250").unwrap().is_last);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Response::parse_line("OK").is_err());
        assert!(Response::parse_line("25x OK").is_err());
        assert!(Response::parse_line("250+OK").is_err());
    }

    #[test]
    fn test_parse_multi_line_response() {
        let data = b"250-relay.example.com\r\n250-STARTTLS\r\n250 AUTH PLAIN LOGIN\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();

        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["relay.example.com", "STARTTLS", "AUTH PLAIN LOGIN"]
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_parse_leaves_trailing_data() {
        let data = b"250 OK\r\n221 Bye\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.lines, vec!["OK"]);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_parse_incomplete_response() {
        assert!(Response::parse_response(b"250-relay\r\n250-SIZE").unwrap().is_none());
        assert!(Response::parse_response(b"").unwrap().is_none());
    }

    #[test]
    fn test_code_mismatch_is_error() {
        assert!(Response::parse_response(b"250-one\r\n251 two\r\n").is_err());
    }

    #[test]
    fn test_expect_class() {
        let ok = Response::new(250, vec!["OK".to_string()]);
        assert!(ok.expect_class(2).is_ok());

        let go_ahead = Response::new(354, vec!["Go ahead".to_string()]);
        assert!(matches!(
            go_ahead.expect_class(2),
            Err(ClientError::UnexpectedResponse { code: 354, .. })
        ));

        let denied = Response::new(550, vec!["No".to_string()]);
        assert!(matches!(
            denied.expect_class(2),
            Err(ClientError::SmtpError { code: 550, .. })
        ));
    }
}
