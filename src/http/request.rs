//! # Cabecera del Request
//! src/http/request.rs
//!
//! Solo se interpreta la request line; los headers se conservan tal cual
//! para el handler del embebedor.
//!
//! ```text
//! GET /path?query HTTP/1.0\r\n
//! Header-Name: Header-Value\r\n
//! \r\n
//! ```

use std::fmt;

/// Tamaño máximo de la cabecera que se acepta
pub const MAX_HEAD_SIZE: usize = 8192;

/// Request line parseada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    method: String,
    target: String,
    version: String,
    headers: Vec<(String, String)>,
}

/// Errores de parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request vacío
    EmptyRequest,

    /// La cabecera no es UTF-8 o la request line no tiene tres partes
    InvalidRequestLine,

    /// Versión distinta de HTTP/1.x
    InvalidHttpVersion(String),

    /// Header sin ':'
    InvalidHeader(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::EmptyRequest => write!(f, "Empty request"),
            ParseError::InvalidRequestLine => write!(f, "Invalid request line format"),
            ParseError::InvalidHttpVersion(v) => write!(f, "Invalid HTTP version: {}", v),
            ParseError::InvalidHeader(h) => write!(f, "Invalid header: {}", h),
        }
    }
}

impl std::error::Error for ParseError {}

impl RequestHead {
    /// Parsea la cabecera (todo lo anterior a la línea vacía)
    pub fn parse(buffer: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(buffer).map_err(|_| ParseError::InvalidRequestLine)?;
        if text.trim().is_empty() {
            return Err(ParseError::EmptyRequest);
        }

        let mut lines = text.split("\r\n");
        let request_line = lines.next().unwrap_or("");

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, target, version] = parts.as_slice() else {
            return Err(ParseError::InvalidRequestLine);
        };
        if !version.starts_with("HTTP/1.") {
            return Err(ParseError::InvalidHttpVersion(version.to_string()));
        }

        let mut headers = Vec::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::InvalidHeader(line.to_string()))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path sin query string
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Busca un header sin distinguir mayúsculas
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_get() {
        let head = RequestHead::parse(b"GET /status?x=1 HTTP/1.0\r\nHost: localhost\r\n\r\n").unwrap();
        assert_eq!(head.method(), "GET");
        assert_eq!(head.path(), "/status");
        assert_eq!(head.target(), "/status?x=1");
        assert_eq!(head.version(), "HTTP/1.0");
        assert_eq!(head.header("host"), Some("localhost"));
    }

    #[test]
    fn test_empty_request() {
        assert_eq!(RequestHead::parse(b"   "), Err(ParseError::EmptyRequest));
    }

    #[test]
    fn test_invalid_request_line() {
        assert_eq!(
            RequestHead::parse(b"GET /only-two\r\n\r\n"),
            Err(ParseError::InvalidRequestLine)
        );
        assert_eq!(
            RequestHead::parse(&[0xff, 0xfe, b'\r', b'\n']),
            Err(ParseError::InvalidRequestLine)
        );
    }

    #[test]
    fn test_invalid_version() {
        assert!(matches!(
            RequestHead::parse(b"GET / SPDY/3\r\n\r\n"),
            Err(ParseError::InvalidHttpVersion(v)) if v == "SPDY/3"
        ));
    }

    #[test]
    fn test_invalid_header() {
        assert!(matches!(
            RequestHead::parse(b"GET / HTTP/1.1\r\nno-colon-here\r\n\r\n"),
            Err(ParseError::InvalidHeader(_))
        ));
    }
}
