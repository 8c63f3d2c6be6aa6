//! Request-line sniffing for HTTP carried in a single TCP segment.
//!
//! Without stream reassembly only the first segment of a request is seen,
//! so nothing past the request line and a `Host:` scan is validated.

use serde::{Deserialize, Serialize};

/// Verb tokens that mark a payload as an HTTP request. The trailing space
/// is part of the match.
const REQUEST_VERBS: [&str; 5] = ["GET ", "POST ", "PUT ", "DELETE ", "HEAD "];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestLine {
    pub method: String,
    pub uri: String,
    pub version: Option<String>,
    pub host: Option<String>,
    pub request_line: String,
}

/// Parse the request line and scan headers for `Host:`. Returns `None` when
/// the payload does not start with a known verb immediately followed by a
/// request-target.
pub fn parse_request(payload: &[u8]) -> Option<HttpRequestLine> {
    let verb = REQUEST_VERBS
        .iter()
        .find(|verb| payload.starts_with(verb.as_bytes()))?;

    let text = String::from_utf8_lossy(payload);
    let mut lines = text.split("\r\n").flat_map(|l| l.split('\n'));
    let request_line = lines.next().unwrap_or("");

    let rest = &request_line[verb.len()..];
    let mut parts = rest.split(' ');
    let uri = parts.next().filter(|t| !t.is_empty())?;
    let version = parts
        .next()
        .filter(|v| v.starts_with("HTTP/"))
        .map(str::to_string);

    let host = lines
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("host") {
                Some(value.trim().to_string())
            } else {
                None
            }
        });

    Some(HttpRequestLine {
        method: verb.trim_end().to_string(),
        uri: uri.to_string(),
        version,
        host,
        request_line: request_line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_with_host() {
        let payload = b"GET /index.html HTTP/1.1\r\nUser-Agent: curl\r\nHost: example.com\r\n\r\n";
        let request = parse_request(payload).unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.uri, "/index.html");
        assert_eq!(request.version.as_deref(), Some("HTTP/1.1"));
        assert_eq!(request.host.as_deref(), Some("example.com"));
        assert_eq!(request.request_line, "GET /index.html HTTP/1.1");
    }

    #[test]
    fn test_host_header_is_case_insensitive() {
        let request = parse_request(b"POST /login HTTP/1.0\r\nhOsT:  api.local:8080 \r\n\r\n").unwrap();
        assert_eq!(request.host.as_deref(), Some("api.local:8080"));
    }

    #[test]
    fn test_missing_host() {
        let request = parse_request(b"DELETE /item/4 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.method, "DELETE");
        assert!(request.host.is_none());
    }

    #[test]
    fn test_host_in_body_ignored() {
        let request = parse_request(b"PUT /x HTTP/1.1\r\n\r\nHost: body.example").unwrap();
        assert!(request.host.is_none());
    }

    #[test]
    fn test_rejects_non_requests() {
        assert!(parse_request(b"HTTP/1.1 200 OK\r\n\r\n").is_none());
        assert!(parse_request(b"GETX / HTTP/1.1\r\n").is_none());
        assert!(parse_request(b"get / HTTP/1.1\r\n").is_none());
        assert!(parse_request(b"GET  HTTP/1.1\r\n").is_none());
        assert!(parse_request(b"").is_none());
    }

    #[test]
    fn test_unlisted_verbs_are_not_requests() {
        assert!(parse_request(b"HEAD / HTTP/1.1\r\n\r\n").is_some());
        assert!(parse_request(b"OPTIONS * HTTP/1.1\r\n\r\n").is_none());
    }
}
