use nom::bytes::streaming::{tag, take_till, take_till1, take_while1};
use nom::character::streaming::{line_ending, space0, space1};
use nom::sequence::{terminated, tuple};
use nom::IResult;

use super::{DetectError, Detector, SniffContext, SniffResult};

const METHODS: [&[u8]; 9] = [
    b"GET", b"POST", b"HEAD", b"PUT", b"DELETE", b"OPTIONS", b"CONNECT", b"PATCH", b"TRACE",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    pub method: String,
    pub version: String,
    /// Host header without port, lowercased. Empty for requests without one.
    pub host: String,
}

impl SniffResult for HttpHeader {
    fn protocol(&self) -> &str {
        "http"
    }

    fn domain(&self) -> &str {
        &self.host
    }
}

/// Recognises an HTTP/1.x request and extracts its `Host`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpDetector;

impl Detector for HttpDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&self, payload: &[u8], _ctx: &SniffContext) -> Result<Box<dyn SniffResult>, DetectError> {
        Ok(Box::new(sniff_http(payload)?))
    }
}

fn begins_with_method(payload: &[u8]) -> Result<(), DetectError> {
    let mut partial = false;
    for method in METHODS {
        if payload.len() > method.len() {
            if payload[..method.len()].eq_ignore_ascii_case(method) && payload[method.len()] == b' ' {
                return Ok(());
            }
        } else if method[..payload.len()].eq_ignore_ascii_case(payload) {
            partial = true;
        }
    }

    if partial {
        Err(DetectError::NoClue)
    } else {
        Err(DetectError::NotMatched)
    }
}

fn is_line_end(c: u8) -> bool {
    c == b'\r' || c == b'\n'
}

/// `METHOD SP target SP HTTP/x.y CRLF`
fn request_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, (method, _, _target, _, _, version)) = terminated(
        tuple((
            take_while1(|c: u8| c.is_ascii_alphabetic()),
            space1,
            take_till1(|c: u8| c == b' ' || is_line_end(c)),
            space1,
            tag("HTTP/"),
            take_while1(|c: u8| c.is_ascii_digit() || c == b'.'),
        )),
        line_ending,
    )(input)?;
    Ok((input, (method, version)))
}

/// `name ":" OWS value CRLF`
fn header_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, (name, _, _, value)) = terminated(
        tuple((
            take_till1(|c: u8| c == b':' || is_line_end(c)),
            tag(":"),
            space0,
            take_till(is_line_end),
        )),
        line_ending,
    )(input)?;
    Ok((input, (name, value)))
}

fn map_nom_err(err: nom::Err<nom::error::Error<&[u8]>>) -> DetectError {
    match err {
        nom::Err::Incomplete(_) => DetectError::NoClue,
        err => DetectError::Malformed(format!("http: {:?}", err.map(|e| e.code))),
    }
}

/// Strip the port and brackets off a `Host` value.
fn host_without_port(value: &str) -> &str {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.bytes().all(|c| c.is_ascii_digit()) => host,
        _ => value,
    }
}

pub fn sniff_http(payload: &[u8]) -> Result<HttpHeader, DetectError> {
    begins_with_method(payload)?;

    let (mut input, (method, version)) = request_line(payload).map_err(map_nom_err)?;
    let mut header = HttpHeader {
        method: String::from_utf8_lossy(method).to_ascii_uppercase(),
        version: String::from_utf8_lossy(version).into_owned(),
        host: String::new(),
    };

    loop {
        // Blank line ends the header block.
        if input.first().map_or(false, |c| is_line_end(*c)) {
            line_ending(input).map_err(map_nom_err)?;
            return Ok(header);
        }

        let (rest, (name, value)) = header_line(input).map_err(map_nom_err)?;
        input = rest;

        if name.eq_ignore_ascii_case(b"host") {
            let value = std::str::from_utf8(value)
                .map_err(|_| DetectError::Malformed("http: non-utf8 host".to_owned()))?;
            header.host = host_without_port(value).to_ascii_lowercase();
            return Ok(header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_with_host() {
        let header = sniff_http(b"GET /a?b=c HTTP/1.1\r\nUser-Agent: curl\r\nHost: WWW.Example.com:8080\r\n\r\n").unwrap();
        assert_eq!(header.method, "GET");
        assert_eq!(header.version, "1.1");
        assert_eq!(header.domain(), "www.example.com");
        assert_eq!(header.protocol(), "http");
    }

    #[test]
    fn test_lowercase_method_and_bare_lf() {
        let header = sniff_http(b"post /upload HTTP/1.0\nhost: api.test\n\n").unwrap();
        assert_eq!(header.method, "POST");
        assert_eq!(header.host, "api.test");
    }

    #[test]
    fn test_ipv6_host() {
        let header = sniff_http(b"CONNECT [::1]:443 HTTP/1.1\r\nHost: [::1]:443\r\n\r\n").unwrap();
        assert_eq!(header.host, "::1");
    }

    #[test]
    fn test_no_host_header() {
        let header = sniff_http(b"GET / HTTP/1.0\r\nAccept: */*\r\n\r\n").unwrap();
        assert_eq!(header.host, "");
    }

    #[test]
    fn test_partial_requests_need_more() {
        let full = b"GET / HTTP/1.1\r\nAccept: */*\r\nHost: example.com\r\n\r\n";
        for len in [0, 1, 3, 10, 16, 20, 40] {
            assert_eq!(sniff_http(&full[..len]), Err(DetectError::NoClue), "prefix of {} bytes", len);
        }
        assert!(sniff_http(&full[..full.len() - 2]).is_ok());
    }

    #[test]
    fn test_method_prefix_ambiguity() {
        // "P" could still be POST, PUT or PATCH
        assert_eq!(sniff_http(b"P"), Err(DetectError::NoClue));
        assert_eq!(sniff_http(b"PU"), Err(DetectError::NoClue));
        assert_eq!(sniff_http(b"PUX"), Err(DetectError::NotMatched));
        assert_eq!(sniff_http(b"GETX / HTTP/1.1\r\n"), Err(DetectError::NotMatched));
    }

    #[test]
    fn test_not_http() {
        assert_eq!(sniff_http(b"\x16\x03\x01\x00\x20"), Err(DetectError::NotMatched));
        assert_eq!(sniff_http(b"\x13BitTorrent protocol"), Err(DetectError::NotMatched));
        assert_eq!(sniff_http(b"SSH-2.0-OpenSSH_9.0\r\n"), Err(DetectError::NotMatched));
    }

    #[test]
    fn test_split_final_crlf_needs_more() {
        assert_eq!(sniff_http(b"GET / HTTP/1.0\r\nAccept: */*\r\n\r"), Err(DetectError::NoClue));
    }

    #[test]
    fn test_malformed_request_line() {
        assert!(matches!(
            sniff_http(b"GET / FTP/1.1\r\n\r\n"),
            Err(DetectError::Malformed(_))
        ));
    }
}
