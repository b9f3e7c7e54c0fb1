use alloc::format;
use alloc::vec::Vec;

use super::{Header, HttpClient, MAX_HEADERS, Request, Response};
use crate::network::error::Error;
use crate::network::{Close, Connect, Read, Write, write_all};

/// Default cap on the size of a whole response, headers included.
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 16 * 1024;

/// An HTTP/1.1 client over any [`Connect`].
///
/// Every request opens a fresh connection, sends `Connection: close` and
/// reads until `Content-Length` bytes of body arrived or the peer closed.
pub struct Client<N: Connect> {
    network: N,
    max_response_len: usize,
}

impl<N: Connect> Client<N> {
    /// Creates a client using [`DEFAULT_MAX_RESPONSE_LEN`].
    pub fn new(network: N) -> Self {
        Self {
            network,
            max_response_len: DEFAULT_MAX_RESPONSE_LEN,
        }
    }

    /// Overrides the response size cap.
    pub fn with_max_response_len(mut self, len: usize) -> Self {
        self.max_response_len = len;
        self
    }

    fn exchange(&self, connection: &mut N::Connection, request: &Request<'_>) -> Result<Response, Error> {
        // --- Build Request ---
        let mut request_buf = Vec::with_capacity(256 + request.body.map_or(0, |b| b.len()));

        // Request line
        request_buf.extend_from_slice(request.method.as_str().as_bytes());
        request_buf.push(b' ');
        request_buf.extend_from_slice(request.path.as_bytes());
        request_buf.extend_from_slice(b" HTTP/1.1\r\n");

        // Headers
        let mut has_user_agent = false;
        request_buf.extend_from_slice(b"Host: ");
        request_buf.extend_from_slice(request.host.as_bytes());
        request_buf.extend_from_slice(b"\r\n");
        for header in &request.headers {
            if header.name.eq_ignore_ascii_case("User-Agent") {
                has_user_agent = true;
            }
            request_buf.extend_from_slice(header.name.as_bytes());
            request_buf.extend_from_slice(b": ");
            request_buf.extend_from_slice(header.value.as_bytes());
            request_buf.extend_from_slice(b"\r\n");
        }
        if !has_user_agent {
            request_buf.extend_from_slice(b"User-Agent: TUYA_IOT_SDK\r\n");
        }
        request_buf.extend_from_slice(b"Connection: close\r\n");

        // Body
        if let Some(body) = request.body {
            request_buf.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            request_buf.extend_from_slice(body);
        } else {
            request_buf.extend_from_slice(b"\r\n");
        }

        // --- Send Request ---
        write_all(connection, &request_buf)?;
        connection.flush()?;

        // --- Receive Response ---
        let mut response_buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 512];
        let mut header_end = None;
        let mut content_length = None;
        loop {
            if let Some(end) = header_end {
                if let Some(len) = content_length {
                    if response_buf.len() >= end + len {
                        break;
                    }
                }
            }
            match connection.read(&mut chunk) {
                Ok(0) if header_end.is_some() => break,
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => {
                    if response_buf.len() + n > self.max_response_len {
                        return Err(Error::BufferTooSmall);
                    }
                    response_buf.extend_from_slice(&chunk[..n]);
                    if header_end.is_none() {
                        if let Some(pos) = find_slice(&response_buf, b"\r\n\r\n") {
                            header_end = Some(pos + 4);
                            content_length = parse_content_length(&response_buf[..pos])?;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        // --- Parse Response ---
        let body_start = header_end.ok_or(Error::ProtocolError)?;
        let header_str =
            core::str::from_utf8(&response_buf[..body_start - 4]).map_err(|_| Error::ProtocolError)?;
        let mut lines = header_str.lines();

        // Parse status line
        let status_line = lines.next().ok_or(Error::ProtocolError)?;
        let mut status_parts = status_line.splitn(3, ' ');
        status_parts.next(); // Skip HTTP version
        let status_code = status_parts
            .next()
            .ok_or(Error::ProtocolError)?
            .parse::<u16>()
            .map_err(|_| Error::ProtocolError)?;

        // Parse headers; the ones that do not fit are dropped.
        let mut headers: heapless::Vec<Header, MAX_HEADERS> = heapless::Vec::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if let Some(header) = Header::new(name.trim(), value.trim()) {
                let _ = headers.push(header);
            }
        }

        let mut body = response_buf.split_off(body_start);
        if let Some(len) = content_length {
            body.truncate(len);
        }

        Ok(Response {
            status_code,
            headers,
            body,
        })
    }
}

impl<N: Connect> HttpClient for Client<N> {
    fn request(&mut self, request: &Request<'_>) -> Result<Response, Error> {
        let remote = format!("{}:{}", request.host, request.port);
        let mut connection = self
            .network
            .connect(&remote, request.ca_cert, request.timeout_ms)?;
        debug!("http: {} {}{}", request.method.as_str(), request.host, request.path);
        let result = self.exchange(&mut connection, request);
        let _ = connection.close();
        result
    }
}

fn parse_content_length(header: &[u8]) -> Result<Option<usize>, Error> {
    let header = core::str::from_utf8(header).map_err(|_| Error::ProtocolError)?;
    for line in header.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                return value
                    .trim()
                    .parse::<usize>()
                    .map(Some)
                    .map_err(|_| Error::ProtocolError);
            }
        }
    }
    Ok(None)
}

fn find_slice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
