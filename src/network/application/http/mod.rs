//! HTTP/1.1 request primitive.
//!
//! The iot-dns lookup and the ATOP activation call each need exactly one
//! blocking request/response exchange over TLS. [`HttpClient`] is that
//! exchange; [`client::Client`] implements it over any
//! [`Connect`](crate::network::Connect), opening one connection per request.
//!
//! ```rust,no_run
//! use tuyalink::network::application::http::{Header, HttpClient, Method, Request};
//!
//! fn status<H: HttpClient>(http: &mut H) -> Option<u16> {
//!     let mut headers = heapless::Vec::new();
//!     headers.push(Header::new("Accept", "application/json")?).ok()?;
//!     let request = Request {
//!         method: Method::Get,
//!         host: "example.com",
//!         port: 443,
//!         path: "/api/status",
//!         headers,
//!         body: None,
//!         ca_cert: None,
//!         timeout_ms: 5000,
//!     };
//!     http.request(&request).ok().map(|r| r.status_code)
//! }
//! ```
#![allow(missing_docs)]

use alloc::vec::Vec;
use heapless::String;

use crate::network::error::Error;

/// HTTP client implementation over [`Connect`](crate::network::Connect).
pub mod client;

pub use client::Client;

/// Maximum number of headers carried by a request or response.
pub const MAX_HEADERS: usize = 16;
const MAX_HEADER_NAME_LEN: usize = 64;
const MAX_HEADER_VALUE_LEN: usize = 256;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// The method token of the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A single header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String<MAX_HEADER_NAME_LEN>,
    pub value: String<MAX_HEADER_VALUE_LEN>,
}

impl Header {
    /// Builds a header, failing when either part exceeds its capacity.
    pub fn new(name: &str, value: &str) -> Option<Self> {
        Some(Self {
            name: String::try_from(name).ok()?,
            value: String::try_from(value).ok()?,
        })
    }
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub method: Method,
    /// Server host name, also sent as the `Host` header.
    pub host: &'a str,
    pub port: u16,
    /// Request target, starting with `/`.
    pub path: &'a str,
    pub headers: heapless::Vec<Header, MAX_HEADERS>,
    pub body: Option<&'a [u8]>,
    /// DER encoded CA certificate; `None` for plain TCP.
    pub ca_cert: Option<&'a [u8]>,
    pub timeout_ms: u32,
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub headers: heapless::Vec<Header, MAX_HEADERS>,
    pub body: Vec<u8>,
}

/// Performs one blocking request/response exchange.
pub trait HttpClient {
    /// Sends `request` and waits for the complete response.
    fn request(&mut self, request: &Request<'_>) -> Result<Response, Error>;
}
