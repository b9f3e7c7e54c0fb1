//! iot-dns lookup of the region endpoint.

use alloc::format;
use alloc::string::String;

use base64ct::{Base64, Encoding};
use serde_json::Value;

use crate::cloud::endpoint::Endpoint;
use crate::config::HTTP_TIMEOUT_MS;
use crate::error::Error;
use crate::network::application::http::{Header, HttpClient, Method, Request};
use crate::protocol::json_quote;

/// Host of the lookup service.
pub const IOTDNS_HOST: &str = "h3.iot-dns.com";
/// Port of the lookup service.
pub const IOTDNS_PORT: u16 = 443;
/// Path of the url configuration query.
pub const URL_CONFIG_PATH: &str = "/v2/url_config";

const ATOP_PORT: u16 = 443;

/// Body of the url configuration query. Without `region` the service
/// picks one.
pub fn request_body(region: Option<&str>, env: &str) -> String {
    const CONFIG: &str = r#"{"config":[{"key":"httpsSelfUrl","need_ca":true},{"key":"mqttsSelfUrl","need_ca":true}]"#;
    match region {
        Some(region) => format!(r#"{},"region":{},"env":{}}}"#, CONFIG, json_quote(region), json_quote(env)),
        None => format!(r#"{},"env":{}}}"#, CONFIG, json_quote(env)),
    }
}

/// Parses the answer of the url configuration query.
pub fn decode_response(body: &[u8]) -> Result<Endpoint, Error> {
    let root: Value = serde_json::from_slice(body)?;
    let https = root
        .get("httpsSelfUrl")
        .and_then(|v| v.get("addr"))
        .and_then(Value::as_str)
        .ok_or(Error::JsonField)?;
    let mqtts = root
        .get("mqttsSelfUrl")
        .and_then(|v| v.get("addr"))
        .and_then(Value::as_str)
        .ok_or(Error::JsonField)?;
    let ca = root
        .get("caArr")
        .and_then(|v| v.get(0))
        .and_then(Value::as_str)
        .ok_or(Error::JsonField)?;
    debug!("iotdns: httpsSelfUrl {}", https);
    debug!("iotdns: mqttsSelfUrl {}", mqtts);

    let mut endpoint = Endpoint::default();

    let rest = https.strip_prefix("https://").ok_or(Error::JsonField)?;
    let (host, path) = match rest.find('/') {
        Some(index) => rest.split_at(index),
        None => (rest, ""),
    };
    endpoint.atop.host = host.try_into().map_err(|_| Error::JsonField)?;
    endpoint.atop.path = path.try_into().map_err(|_| Error::JsonField)?;
    endpoint.atop.port = ATOP_PORT;

    let (host, port) = mqtts.split_once(':').ok_or(Error::JsonField)?;
    endpoint.mqtt.host = host.try_into().map_err(|_| Error::JsonField)?;
    endpoint.mqtt.port = port.trim().parse().map_err(|_| Error::JsonField)?;

    let cert = Base64::decode_vec(ca).map_err(|_| {
        error!("iotdns: base64 decode error");
        Error::Com
    })?;
    endpoint.cert = Some(cert);
    Ok(endpoint)
}

/// Asks the lookup service for the endpoint of `region` (`None` for
/// automatic) in environment `env`.
pub fn cloud_endpoint_get<H: HttpClient>(
    http: &mut H,
    ca_cert: Option<&[u8]>,
    region: Option<&str>,
    env: &str,
) -> Result<Endpoint, Error> {
    if env.is_empty() {
        return Err(Error::InvalidParam);
    }
    let body = request_body(region, env);
    debug!("iotdns: post {}", body.as_str());

    let mut headers = heapless::Vec::new();
    if let Some(header) = Header::new("Content-Type", "application/x-www-form-urlencoded;charset=UTF-8") {
        let _ = headers.push(header);
    }
    let request = Request {
        method: Method::Post,
        host: IOTDNS_HOST,
        port: IOTDNS_PORT,
        path: URL_CONFIG_PATH,
        headers,
        body: Some(body.as_bytes()),
        ca_cert,
        timeout_ms: HTTP_TIMEOUT_MS,
    };
    let response = http.request(&request).inspect_err(|e| {
        error!("iotdns: request failed: {}", e);
    })?;
    if !(200..300).contains(&response.status_code) {
        error!("iotdns: http status {}", response.status_code);
        return Err(Error::Http(response.status_code));
    }

    let mut endpoint = decode_response(&response.body)?;
    if let Some(region) = region {
        endpoint.region = region.try_into().map_err(|_| Error::InvalidParam)?;
    }
    Ok(endpoint)
}
