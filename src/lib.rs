//! # tuyalink - Tuya cloud device link
//!
//! Connects an embedded device to the Tuya IoT cloud and keeps it there:
//! binding and activation, broker session management, protocol 2.3 frame
//! sealing, data point reporting and request/response calls over MQTT. The
//! crate is `no_std` with `alloc`; everything platform specific comes in
//! through traits.
//!
//! ## Layers
//!
//! - [`iot`]: the device lifecycle state machine driven by
//!   [`iot::Client::yield_once`]
//! - [`service`]: the MQTT session manager, the MATOP correlator and the
//!   credential derivation
//! - [`cloud`]: the iot-dns endpoint lookup and the ATOP activation calls
//! - [`protocol`]: the 2.3 frame codec
//! - [`network`], [`storage`], [`system`]: the platform seams
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tuyalink = "0.1.0"
//! ```
//!
//! Implement [`iot::Platform`] for the device, then:
//!
//! ```rust,ignore
//! use tuyalink::config::Config;
//! use tuyalink::iot::Client;
//!
//! let config = Config::new("productkey", "uuid", "authkey0123456789abcdef");
//! let mut client = Client::init(config, platform, Some(Box::new(|event| {
//!     log::info!("event {}", event.name());
//! })))?;
//! client.start()?;
//! loop {
//!     client.yield_once()?;
//! }
//! ```
//!
//! ## Optional Features
//!
//! - `std`: enables the standard library and [`iot::token::TokenChannel`]
//! - `log` (default): route diagnostics through the `log` facade
//! - `defmt`: route diagnostics through `defmt`

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![doc(html_root_url = "https://docs.rs/tuyalink/")]

extern crate alloc;

#[macro_use]
mod fmt;

/// Cloud lookups and the ATOP API.
pub mod cloud;

/// Compile time limits, timeouts and the device configuration.
pub mod config;

/// Error type shared by the services.
pub mod error;

/// Device lifecycle.
pub mod iot;

/// Network abstraction layer: connection traits, MQTT and HTTP clients.
pub mod network;

/// Protocol 2.3 frames.
pub mod protocol;

/// MQTT session, request correlation and credentials.
pub mod service;

/// Key/value persistence.
pub mod storage;

/// Clock, entropy and crypto seams.
pub mod system;
