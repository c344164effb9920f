//! # ihc-client
//!
//! Client SDK for an IHC home-automation controller's SOAP API: a
//! cookie-jar HTTPS transport with certificate pinning, transient retry and
//! rate limiting; typed decoding of the controller's runtime value wire
//! format; and a supervised notification [`controller::Controller`] that
//! long-polls for value changes and fans them out to registered listeners.
//!
//! ## Basic usage
//!
//! ```no_run
//! use ihc_client::controller::Controller;
//! use ihc_client::transport::TlsMode;
//! use ihc_client::value::ResourceId;
//!
//! # async fn run() -> ihc_client::error::IhcResult<()> {
//! let controller = Controller::new(
//!     "https://ihc.example.invalid",
//!     "admin",
//!     "secret",
//!     TlsMode::Plain,
//! )?;
//! controller.authenticate().await?;
//! controller
//!     .add_notify_event(ResourceId(12345), |id, value| {
//!         println!("{id} changed to {value:?}");
//!     }, false)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `tracing` (default) - structured logging of transport retries, TLS
//!   pinning mismatches and the notification worker's lifecycle

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::broken_intra_doc_links)]
// Note: missing_docs is intentionally not enabled for internal structures

pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod soap;
pub mod tls;
pub mod transport;
pub mod value;
pub mod xml;

pub use config::{ControllerConfig, ControllerConfigBuilder};
pub use controller::{Controller, Listener};
pub use error::{IhcError, IhcResult};
pub use soap::SoapClient;
pub use transport::TlsMode;
pub use value::{Date, DateTime, ResourceId, ResourceValue, TimeOfDay};
