//! # Beast Platform
//!
//! Platform adapters for the Beast agent. Each adapter converts one hosting
//! platform's invocation contract to and from the shared
//! [`beast_core::Request`]/[`beast_core::Response`] model:
//!
//! - [`CloudRunAdapter`]: streaming HTTP, probes always pass
//! - [`GkeAdapter`]: HTTP behind a service mesh, readiness tied to coordination
//! - [`CloudFunctionsAdapter`]: single-shot `(body, status_code)` invocations
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use beast_core::{AgentCore, AgentIdentity, PayloadLimits, Platform};
//! use beast_platform::{CloudRunAdapter, http, server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = Arc::new(AgentCore::new(Arc::new(AgentIdentity::new(Platform::CloudRun))));
//!     let adapter = Arc::new(CloudRunAdapter::new(core, PayloadLimits::default()));
//!     server::serve(http::router(adapter, Duration::from_secs(30)), 8080).await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod cloud_functions;
pub mod cloud_run;
pub mod gke;
pub mod http;
pub mod server;

pub use adapter::{PlatformAdapter, ProbeStatus, respond};
pub use cloud_functions::{CloudFunctionsAdapter, FunctionBody, FunctionReply, FunctionRequest};
pub use cloud_run::CloudRunAdapter;
pub use gke::GkeAdapter;
pub use http::{HttpReply, HttpRequest};
pub use server::{ServeError, serve, serve_with_shutdown, shutdown_signal};
