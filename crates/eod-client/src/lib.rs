//! HTTP client for the Agave v2 remote job platform.
//!
//! [`AgaveClient`] implements [`eod_engine::RemotePlatform`], so an engine
//! execution context can submit application jobs, move files to and from the
//! storage system, and poll status histories through it.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use eod_client::AgaveClient;
//! use eod_engine::{ExecutionContext, RemoteLayout, Workflow};
//!
//! # fn example(workflow: Arc<Workflow>) -> eod_client::Result<()> {
//! let client = AgaveClient::builder()
//!     .base_url("https://agave.iplantc.org")
//!     .storage_system("data.iplantcollaborative.org")
//!     .access_token("token")
//!     .build()?;
//!
//! let layout = RemoteLayout::new(client.storage_system(), "jdoe/my_workflow");
//! let ctx = ExecutionContext::new(workflow).with_remote(Arc::new(client), layout);
//! # let _ = ctx;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod token;
pub mod types;

pub use client::{AgaveClient, AgaveClientBuilder, DEFAULT_STORAGE_SYSTEM};
pub use error::{Error, Result};
pub use token::{Credentials, TokenManager};
