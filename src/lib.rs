#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod error;
pub mod live;
pub(crate) mod serde_helpers;
pub mod ws;

use crate::error::Error;

pub use crate::auth::Credential;
pub use crate::live::{Client, Subscription};

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable the bundled demo reads the bearer token from.
pub const TOKEN_VAR: &str = "SENSORHUB_TOKEN";

/// Environment variable the bundled demo reads the live endpoint from.
pub const ENDPOINT_VAR: &str = "SENSORHUB_LIVE_URL";
