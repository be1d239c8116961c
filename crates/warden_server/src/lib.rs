//! WARDEN Server
//!
//! HTTP endpoint that authenticates requests and runs the policy evaluation
//! command out of process, under a deadline.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod dispatch;

pub use api::{ApiResponse, ApiServer, AppState, ServerConfig};
pub use auth::{AuthError, AuthToken, Authenticator};
pub use dispatch::{
    CommandDispatcher, DispatchError, DispatchRequest, DispatchResult, DispatchStatus,
    DispatcherConfig, Language,
};
