//! Backend session handling: request types, the HTTP transport and the
//! refreshing [`SessionClient`].

mod client;
mod gate;
mod request;
mod transport;

pub use client::{SessionClient, SessionStatus};
pub use request::{
    is_auth_flow_path, ApiRequest, ApiResponse, LOGIN_PATH, LOGOUT_PATH, ME_PATH, REFRESH_PATH,
};
pub use transport::{HttpTransport, Transport};

#[cfg(test)]
pub(crate) use client::tests::MockTransport;
