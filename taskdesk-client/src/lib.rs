//! Client core for the taskdesk marketing task tracker.
//!
//! Two pieces live here: [`SessionClient`], which talks to the backend and
//! transparently renews expired sessions with a single-flight refresh, and
//! [`WorkTimer`], a per-task stopwatch that survives restarts through a
//! [`DurableStore`].

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod session;
pub mod store;
pub mod timer;

pub use api::{CurrentUser, LoginCredentials, Task, User};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use ids::{TaskId, UserId};
pub use session::{ApiRequest, ApiResponse, HttpTransport, SessionClient, SessionStatus, Transport};
pub use store::{DurableStore, FileStore, MemoryStore, StoreError};
pub use timer::{TimeRecorder, TimerError, TimerPhase, TimerSnapshot, TimerState, WorkTimer};
