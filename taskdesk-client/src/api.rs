//! Typed calls on top of [`SessionClient`]. Payload shapes are owned by the
//! backend, so unknown fields are kept rather than rejected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::ClientError;
use crate::ids::{TaskId, UserId};
use crate::session::{
    ApiRequest, SessionClient, SessionStatus, Transport, LOGIN_PATH, LOGOUT_PATH, ME_PATH,
};
use crate::timer::TimeRecorder;

#[derive(Debug, Clone, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// The logged-in user, as returned by `GET /auth/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Recorded minutes.
    #[serde(default)]
    pub time_spent: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordTimeRequest {
    time_spent: u64,
}

impl<T: Transport> SessionClient<T> {
    /// POST /auth/login. Session cookies come back on the response.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<(), ClientError> {
        self.send_without_body(ApiRequest::post(LOGIN_PATH).with_json(credentials)?)
            .await?;
        info!(email = %credentials.email, "Logged in");
        self.set_status(SessionStatus::Active);
        Ok(())
    }

    /// GET /auth/me, the session probe.
    pub async fn me(&self) -> Result<CurrentUser, ClientError> {
        self.get_json(ApiRequest::get(ME_PATH)).await
    }

    /// POST /auth/logout, then tear the local session down. A failing logout
    /// call is logged; the local session ends regardless.
    pub async fn logout(&self) {
        if let Err(e) = self.send_without_body(ApiRequest::post(LOGOUT_PATH)).await {
            tracing::warn!(error = %e, "Logout call failed, clearing local session anyway");
        }
        self.end_session();
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, ClientError> {
        self.get_json(ApiRequest::get("/tasks")).await
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task, ClientError> {
        self.get_json(ApiRequest::get(format!("/tasks/{}", task_id)))
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ClientError> {
        self.get_json(ApiRequest::get("/users")).await
    }

    pub async fn get_settings(&self) -> Result<Map<String, Value>, ClientError> {
        self.get_json(ApiRequest::get("/settings")).await
    }

    /// PUT /tasks/{id}/time with the total minutes spent.
    pub async fn record_task_time(&self, task_id: &TaskId, minutes: u64) -> Result<(), ClientError> {
        let request = ApiRequest::put(format!("/tasks/{}/time", task_id))
            .with_json(&RecordTimeRequest { time_spent: minutes })?;
        self.send_without_body(request).await
    }
}

#[async_trait]
impl<T: Transport> TimeRecorder for SessionClient<T> {
    async fn record_time(&self, task_id: &TaskId, minutes: u64) -> Result<(), ClientError> {
        self.record_task_time(task_id, minutes).await
    }
}
