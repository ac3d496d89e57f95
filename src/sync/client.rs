use anyhow::{anyhow, bail, Context};
use futures::StreamExt;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header, HeaderValue},
        Message,
    },
};
use uuid::Uuid;

use crate::{
    auth::{AuthResponse, LoginRequest, SESSION_COOKIE},
    dto::{MessageResponse, SuccessResponse},
    notification::Notification,
    task::{CreateTaskRequest, Task, UpdateTaskRequest, UserTasksResponse},
    websocket::ServerEvent,
};
use super::store::{Change, TaskStore};

/// Keeps a [`TaskStore`] in step with the server: REST snapshots plus the
/// pushed event stream, with the viewer's own mutations echoed locally.
#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    store: Arc<Mutex<TaskStore>>,
}

impl SyncClient {
    pub fn new(base_url: &str, token: String, viewer: Uuid) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            store: Arc::new(Mutex::new(TaskStore::new(viewer))),
        }
    }

    /// Sign in with email and password and keep the issued session token.
    pub async fn login(base_url: &str, email: &str, password: &str) -> anyhow::Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        let response = reqwest::Client::new()
            .post(format!("{}/api/auth/login", base_url))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .context("login request failed")?;

        let response = error_for_status("POST /api/auth/login", response).await?;
        let token = response
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .ok_or_else(|| anyhow!("login response did not set the session cookie"))?;
        let body: AuthResponse = response.json().await?;

        tracing::info!("Signed in as {} ({})", body.user.email, body.user.id);
        Ok(Self::new(base_url, token, body.user.id))
    }

    pub fn store(&self) -> Arc<Mutex<TaskStore>> {
        self.store.clone()
    }

    /// Fetch tasks and notifications and merge them into the store.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let token = self.store.lock().await.begin_fetch();

        let (tasks, notifications) = tokio::try_join!(
            self.call::<UserTasksResponse>(Method::GET, "/api/tasks/me", None::<&()>),
            self.call::<Vec<Notification>>(Method::GET, "/api/notifications", None::<&()>),
        )?;

        let mut store = self.store.lock().await;
        let task_count = store.merge_tasks(token, tasks);
        let notification_count = store.merge_notifications(token, notifications);
        tracing::info!(
            "Refreshed: {} tasks, {} notifications ({} unread)",
            task_count,
            notification_count,
            store.unread_count()
        );
        Ok(())
    }

    /// Listen on the socket until it closes, applying every pushed event.
    /// The initial refresh runs concurrently so nothing pushed meanwhile is
    /// lost. Returns the close reason.
    pub async fn run(&self) -> anyhow::Result<String> {
        let mut request = ws_url(&self.base_url)?.into_client_request()?;
        request.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token))?,
        );

        let (mut stream, _) = connect_async(request)
            .await
            .context("websocket connection failed")?;
        tracing::info!("Socket connected");

        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.refresh().await {
                tracing::warn!("Initial refresh failed: {:#}", e);
            }
        });

        while let Some(message) = stream.next().await {
            match message? {
                Message::Text(frame) => match ServerEvent::from_frame(&frame) {
                    Ok(event) => self.apply(event).await,
                    Err(e) => tracing::warn!("Skipping unreadable frame: {}", e),
                },
                Message::Close(frame) => {
                    return Ok(frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string()));
                }
                _ => {}
            }
        }

        Ok("stream ended".to_string())
    }

    pub async fn create_task(&self, payload: &CreateTaskRequest) -> anyhow::Result<Task> {
        let task: Task = self.call(Method::POST, "/api/tasks", Some(payload)).await?;
        self.echo(self.store.lock().await.record_created(task.clone()));
        Ok(task)
    }

    pub async fn update_task(&self, task_id: Uuid, payload: &UpdateTaskRequest) -> anyhow::Result<Task> {
        let path = format!("/api/tasks/{}", task_id);
        let task: Task = self.call(Method::PATCH, &path, Some(payload)).await?;
        self.echo(self.store.lock().await.record_updated(task.clone()));
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: Uuid) -> anyhow::Result<()> {
        let path = format!("/api/tasks/{}", task_id);
        let _: MessageResponse = self.call(Method::DELETE, &path, None::<&()>).await?;
        self.echo(self.store.lock().await.record_deleted(task_id));
        Ok(())
    }

    pub async fn mark_notification_read(&self, notification_id: Uuid) -> anyhow::Result<()> {
        let path = format!("/api/notifications/{}/read", notification_id);
        let _: SuccessResponse = self.call(Method::PATCH, &path, None::<&()>).await?;
        self.store.lock().await.mark_read(notification_id);
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self) -> anyhow::Result<()> {
        let _: SuccessResponse = self
            .call(Method::PATCH, "/api/notifications/read-all", None::<&()>)
            .await?;
        self.store.lock().await.mark_all_read();
        Ok(())
    }

    async fn apply(&self, event: ServerEvent) {
        let name = event.name();
        let mut store = self.store.lock().await;
        match store.apply(event) {
            Change::Unchanged => tracing::debug!("{} left the store unchanged", name),
            change => tracing::info!(
                "{}: {:?} ({} tasks, {} unread)",
                name,
                change,
                store.tasks().len(),
                store.unread_count()
            ),
        }
    }

    fn echo(&self, change: Change) {
        tracing::debug!("Local echo: {:?}", change);
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl serde::Serialize>,
    ) -> anyhow::Result<T> {
        let mut request: RequestBuilder = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;
        let response = error_for_status(&format!("{} {}", method, path), response).await?;
        Ok(response.json().await?)
    }
}

/// Turn an error response into an `anyhow` error carrying the server message.
async fn error_for_status(
    what: &str,
    response: reqwest::Response,
) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    bail!("{} returned {}: {}", what, status.as_u16(), message)
}

fn ws_url(base_url: &str) -> anyhow::Result<String> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{}/api/ws", rest))
    } else if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{}/api/ws", rest))
    } else {
        bail!("base URL must start with http:// or https://, got {}", base_url)
    }
}
