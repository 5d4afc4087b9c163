use reqwest::Method;

use taskflow_proto::api::InviteRequest;
use taskflow_proto::task::{MAX_TASK_TITLE_LENGTH, NewTask, SearchQuery, Task, TaskId, TaskPatch};

use super::{ApiClient, ApiError, InviteFailure, validate_email};

/// Filtered task listings served by `GET /tasks/filter/:name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    /// Tasks the user created.
    Created,
    /// Tasks assigned to the user.
    Assigned,
    /// Tasks past their due date.
    Overdue,
}

impl TaskFilter {
    const fn path(self) -> &'static str {
        match self {
            Self::Created => "tasks/filter/created",
            Self::Assigned => "tasks/filter/assigned",
            Self::Overdue => "tasks/filter/overdue",
        }
    }
}

fn validate_title(title: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::Validation("Title is required".to_string()));
    }
    let len = title.chars().count();
    if len > MAX_TASK_TITLE_LENGTH {
        return Err(ApiError::Validation(format!(
            "Title is {len} characters, maximum is {MAX_TASK_TITLE_LENGTH}"
        )));
    }
    Ok(())
}

impl ApiClient {
    /// `GET /tasks`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, ApiError> {
        self.fetch(self.request(Method::GET, "tasks")?).await
    }

    /// `GET /tasks/filter/created|assigned|overdue`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn filtered_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, ApiError> {
        self.fetch(self.request(Method::GET, filter.path())?).await
    }

    /// `GET /tasks/search` with the non-empty fields of `query`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn search_tasks(&self, query: &SearchQuery) -> Result<Vec<Task>, ApiError> {
        self.fetch(self.request(Method::GET, "tasks/search")?.query(query))
            .await
    }

    /// `GET /tasks/:id`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown id, or the backend's
    /// error.
    pub async fn get_task(&self, id: &TaskId) -> Result<Task, ApiError> {
        self.fetch(self.request(Method::GET, &format!("tasks/{id}"))?)
            .await
    }

    /// `POST /tasks`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] for an empty or overlong title, or
    /// the backend's error.
    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        validate_title(&task.title)?;
        self.fetch(self.request(Method::POST, "tasks")?.json(task))
            .await
    }

    /// `PUT /tasks/:id` with the present fields of `patch`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] for an empty or overlong title, or
    /// the backend's error.
    pub async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, ApiError> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        self.fetch(self.request(Method::PUT, &format!("tasks/{id}"))?.json(patch))
            .await
    }

    /// `DELETE /tasks/:id`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), ApiError> {
        self.execute(self.request(Method::DELETE, &format!("tasks/{id}"))?)
            .await
    }

    /// `POST /tasks/invite`: adds the account registered under `email` as a
    /// collaborator and returns the updated task.
    ///
    /// # Errors
    ///
    /// Returns [`InviteFailure::AlreadyCollaborator`] or
    /// [`InviteFailure::NoSuchUser`] when the backend says so, and
    /// [`InviteFailure::Other`] for anything else, including a malformed
    /// email.
    pub async fn invite_collaborator(
        &self,
        task_id: &TaskId,
        email: &str,
    ) -> Result<Task, InviteFailure> {
        validate_email(email)?;
        let email = email.trim();
        let body = InviteRequest {
            task_id: task_id.clone(),
            email: email.to_string(),
        };
        let request = self.request(Method::POST, "tasks/invite")?.json(&body);
        self.fetch(request)
            .await
            .map_err(|e| InviteFailure::classify(e, email))
    }
}
