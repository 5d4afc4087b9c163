use reqwest::Method;

use taskflow_proto::notification::{Notification, NotificationId, UnreadCount};

use super::{ApiClient, ApiError};

impl ApiClient {
    /// `GET /notifications`, newest first.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.fetch(self.request(Method::GET, "notifications")?)
            .await
    }

    /// `PUT /notifications/:id/read`; returns the confirmed record.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn mark_notification_read(
        &self,
        id: &NotificationId,
    ) -> Result<Notification, ApiError> {
        self.fetch(self.request(Method::PUT, &format!("notifications/{id}/read"))?)
            .await
    }

    /// `PUT /notifications/read-all`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.execute(self.request(Method::PUT, "notifications/read-all")?)
            .await
    }

    /// `GET /notifications/unread/count`: the server's own count.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn unread_count(&self) -> Result<usize, ApiError> {
        let body: UnreadCount = self
            .fetch(self.request(Method::GET, "notifications/unread/count")?)
            .await?;
        Ok(body.count)
    }
}
