//! Gateway over the FIFO work queue connecting intake and worker.

use async_trait::async_trait;
use tracing::info;

use crate::error::QueueError;

/// Ensure the work queue exists before a service binds to it.
///
/// Attempts to create the queue; an existing queue with matching attributes
/// makes the call a no-op, and a name conflict is ignored.
pub async fn ensure_queue(
    client: &aws_sdk_sqs::Client,
    queue_name: &str,
) -> Result<(), QueueError> {
    match client.create_queue().queue_name(queue_name).send().await {
        Ok(_) => {
            info!(queue = queue_name, "work queue ready");
            Ok(())
        }
        Err(err) => {
            let name_conflict = err
                .as_service_error()
                .map(|e| e.is_queue_name_exists())
                .unwrap_or(false);
            if name_conflict {
                info!(queue = queue_name, "work queue already exists");
                Ok(())
            } else {
                Err(QueueError::Transport(err.to_string()))
            }
        }
    }
}

/// A leased queue message. The receipt handle identifies the lease for
/// deletion and visibility extension.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Receive at most one message, leasing it for `visibility_seconds`.
    async fn receive(&self, visibility_seconds: i32)
        -> Result<Option<QueueMessage>, QueueError>;

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Extend the lease of a received message to `seconds` from now.
    async fn extend_visibility(
        &self,
        message: &QueueMessage,
        seconds: i32,
    ) -> Result<(), QueueError>;

    async fn send(&self, body: &str) -> Result<(), QueueError>;
}

#[async_trait]
impl<T: WorkQueue + ?Sized> WorkQueue for std::sync::Arc<T> {
    async fn receive(
        &self,
        visibility_seconds: i32,
    ) -> Result<Option<QueueMessage>, QueueError> {
        (**self).receive(visibility_seconds).await
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        (**self).delete(message).await
    }

    async fn extend_visibility(
        &self,
        message: &QueueMessage,
        seconds: i32,
    ) -> Result<(), QueueError> {
        (**self).extend_visibility(message, seconds).await
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        (**self).send(body).await
    }
}

/// SQS-backed implementation, bound to one queue URL.
#[derive(Clone)]
pub struct SqsWorkQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsWorkQueue {
    /// Resolves the queue URL by name and returns a bound gateway.
    pub async fn connect(
        client: aws_sdk_sqs::Client,
        queue_name: &str,
    ) -> Result<Self, QueueError> {
        let resp = client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;
        let queue_url = resp
            .queue_url()
            .ok_or_else(|| QueueError::Transport(format!("queue '{queue_name}' has no URL")))?
            .to_string();
        Ok(Self { client, queue_url })
    }
}

#[async_trait]
impl WorkQueue for SqsWorkQueue {
    async fn receive(
        &self,
        visibility_seconds: i32,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .visibility_timeout(visibility_seconds)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;
        let message = resp.messages().iter().next().and_then(|msg| {
            match (msg.body(), msg.receipt_handle()) {
                (Some(body), Some(handle)) => Some(QueueMessage {
                    body: body.to_string(),
                    receipt_handle: handle.to_string(),
                }),
                _ => None,
            }
        });
        Ok(message)
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn extend_visibility(
        &self,
        message: &QueueMessage,
        seconds: i32,
    ) -> Result<(), QueueError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .visibility_timeout(seconds)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryWorkQueue;

#[cfg(any(test, feature = "test-util"))]
mod memory {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{QueueMessage, WorkQueue};
    use crate::error::QueueError;

    /// In-memory queue for tests; records deletes and visibility extensions.
    #[derive(Default)]
    pub struct MemoryWorkQueue {
        pending: Mutex<VecDeque<String>>,
        deleted: Mutex<Vec<String>>,
        extended: Mutex<Vec<(String, i32)>>,
        next_handle: AtomicU64,
    }

    impl MemoryWorkQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_messages(&self) -> Vec<String> {
            self.pending.lock().unwrap().iter().cloned().collect()
        }

        pub fn deleted_handles(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }

        pub fn extensions(&self) -> Vec<(String, i32)> {
            self.extended.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkQueue for MemoryWorkQueue {
        async fn receive(
            &self,
            _visibility_seconds: i32,
        ) -> Result<Option<QueueMessage>, QueueError> {
            let body = self.pending.lock().unwrap().pop_front();
            Ok(body.map(|body| QueueMessage {
                body,
                receipt_handle: format!(
                    "handle-{}",
                    self.next_handle.fetch_add(1, Ordering::Relaxed)
                ),
            }))
        }

        async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
            self.deleted
                .lock()
                .unwrap()
                .push(message.receipt_handle.clone());
            Ok(())
        }

        async fn extend_visibility(
            &self,
            message: &QueueMessage,
            seconds: i32,
        ) -> Result<(), QueueError> {
            self.extended
                .lock()
                .unwrap()
                .push((message.receipt_handle.clone(), seconds));
            Ok(())
        }

        async fn send(&self, body: &str) -> Result<(), QueueError> {
            self.pending.lock().unwrap().push_back(body.to_string());
            Ok(())
        }
    }
}
