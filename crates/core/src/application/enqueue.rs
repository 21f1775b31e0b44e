// Enqueue Use Case - put a task on a tenant queue and tell the manager about it

use crate::domain::{Payload, PendingTaskMessage, QueueName, TaskMessage, TaskType};
use crate::error::Result;
use crate::port::Broker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub tenant_queue: String,
    pub task: String,
    #[serde(default)]
    pub payload: Payload,
}

/// What was published
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueReceipt {
    pub tenant_queue: QueueName,
    pub task: TaskType,
}

/// Task publisher
pub struct TaskPublisher {
    broker: Arc<dyn Broker>,
    pending_queue: QueueName,
}

impl TaskPublisher {
    pub fn new(broker: Arc<dyn Broker>, pending_queue: QueueName) -> Self {
        Self {
            broker,
            pending_queue,
        }
    }

    /// Publish the task message, then the pending-task notice
    ///
    /// The tenant queue is declared first so the message is never dropped by
    /// the default exchange.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<EnqueueReceipt> {
        let tenant_queue = QueueName::new(req.tenant_queue)?;
        let task = TaskType::parse(req.task)?;

        let message = TaskMessage::new(task.clone(), req.payload);
        self.broker.declare(&tenant_queue).await?;
        self.broker
            .publish(&tenant_queue, &message.to_vec()?)
            .await?;

        let notice = PendingTaskMessage::new(tenant_queue.clone(), Some(task.clone()));
        self.broker.declare(&self.pending_queue).await?;
        self.broker
            .publish(&self.pending_queue, &notice.to_vec()?)
            .await?;

        info!(queue = %tenant_queue, task = %task, "Task enqueued");

        Ok(EnqueueReceipt { tenant_queue, task })
    }
}

/// Conventional tenant queue name: `<prefix>.<tenant_id>.<shop_domain>`
pub fn tenant_queue_name(prefix: &str, tenant_id: &str, shop_domain: &str) -> Result<QueueName> {
    Ok(QueueName::for_tenant(prefix, tenant_id, shop_domain)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use crate::error::AppError;
    use crate::port::broker::mocks::InMemoryBroker;
    use serde_json::json;

    const PENDING: &str = "Shopify.PendingTasks";

    fn publisher(broker: &InMemoryBroker) -> TaskPublisher {
        TaskPublisher::new(
            Arc::new(broker.session()),
            QueueName::new(PENDING).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_enqueue_publishes_task_then_notice() {
        let broker = InMemoryBroker::new();
        let mut payload = Payload::new();
        payload.insert("fba_item_id".to_string(), json!("B00X"));

        let receipt = publisher(&broker)
            .enqueue(EnqueueRequest {
                tenant_queue: "Shopify.9.acme".to_string(),
                task: "Reprice".to_string(),
                payload,
            })
            .await
            .unwrap();

        assert_eq!(receipt.task.as_str(), "Reprice");

        let tasks = broker.ready_bodies("Shopify.9.acme");
        assert_eq!(tasks.len(), 1);
        let task: serde_json::Value = serde_json::from_slice(&tasks[0]).unwrap();
        assert_eq!(task, json!({"task": "Reprice", "fba_item_id": "B00X"}));

        let notices = broker.ready_bodies(PENDING);
        let notice: serde_json::Value = serde_json::from_slice(&notices[0]).unwrap();
        assert_eq!(notice, json!({"target": "Shopify.9.acme", "task": "Reprice"}));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_input() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker);

        let bad_queue = publisher
            .enqueue(EnqueueRequest {
                tenant_queue: String::new(),
                task: "List".to_string(),
                payload: Payload::new(),
            })
            .await;
        assert!(matches!(
            bad_queue,
            Err(AppError::Domain(DomainError::InvalidQueueName(_)))
        ));

        let bad_task = publisher
            .enqueue(EnqueueRequest {
                tenant_queue: "Shopify.9.acme".to_string(),
                task: " ".to_string(),
                payload: Payload::new(),
            })
            .await;
        assert!(matches!(
            bad_task,
            Err(AppError::Domain(DomainError::InvalidTaskType(_)))
        ));
        assert!(broker.events().is_empty());
    }

    #[test]
    fn test_tenant_queue_name_strips_shop_suffix() {
        let name = tenant_queue_name("Shopify", "17", "acme.myshopify.com").unwrap();
        assert_eq!(name.as_str(), "Shopify.17.acme");
    }
}
