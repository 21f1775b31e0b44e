// Broker port over one lapin connection + channel

use crate::consumer::AmqpConsumer;
use crate::error::{map, Op};
use async_trait::async_trait;
use courier_core::domain::QueueName;
use courier_core::port::{Broker, BrokerError, Claim, ConsumeOptions, QueueStats};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection};
use tracing::{debug, info};

/// Persistent delivery mode
const PERSISTENT: u8 = 2;

/// Reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// AMQP broker adapter
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    pub(crate) fn new(connection: Connection, channel: Channel) -> Self {
        Self {
            connection,
            channel,
        }
    }

    fn consumer_tag(queue: &QueueName) -> String {
        format!("courier.{}.{}", queue, uuid::Uuid::new_v4().simple())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare(&self, queue: &QueueName) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| map(Op::Declare, e))?;
        debug!(queue = %queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, routing_key: &QueueName, body: &[u8]) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        self.channel
            .basic_publish(
                "",
                routing_key.as_str(),
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| map(Op::Publish, e))?
            .await
            .map_err(|e| map(Op::Publish, e))?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueName,
        options: ConsumeOptions,
    ) -> Result<Claim, BrokerError> {
        if let Some(prefetch) = options.prefetch {
            self.channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| map(Op::Consume, e))?;
        }

        let tag = Self::consumer_tag(queue);
        let started = self
            .channel
            .basic_consume(
                queue.as_str(),
                &tag,
                BasicConsumeOptions {
                    exclusive: options.exclusive,
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await;

        match started {
            Ok(consumer) => {
                info!(queue = %queue, tag = %tag, exclusive = options.exclusive, "Consumer started");
                Ok(Claim::Granted(Box::new(AmqpConsumer::new(
                    self.channel.clone(),
                    tag,
                    consumer,
                ))))
            }
            Err(e) => match map(Op::Consume, e) {
                BrokerError::AccessRefused(reason) => Ok(Claim::Denied { reason }),
                other => Err(other),
            },
        }
    }

    async fn queue_stats(&self, queue: &QueueName) -> Result<QueueStats, BrokerError> {
        let declared = self
            .channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| map(Op::Declare, e))?;

        Ok(QueueStats {
            messages: declared.message_count(),
            consumers: declared.consumer_count(),
        })
    }

    async fn close_channel(&self) -> Result<(), BrokerError> {
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| map(Op::Close, e))
    }

    async fn close_connection(&self) -> Result<(), BrokerError> {
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| map(Op::Close, e))
    }
}
