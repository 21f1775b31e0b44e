// Consumer and delivery handles over lapin

use crate::error::{map, Op};
use async_trait::async_trait;
use courier_core::port::{BrokerError, Consumer, Delivery};
use futures::StreamExt;
use lapin::message;
use lapin::options::{BasicAckOptions, BasicCancelOptions, BasicRejectOptions};
use lapin::Channel;
use tracing::debug;

/// Lazy delivery stream for one consumer tag
pub struct AmqpConsumer {
    channel: Channel,
    tag: String,
    inner: lapin::Consumer,
    cancelled: bool,
}

impl AmqpConsumer {
    pub(crate) fn new(channel: Channel, tag: String, inner: lapin::Consumer) -> Self {
        Self {
            channel,
            tag,
            inner,
            cancelled: false,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

#[async_trait]
impl Consumer for AmqpConsumer {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, BrokerError>> {
        if self.cancelled {
            return None;
        }
        let item = self.inner.next().await?;
        Some(
            item.map(|delivery| Box::new(AmqpDelivery { inner: delivery }) as Box<dyn Delivery>)
                .map_err(|e| map(Op::Consume, e)),
        )
    }

    async fn cancel(&mut self) -> Result<(), BrokerError> {
        if self.cancelled {
            return Ok(());
        }
        self.cancelled = true;
        self.channel
            .basic_cancel(&self.tag, BasicCancelOptions::default())
            .await
            .map_err(|e| map(Op::Consume, e))?;
        debug!(tag = %self.tag, "Consumer cancelled");
        Ok(())
    }
}

/// One delivery awaiting ack or reject
pub struct AmqpDelivery {
    inner: message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.inner.data
    }

    fn delivery_tag(&self) -> u64 {
        self.inner.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.inner.redelivered
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.inner
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| map(Op::Ack, e))
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.inner
            .acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| map(Op::Ack, e))
    }
}
