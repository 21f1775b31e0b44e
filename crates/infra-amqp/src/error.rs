// lapin error mapping
//
// Orphan rules keep `From<lapin::Error> for BrokerError` out of this crate, so
// every call site maps through `map` with the operation it was doing.

use courier_core::port::BrokerError;
use lapin::protocol::{AMQPError, AMQPErrorKind, AMQPSoftError};

/// Broker operation being performed when an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Connect,
    Channel,
    Declare,
    Publish,
    Consume,
    Ack,
    Close,
}

/// ACCESS_REFUSED (403) or RESOURCE_LOCKED (405): another consumer holds the queue
pub fn is_claim_refusal(err: &AMQPError) -> bool {
    matches!(
        err.kind(),
        AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED)
            | AMQPErrorKind::Soft(AMQPSoftError::RESOURCELOCKED)
    )
}

fn is_not_found(err: &AMQPError) -> bool {
    matches!(err.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND))
}

/// Translate a lapin error into the port's error type
///
/// Protocol refusals win over the operation so exclusive-consume conflicts
/// stay distinguishable wherever they surface.
pub(crate) fn map(op: Op, err: lapin::Error) -> BrokerError {
    if let lapin::Error::ProtocolError(amqp) = &err {
        if is_claim_refusal(amqp) {
            return BrokerError::AccessRefused(amqp.to_string());
        }
        if is_not_found(amqp) {
            return BrokerError::QueueNotFound(amqp.to_string());
        }
    }

    if matches!(err, lapin::Error::InvalidConnectionState(_)) {
        return BrokerError::Closed;
    }

    let message = err.to_string();
    match op {
        Op::Connect => BrokerError::Connection(message),
        Op::Publish => BrokerError::Publish(message),
        Op::Ack => BrokerError::Acknowledge(message),
        Op::Channel | Op::Declare | Op::Consume | Op::Close => BrokerError::Channel(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(kind: AMQPErrorKind) -> lapin::Error {
        lapin::Error::ProtocolError(AMQPError::new(kind, "refused".into()))
    }

    #[test]
    fn test_exclusive_refusals_map_to_access_refused() {
        for kind in [AMQPSoftError::ACCESSREFUSED, AMQPSoftError::RESOURCELOCKED] {
            let err = protocol(AMQPErrorKind::Soft(kind));
            assert!(matches!(
                map(Op::Consume, err),
                BrokerError::AccessRefused(_)
            ));
        }
    }

    #[test]
    fn test_not_found_maps_to_queue_not_found() {
        let err = protocol(AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND));
        assert!(matches!(
            map(Op::Declare, err),
            BrokerError::QueueNotFound(_)
        ));
    }

    #[test]
    fn test_other_errors_follow_operation() {
        let err = protocol(AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED));
        assert!(matches!(map(Op::Publish, err), BrokerError::Publish(_)));

        let err = protocol(AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED));
        assert!(matches!(map(Op::Channel, err), BrokerError::Channel(_)));
    }
}
