//! Node-wide event bus.

use crate::block::Block;
use crate::transaction::BlockTarget;
use kestrel_types::NodeId;
use tokio::sync::broadcast;

/// Events published by the consensus-coordination core.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// A new block was sealed and inserted on one chain.
    NewBlock { chain: BlockTarget, block: Block },
    /// An election round converged on a winner.
    ElectionDecided { round: u64, node_id: NodeId },
}

/// Broadcast fan-out for [`ChainEvent`]s. Subscribers are external; a
/// publish with no subscribers is a no-op.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChainEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(ChainEvent::ElectionDecided {
            round: 3,
            node_id: NodeId::new([1u8; 32]),
        });

        match rx.recv().await.unwrap() {
            ChainEvent::ElectionDecided { round, node_id } => {
                assert_eq!(round, 3);
                assert_eq!(node_id, NodeId::new([1u8; 32]));
            }
            other => panic!("expected ElectionDecided, got {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(ChainEvent::ElectionDecided {
            round: 1,
            node_id: NodeId::ZERO,
        });
    }
}
