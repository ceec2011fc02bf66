//! Multi-node ringcast harness.
//!
//! Runs any number of [`Node`]s on one [`InMemoryNetwork`] with ring-based
//! rendezvous resolution and a simulated clock. Every node gets its own
//! [`JobQueue`] with the standard maintenance and advertisement jobs.

use std::sync::Arc;

use parking_lot::Mutex;
use ringcast_core::hash::blake3_32;
use ringcast_core::{KeyPoint, Role};
use ringcast_crypto::signing::{Ed25519Signer, Signer};
use ringcast_node::advert::{InboundMessage, MessageHandler};
use ringcast_node::token::node_id_for;
use ringcast_node::{
    install_node_jobs, JobQueue, MessageProperty, Node, NodeConfig, NodeError, PublishOutcome,
};
use ringcast_transport::{InMemoryNetwork, Rendezvous, RingDirectory};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("no node at index {0}")]
    UnknownNode(usize),
    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Messages collected by a subscribing node's handler.
pub type Inbox = Arc<Mutex<Vec<InboundMessage>>>;

/// Deterministic identity secret of the `index`-th simulated node.
pub fn secret_for(index: usize) -> [u8; 32] {
    blake3_32(format!("ringcast-sim/node/{index}").as_bytes())
}

struct SimNode {
    node: Arc<Node>,
    jobs: JobQueue,
}

/// Nodes, network and clock of one simulation run.
pub struct Simulation {
    network: InMemoryNetwork,
    ring: Arc<RingDirectory>,
    nodes: Vec<SimNode>,
    now_ms: u64,
    frames_rejected: u64,
}

impl Simulation {
    /// Starts `node_count` nodes at time zero, all joined to one ring.
    pub fn new(config: NodeConfig, node_count: usize) -> Result<Self, SimError> {
        let network = InMemoryNetwork::new();
        let ring = Arc::new(RingDirectory::new());
        let mut nodes = Vec::with_capacity(node_count);
        for index in 0..node_count {
            let secret = secret_for(index);
            let id = node_id_for(&Ed25519Signer::from_secret(secret).public_key());
            let endpoint = network.endpoint(id);
            let resolver: Arc<dyn Rendezvous> = ring.clone();
            let node = Arc::new(Node::new(
                config.clone(),
                secret,
                Arc::new(endpoint),
                resolver,
            )?);
            ring.join(node.point(), node.id());
            let jobs = JobQueue::new(config.lock_timeout());
            install_node_jobs(&jobs, Arc::clone(&node), 0)?;
            nodes.push(SimNode { node, jobs });
        }
        Ok(Self {
            network,
            ring,
            nodes,
            now_ms: 0,
            frames_rejected: 0,
        })
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }

    pub fn ring(&self) -> &RingDirectory {
        &self.ring
    }

    /// Frames a node refused, malformed ones included.
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    pub fn node(&self, index: usize) -> Result<&Arc<Node>, SimError> {
        self.nodes
            .get(index)
            .map(|sim| &sim.node)
            .ok_or(SimError::UnknownNode(index))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.iter().map(|sim| &sim.node)
    }

    /// Index of the node holding `subject`'s ledger.
    pub fn rendezvous_index(&self, subject: &str) -> Option<usize> {
        let id = self.ring.resolve_rendezvous(&KeyPoint::from_string(subject))?;
        self.nodes.iter().position(|sim| sim.node.id() == id)
    }

    /// Registers a receiver interest whose messages land in the returned inbox.
    pub fn subscribe(
        &mut self,
        index: usize,
        subject: &str,
        property: MessageProperty,
    ) -> Result<Inbox, SimError> {
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&inbox);
        let handler: Arc<dyn MessageHandler> = Arc::new(move |message: &InboundMessage| {
            sink.lock().push(message.clone());
        });
        let now = self.now_ms;
        self.node(index)?
            .advertise_interest(subject, Role::Receiver, property, Some(handler), now)?;
        self.pump();
        Ok(inbox)
    }

    /// Registers a sender interest.
    pub fn announce(
        &mut self,
        index: usize,
        subject: &str,
        property: MessageProperty,
    ) -> Result<(), SimError> {
        let now = self.now_ms;
        self.node(index)?
            .advertise_interest(subject, Role::Sender, property, None, now)?;
        self.pump();
        Ok(())
    }

    pub fn publish(
        &mut self,
        index: usize,
        subject: &str,
        payload: &[u8],
    ) -> Result<PublishOutcome, SimError> {
        let now = self.now_ms;
        let outcome = self.node(index)?.publish(subject, payload, now)?;
        self.pump();
        Ok(outcome)
    }

    pub fn set_partitioned(&self, index: usize, partitioned: bool) -> Result<(), SimError> {
        let id = self.node(index)?.id().to_string();
        self.network.set_partitioned(&id, partitioned);
        Ok(())
    }

    /// Delivers queued frames until the network is quiet; returns how many
    /// were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let mut moved = false;
            for sim in &self.nodes {
                while let Some((from, bytes)) = self.network.recv(sim.node.id()) {
                    moved = true;
                    handled += 1;
                    if let Err(err) = sim.node.on_frame(&from, &bytes, self.now_ms) {
                        warn!(node = sim.node.id(), from, %err, "frame rejected");
                        self.frames_rejected += 1;
                    }
                }
            }
            if !moved {
                return handled;
            }
        }
    }

    /// Moves the clock forward by `delta_ms`, running every job that falls
    /// due on the way and pumping the network after each step.
    pub fn advance(&mut self, delta_ms: u64) -> Result<(), SimError> {
        let target = self.now_ms.saturating_add(delta_ms);
        loop {
            let mut next = None;
            for sim in &self.nodes {
                if let Some(due) = sim.jobs.next_due_ms()? {
                    next = Some(next.map_or(due, |n: u64| n.min(due)));
                }
            }
            match next {
                Some(due) if due <= target => {
                    self.now_ms = self.now_ms.max(due);
                    for sim in &self.nodes {
                        sim.jobs.run_due(self.now_ms)?;
                    }
                    self.pump();
                }
                _ => break,
            }
        }
        self.now_ms = target;
        debug!(now_ms = self.now_ms, "clock advanced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ringcast_node::NodeConfig;

    use super::{secret_for, Simulation};

    #[test]
    fn secrets_are_stable_and_distinct() {
        assert_eq!(secret_for(3), secret_for(3));
        assert_ne!(secret_for(3), secret_for(4));
    }

    #[test]
    fn every_node_joins_the_ring() {
        let sim = Simulation::new(NodeConfig::default(), 5).expect("sim");
        assert_eq!(sim.len(), 5);
        assert_eq!(sim.ring().len(), 5);
        let index = sim.rendezvous_index("weather").expect("rendezvous");
        assert!(index < 5);
        // every node resolves the same rendezvous
        assert_eq!(sim.rendezvous_index("weather"), Some(index));
    }

    #[test]
    fn advance_runs_jobs_and_lands_on_target() {
        let mut sim = Simulation::new(NodeConfig::default(), 2).expect("sim");
        sim.advance(1_000).expect("advance");
        assert_eq!(sim.now_ms(), 1_000);
        assert_eq!(sim.pump(), 0);
    }
}
