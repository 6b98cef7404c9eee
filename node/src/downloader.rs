//! Downloader intake — bounded queues for inbound sync responses.
//!
//! The dispatch layer routes `BlockHeaders` / `BlockBodies` / `NodeData` /
//! `Receipts` frames here; the chain-sync subsystem drains the receiving
//! ends. When a queue is full the delivery is dropped and the peer will be
//! re-asked on the next sync cycle.

use kestrel_chain::{Header, Receipt, Transaction};
use tokio::sync::mpsc;

/// Capacity of each intake queue.
const INTAKE_CAPACITY: usize = 256;

/// Sender half, owned by the dispatch layer.
#[derive(Clone)]
pub struct Downloader {
    headers_tx: mpsc::Sender<(String, Vec<Header>)>,
    bodies_tx: mpsc::Sender<(String, Vec<Vec<Transaction>>)>,
    node_data_tx: mpsc::Sender<(String, Vec<Vec<u8>>)>,
    receipts_tx: mpsc::Sender<(String, Vec<Vec<Receipt>>)>,
}

/// Receiver half, drained by the chain-sync subsystem.
pub struct DownloadIntake {
    pub headers_rx: mpsc::Receiver<(String, Vec<Header>)>,
    pub bodies_rx: mpsc::Receiver<(String, Vec<Vec<Transaction>>)>,
    pub node_data_rx: mpsc::Receiver<(String, Vec<Vec<u8>>)>,
    pub receipts_rx: mpsc::Receiver<(String, Vec<Vec<Receipt>>)>,
}

impl Downloader {
    pub fn new() -> (Self, DownloadIntake) {
        let (headers_tx, headers_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (bodies_tx, bodies_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (node_data_tx, node_data_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (receipts_tx, receipts_rx) = mpsc::channel(INTAKE_CAPACITY);
        (
            Self {
                headers_tx,
                bodies_tx,
                node_data_tx,
                receipts_tx,
            },
            DownloadIntake {
                headers_rx,
                bodies_rx,
                node_data_rx,
                receipts_rx,
            },
        )
    }

    pub fn deliver_headers(&self, peer: &str, headers: Vec<Header>) {
        if self
            .headers_tx
            .try_send((peer.to_string(), headers))
            .is_err()
        {
            tracing::debug!(peer, "header intake full, dropping delivery");
        }
    }

    pub fn deliver_bodies(&self, peer: &str, bodies: Vec<Vec<Transaction>>) {
        if self.bodies_tx.try_send((peer.to_string(), bodies)).is_err() {
            tracing::debug!(peer, "body intake full, dropping delivery");
        }
    }

    pub fn deliver_node_data(&self, peer: &str, items: Vec<Vec<u8>>) {
        if self
            .node_data_tx
            .try_send((peer.to_string(), items))
            .is_err()
        {
            tracing::debug!(peer, "node-data intake full, dropping delivery");
        }
    }

    pub fn deliver_receipts(&self, peer: &str, receipts: Vec<Vec<Receipt>>) {
        if self
            .receipts_tx
            .try_send((peer.to_string(), receipts))
            .is_err()
        {
            tracing::debug!(peer, "receipt intake full, dropping delivery");
        }
    }
}
