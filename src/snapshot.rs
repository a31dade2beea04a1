//! The single current Reading, shared by the scheduler, the query endpoint
//! and the publish bridge.

use crate::error::{AppError, Result};
use crate::reading::Reading;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// A Reading together with its formatted JSON, produced in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub reading: Reading,
    pub json: String,
}

impl Snapshot {
    pub fn encode(reading: Reading) -> Result<Self> {
        let json = to_tab_indented_json(&reading)?;
        Ok(Self { reading, json })
    }
}

fn to_tab_indented_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| AppError::Internal(e.to_string()))
}

/// Replace-whole-value cell; every reader sees one complete Snapshot.
#[derive(Clone)]
pub struct SnapshotCache {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        let reading = Reading::default();
        let initial = Snapshot::encode(reading.clone()).unwrap_or(Snapshot {
            reading,
            json: "{}".to_string(),
        });
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Encode and install `reading`, waking every subscriber.
    pub fn replace(&self, reading: Reading) -> Result<Arc<Snapshot>> {
        let snapshot = Arc::new(Snapshot::encode(reading)?);
        self.tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}
