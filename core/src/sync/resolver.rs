use raidmesh_types::ConflictStrategy;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::VersionedState;
use crate::ids::NodeId;

/// An incoming write that lost the version check.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWrite {
    pub payload: Value,
    pub version: u64,
    pub node: NodeId,
}

/// Settles a recorded conflict into the payload and writer to keep. The
/// version bump is applied by the sync manager, not the resolver.
pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, local: &VersionedState, remote: &RemoteWrite) -> (Value, NodeId);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn name(&self) -> &'static str {
        "last_write_wins"
    }

    fn resolve(&self, _local: &VersionedState, remote: &RemoteWrite) -> (Value, NodeId) {
        (remote.payload.clone(), remote.node.clone())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FirstWriteWins;

impl ConflictResolver for FirstWriteWins {
    fn name(&self) -> &'static str {
        "first_write_wins"
    }

    fn resolve(&self, local: &VersionedState, _remote: &RemoteWrite) -> (Value, NodeId) {
        (local.data.clone(), local.last_writer.clone())
    }
}

/// Union of object keys; where both sides hold a number the larger wins,
/// anything else takes the remote value.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeMax;

impl ConflictResolver for MergeMax {
    fn name(&self) -> &'static str {
        "merge_max"
    }

    fn resolve(&self, local: &VersionedState, remote: &RemoteWrite) -> (Value, NodeId) {
        (merge_max(&local.data, &remote.payload), remote.node.clone())
    }
}

pub fn merge_max(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let mut merged: Map<String, Value> = l.clone();
            for (key, rv) in r {
                let value = match l.get(key) {
                    Some(lv) => merge_max(lv, rv),
                    None => rv.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(lf), Some(rf)) if lf > rf => local.clone(),
            _ => remote.clone(),
        },
        _ => remote.clone(),
    }
}

pub fn resolver_for(strategy: ConflictStrategy) -> Arc<dyn ConflictResolver> {
    match strategy {
        ConflictStrategy::LastWriteWins => Arc::new(LastWriteWins),
        ConflictStrategy::FirstWriteWins => Arc::new(FirstWriteWins),
        ConflictStrategy::MergeMax => Arc::new(MergeMax),
    }
}
