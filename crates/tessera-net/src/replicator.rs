//! Replicator targets and their health.

use crate::peer::PeerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tessera_db::ReplicatorRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicatorStatus {
    Active,
    /// The last push failed after every retry.
    Inactive,
}

/// A peer that receives every commit of its collections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replicator {
    pub peer: PeerId,
    pub collections: BTreeSet<String>,
    pub status: ReplicatorStatus,
    pub last_status_change: DateTime<Utc>,
}

impl Replicator {
    pub fn new(peer: PeerId) -> Self {
        Replicator {
            peer,
            collections: BTreeSet::new(),
            status: ReplicatorStatus::Active,
            last_status_change: Utc::now(),
        }
    }

    pub fn from_record(record: ReplicatorRecord) -> Self {
        Replicator {
            collections: record.collections,
            ..Replicator::new(PeerId::new(record.peer))
        }
    }

    pub fn to_record(&self) -> ReplicatorRecord {
        ReplicatorRecord {
            peer: self.peer.0.clone(),
            collections: self.collections.clone(),
        }
    }

    /// Update the status; the timestamp only moves when it changes.
    pub fn mark(&mut self, status: ReplicatorStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.last_status_change = Utc::now();
        true
    }
}
