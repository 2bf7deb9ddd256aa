// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory [`PacketStore`] backed by a sharded concurrent map.

use crate::core::{
    error::Error,
    packets::types::{PacketTrackingId, PacketTrackingRecord},
};
use crate::primitives::PacketStore;
use dashmap::{mapref::entry::Entry, DashMap};

/// Records are only reachable through the entry API, so the mutator of an
/// upsert runs while its key is locked and readers see either the previous
/// or the committed record.
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<PacketTrackingId, PacketTrackingRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, ordered by identity.
    pub fn records(&self) -> Vec<PacketTrackingRecord> {
        let mut records: Vec<_> = self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

impl PacketStore for InMemoryStore {
    fn upsert<F>(&self, id: &PacketTrackingId, mutator: F) -> Result<PacketTrackingRecord, Error>
    where
        F: FnOnce(Option<PacketTrackingRecord>) -> Result<PacketTrackingRecord, Error>,
    {
        match self.records.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let updated = mutator(Some(entry.get().clone()))?;
                if updated.id != *id {
                    return Err(Error::Store(format!("mutator of {} returned record {}", id, updated.id)));
                }
                entry.insert(updated.clone());
                Ok(updated)
            }
            Entry::Vacant(entry) => {
                let created = mutator(None)?;
                if created.id != *id {
                    return Err(Error::Store(format!("mutator of {} returned record {}", id, created.id)));
                }
                entry.insert(created.clone());
                Ok(created)
            }
        }
    }

    fn get(&self, id: &PacketTrackingId) -> Option<PacketTrackingRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }
}
