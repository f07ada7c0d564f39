// molino is a pipeline worker for content-addressed pipelines
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};

use crate::{
    global::ID,
    objectstore::{self, ObjectStore, names},
};

/// A cache for fetched input bodies with a Least Recently Used eviction
/// policy, so repeated reads of the same lazy input hit the store once.
pub(super) struct BlockCache {
    store: Arc<dyn ObjectStore>,

    /// Maximum number of cached bodies.
    capacity: usize,

    /// Body data by block ID, along with the last access timestamp.
    blocks: BTreeMap<ID, (Arc<Vec<u8>>, u64)>,

    /// Timestamps mapped back to IDs to find the LRU entry quickly.
    order_map: BTreeMap<u64, ID>,

    /// Monotonically increasing access counter.
    next_timestamp: u64,
}

impl BlockCache {
    pub(super) fn new(store: Arc<dyn ObjectStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            blocks: BTreeMap::new(),
            order_map: BTreeMap::new(),
            next_timestamp: 0,
        }
    }

    /// Returns the body of a block, fetching it from the store on a miss.
    /// A full cache evicts its least recently used entry.
    pub(super) fn load(&mut self, id: &ID) -> Result<Arc<Vec<u8>>> {
        let current_timestamp = self.next_timestamp;
        self.next_timestamp += 1;

        if let Some((body, timestamp)) = self.blocks.get_mut(id) {
            let old_timestamp = *timestamp;
            *timestamp = current_timestamp;
            let body = body.clone();

            self.order_map.remove(&old_timestamp);
            self.order_map.insert(current_timestamp, id.clone());
            return Ok(body);
        }

        if self.blocks.len() >= self.capacity {
            if let Some((_lru_timestamp, lru_id)) = self.order_map.pop_first() {
                self.blocks.remove(&lru_id);
            }
        }

        let body = Arc::new(
            objectstore::get(self.store.as_ref(), &names::block(id))
                .with_context(|| format!("Could not fetch lazy input body \'{}\'", id))?,
        );

        self.blocks
            .insert(id.clone(), (body.clone(), current_timestamp));
        self.order_map.insert(current_timestamp, id.clone());

        Ok(body)
    }

    #[allow(dead_code)]
    pub(super) fn len(&self) -> usize {
        self.blocks.len()
    }
}
