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

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};

use crate::global::{ID, defaults::DEFAULT_FILESET_TTL_SECS};

/// Lease lifetime for a fileset reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Retained until explicitly dropped.
    None,
    /// Eligible for reaping once the deadline passes.
    Deadline(DateTime<Utc>),
}

impl Ttl {
    pub fn in_seconds(secs: i64) -> Self {
        Ttl::Deadline(Utc::now() + TimeDelta::seconds(secs))
    }

    /// The lease handed out for composed and cached filesets.
    pub fn default_lease() -> Self {
        Self::in_seconds(DEFAULT_FILESET_TTL_SECS)
    }

    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Ttl::None => false,
            Ttl::Deadline(deadline) => *deadline <= now,
        }
    }
}

struct Lease {
    content: ID,
    ttl: Ttl,
}

/// Bookkeeping of live fileset references.
///
/// Each reference is a handle ID leasing one content ID. Content is eligible
/// for physical deletion only once no live handle points at it; the deletion
/// itself happens in [`super::FilesetStore::sweep`], not here.
#[derive(Default)]
pub(crate) struct RefTracker {
    refs: HashMap<ID, Lease>,
}

impl RefTracker {
    pub(crate) fn add(&mut self, handle: ID, content: ID, ttl: Ttl) {
        self.refs.insert(handle, Lease { content, ttl });
    }

    pub(crate) fn resolve(&self, handle: &ID) -> Option<&ID> {
        self.refs.get(handle).map(|lease| &lease.content)
    }

    pub(crate) fn contains(&self, handle: &ID) -> bool {
        self.refs.contains_key(handle)
    }

    /// Releases a handle, returning the content it leased.
    pub(crate) fn remove(&mut self, handle: &ID) -> Option<ID> {
        self.refs.remove(handle).map(|lease| lease.content)
    }

    /// Drops every lease whose deadline has passed. Returns how many were
    /// reaped.
    pub(crate) fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.refs.len();
        self.refs.retain(|_, lease| !lease.ttl.expired_at(now));
        before - self.refs.len()
    }

    /// Content IDs still held by at least one live handle.
    pub(crate) fn live_contents(&self) -> HashSet<ID> {
        self.refs
            .values()
            .map(|lease| lease.content.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.refs.len()
    }
}
