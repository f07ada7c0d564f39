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

pub mod memory;
pub mod sql;

pub use memory::MemCommitStore;
pub use sql::SqlCommitStore;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::global::ID;

/// Identifies a commit in a repo's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub repo: String,
    pub id: String,
}

impl Commit {
    pub fn new(repo: &str, id: &str) -> Self {
        Self {
            repo: repo.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.repo, self.id)
    }
}

/// Per-commit accumulation of fileset references.
///
/// While a commit is open, filesets append to an ordered staging list; the
/// append order is the merge order when the commit is read. Closing a commit
/// records a single finished total which supersedes staging for reads.
pub trait CommitStore: Send + Sync {
    /// Appends a fileset to the commit's staging list. The store takes its
    /// own indefinite reference; the caller keeps ownership of `id`.
    fn add_fileset(&self, commit: &Commit, id: &ID) -> Result<()>;

    /// Returns the commit's current fileset: the finished total if one is
    /// set, otherwise a fresh composition of the staging list. The returned
    /// reference carries the default lease and belongs to the caller.
    fn get_fileset(&self, commit: &Commit) -> Result<ID>;

    /// Records the commit's finished total, superseding staging for reads.
    fn set_fileset(&self, commit: &Commit, id: &ID) -> Result<()>;

    /// Reads the commit's current fileset, applies `modify` to it and stores
    /// the result as the finished total. The whole operation is atomic with
    /// respect to the other operations on the same commit.
    fn update_fileset(
        &self,
        commit: &Commit,
        modify: &mut dyn FnMut(ID) -> Result<ID>,
    ) -> Result<()>;

    /// Releases every staging and total reference held for the commit.
    /// Physical deletion of the underlying filesets is asynchronous.
    fn drop_filesets(&self, commit: &Commit) -> Result<()>;
}
