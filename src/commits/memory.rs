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

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex;

use super::{Commit, CommitStore};
use crate::{
    errors::{self, EngineError},
    fileset::{FilesetStore, Ttl},
    global::ID,
};

type CommitKey = (String, String);

#[derive(Default)]
struct State {
    staging: HashMap<CommitKey, Vec<ID>>,
    finished: HashMap<CommitKey, ID>,
}

/// In-memory commit store for tests and single-node setups.
///
/// One mutex guards both maps, which makes every operation linearizable per
/// commit (and across commits, which is stricter than required).
pub struct MemCommitStore {
    filesets: Arc<FilesetStore>,
    state: Mutex<State>,
}

impl MemCommitStore {
    pub fn new(filesets: Arc<FilesetStore>) -> Self {
        Self {
            filesets,
            state: Mutex::new(State::default()),
        }
    }
}

fn key(commit: &Commit) -> CommitKey {
    (commit.repo.clone(), commit.id.clone())
}

impl CommitStore for MemCommitStore {
    fn add_fileset(&self, commit: &Commit, id: &ID) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished.contains_key(&key(commit)) {
            return Err(EngineError::InvariantViolation(format!(
                "commit \'{}\' is finished",
                commit
            ))
            .into());
        }

        let owned = self.filesets.clone_ref(id, Ttl::None)?;
        state.staging.entry(key(commit)).or_default().push(owned);
        Ok(())
    }

    fn get_fileset(&self, commit: &Commit) -> Result<ID> {
        let state = self.state.lock();

        if let Some(total) = state.finished.get(&key(commit)) {
            return self.filesets.clone_ref(total, Ttl::default_lease());
        }

        let staged = state
            .staging
            .get(&key(commit))
            .cloned()
            .unwrap_or_default();
        self.filesets.compose(&staged, Ttl::default_lease())
    }

    fn set_fileset(&self, commit: &Commit, id: &ID) -> Result<()> {
        let mut state = self.state.lock();

        let owned = self.filesets.clone_ref(id, Ttl::None)?;
        if let Some(previous) = state.finished.insert(key(commit), owned) {
            self.filesets.drop_ref(&previous)?;
        }
        Ok(())
    }

    fn update_fileset(
        &self,
        commit: &Commit,
        modify: &mut dyn FnMut(ID) -> Result<ID>,
    ) -> Result<()> {
        // The state lock is held across the closure so concurrent updates of
        // the same commit cannot interleave.
        let mut state = self.state.lock();

        let current = match state.finished.get(&key(commit)) {
            Some(total) => self.filesets.clone_ref(total, Ttl::default_lease())?,
            None => {
                let staged = state
                    .staging
                    .get(&key(commit))
                    .cloned()
                    .unwrap_or_default();
                self.filesets.compose(&staged, Ttl::default_lease())?
            }
        };

        let modified = modify(current)?;

        let owned = self.filesets.clone_ref(&modified, Ttl::None)?;
        if let Some(previous) = state.finished.insert(key(commit), owned) {
            self.filesets.drop_ref(&previous)?;
        }
        Ok(())
    }

    fn drop_filesets(&self, commit: &Commit) -> Result<()> {
        let mut state = self.state.lock();

        let mut refs = state.staging.remove(&key(commit)).unwrap_or_default();
        refs.extend(state.finished.remove(&key(commit)));

        for id in refs {
            // A reference may already be gone if its lease expired.
            match self.filesets.drop_ref(&id) {
                Err(e) if errors::is_ignorable(&e) => {}
                other => other?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        hashtree::{BlockRef, HashTree, TreeBuilder},
        objectstore::memory::MemStore,
    };

    fn tree_with_file(path: &str, data: &[u8]) -> HashTree {
        let mut builder = TreeBuilder::new();
        builder
            .put_file(
                path,
                data.len() as u64,
                vec![BlockRef {
                    hash: ID::from_content(data),
                    offset: 0,
                    length: data.len() as u64,
                }],
            )
            .unwrap();
        builder.finish()
    }

    fn new_stores() -> (Arc<FilesetStore>, MemCommitStore) {
        let filesets = Arc::new(FilesetStore::new(Arc::new(MemStore::new())));
        let commits = MemCommitStore::new(filesets.clone());
        (filesets, commits)
    }

    #[test]
    fn test_read_your_writes() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let tree = tree_with_file("a.txt", b"hello");
        let handle = filesets.create(&tree, Ttl::None)?;
        commits.add_fileset(&commit, &handle)?;

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert!(read.get("a.txt").is_some());

        Ok(())
    }

    #[test]
    fn test_staging_merge_order() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let f1 = filesets.create(&tree_with_file("p", b"first"), Ttl::None)?;
        let f2 = filesets.create(&tree_with_file("p", b"second"), Ttl::None)?;
        commits.add_fileset(&commit, &f1)?;
        commits.add_fileset(&commit, &f2)?;

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert_eq!(read.get("p"), tree_with_file("p", b"second").get("p"));

        Ok(())
    }

    #[test]
    fn test_get_on_empty_commit_is_an_empty_fileset() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "never-written");

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert!(read.is_empty());

        Ok(())
    }

    #[test]
    fn test_finished_supersedes_staging() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let staged = filesets.create(&tree_with_file("staged", b"1"), Ttl::None)?;
        commits.add_fileset(&commit, &staged)?;

        let total_tree = tree_with_file("total", b"2");
        let total = filesets.create(&total_tree, Ttl::None)?;
        commits.set_fileset(&commit, &total)?;

        // Reads return the total.
        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert_eq!(read, total_tree);

        // Adding to a finished commit fails.
        let err = commits.add_fileset(&commit, &staged).unwrap_err();
        assert!(errors::is_invariant_violation(&err));

        Ok(())
    }

    #[test]
    fn test_update_fileset_composes_and_finishes() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let staged = filesets.create(&tree_with_file("keep", b"1"), Ttl::None)?;
        commits.add_fileset(&commit, &staged)?;

        let extra_tree = tree_with_file("extra", b"2");
        let extra = filesets.create(&extra_tree, Ttl::None)?;

        commits.update_fileset(&commit, &mut |current| {
            filesets.compose(&[current, extra.clone()], Ttl::default_lease())
        })?;

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert!(read.get("keep").is_some());
        assert!(read.get("extra").is_some());

        Ok(())
    }

    #[test]
    fn test_drop_filesets_releases_references() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let handle = filesets.create(&tree_with_file("a", b"1"), Ttl::None)?;
        commits.add_fileset(&commit, &handle)?;
        filesets.drop_ref(&handle)?;

        commits.drop_filesets(&commit)?;

        // Only references created by this test remain; sweeping now deletes
        // the commit's content.
        let deleted = filesets.sweep(chrono::Utc::now())?;
        assert_eq!(deleted, 1);

        Ok(())
    }
}
