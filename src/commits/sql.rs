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

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use super::{Commit, CommitStore};
use crate::{
    errors,
    fileset::{FilesetStore, Ttl},
    global::ID,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS commit_diffs (
    repo_name  VARCHAR(250) NOT NULL,
    commit_id  VARCHAR(64)  NOT NULL,
    num        INTEGER      NOT NULL,
    fileset_id VARCHAR(64)  NOT NULL,
    PRIMARY KEY (repo_name, commit_id, num)
);
CREATE TABLE IF NOT EXISTS commit_totals (
    repo_name  VARCHAR(250) NOT NULL,
    commit_id  VARCHAR(64)  NOT NULL,
    fileset_id VARCHAR(64)  NOT NULL,
    PRIMARY KEY (repo_name, commit_id)
);
";

/// SQLite-backed commit store.
///
/// Staging lives in `commit_diffs`, ordered by a per-commit monotonically
/// increasing `num`; the finished total is the at-most-one `commit_totals`
/// row. Every trait operation runs in a single transaction.
pub struct SqlCommitStore {
    filesets: Arc<FilesetStore>,
    conn: Mutex<Connection>,
}

impl SqlCommitStore {
    pub fn open(filesets: Arc<FilesetStore>, path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Could not open commit database \'{}\'", path.display()))?;
        Self::with_connection(filesets, conn)
    }

    pub fn open_in_memory(filesets: Arc<FilesetStore>) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .with_context(|| "Could not open in-memory commit database")?;
        Self::with_connection(filesets, conn)
    }

    fn with_connection(filesets: Arc<FilesetStore>, conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .with_context(|| "Could not create commit tables")?;
        Ok(Self {
            filesets,
            conn: Mutex::new(conn),
        })
    }

    fn query_total(txn: &Transaction, commit: &Commit) -> Result<Option<ID>> {
        let hex: Option<String> = txn
            .query_row(
                "SELECT fileset_id FROM commit_totals
                 WHERE repo_name = ?1 AND commit_id = ?2",
                params![commit.repo, commit.id],
                |row| row.get(0),
            )
            .optional()?;

        match hex {
            Some(hex) => Ok(Some(ID::from_hex(&hex)?)),
            None => Ok(None),
        }
    }

    fn query_diffs(txn: &Transaction, commit: &Commit) -> Result<Vec<ID>> {
        let mut stmt = txn.prepare(
            "SELECT fileset_id FROM commit_diffs
             WHERE repo_name = ?1 AND commit_id = ?2
             ORDER BY num ASC",
        )?;
        let rows = stmt.query_map(params![commit.repo, commit.id], |row| {
            row.get::<_, String>(0)
        })?;

        let mut ids = Vec::new();
        for hex in rows {
            ids.push(ID::from_hex(&hex?)?);
        }
        Ok(ids)
    }

    /// The commit's current fileset within an open transaction: total if
    /// present, composition of the ordered diffs otherwise.
    fn current_fileset(&self, txn: &Transaction, commit: &Commit) -> Result<ID> {
        if let Some(total) = Self::query_total(txn, commit)? {
            return self.filesets.clone_ref(&total, Ttl::default_lease());
        }
        let diffs = Self::query_diffs(txn, commit)?;
        self.filesets.compose(&diffs, Ttl::default_lease())
    }

    fn store_total(&self, txn: &Transaction, commit: &Commit, id: &ID) -> Result<Option<ID>> {
        let previous = Self::query_total(txn, commit)?;
        txn.execute(
            "INSERT OR REPLACE INTO commit_totals (repo_name, commit_id, fileset_id)
             VALUES (?1, ?2, ?3)",
            params![commit.repo, commit.id, id.to_hex()],
        )?;
        Ok(previous)
    }
}

fn drop_ref_ignore_missing(filesets: &FilesetStore, id: &ID) -> Result<()> {
    match filesets.drop_ref(id) {
        Err(e) if errors::is_ignorable(&e) => Ok(()),
        other => other,
    }
}

impl CommitStore for SqlCommitStore {
    fn add_fileset(&self, commit: &Commit, id: &ID) -> Result<()> {
        let owned = self.filesets.clone_ref(id, Ttl::None)?;

        let res: Result<()> = (|| {
            let mut conn = self.conn.lock();
            let txn = conn.transaction()?;

            let num: i64 = txn.query_row(
                "SELECT COALESCE(MAX(num), -1) + 1 FROM commit_diffs
                 WHERE repo_name = ?1 AND commit_id = ?2",
                params![commit.repo, commit.id],
                |row| row.get(0),
            )?;
            txn.execute(
                "INSERT INTO commit_diffs (repo_name, commit_id, num, fileset_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![commit.repo, commit.id, num, owned.to_hex()],
            )?;

            txn.commit()?;
            Ok(())
        })();

        if res.is_err() {
            let _ = self.filesets.drop_ref(&owned);
        }
        res
    }

    fn get_fileset(&self, commit: &Commit) -> Result<ID> {
        let mut conn = self.conn.lock();
        let txn = conn.transaction()?;
        let id = self.current_fileset(&txn, commit)?;
        txn.commit()?;
        Ok(id)
    }

    fn set_fileset(&self, commit: &Commit, id: &ID) -> Result<()> {
        let owned = self.filesets.clone_ref(id, Ttl::None)?;

        let previous = {
            let mut conn = self.conn.lock();
            let txn = conn.transaction()?;
            let previous = self.store_total(&txn, commit, &owned)?;
            txn.commit()?;
            previous
        };

        if let Some(previous) = previous {
            drop_ref_ignore_missing(&self.filesets, &previous)?;
        }
        Ok(())
    }

    fn update_fileset(
        &self,
        commit: &Commit,
        modify: &mut dyn FnMut(ID) -> Result<ID>,
    ) -> Result<()> {
        // The connection lock serializes concurrent updates of the commit.
        let mut conn = self.conn.lock();
        let txn = conn.transaction()?;

        let current = self.current_fileset(&txn, commit)?;
        let modified = modify(current)?;
        let owned = self.filesets.clone_ref(&modified, Ttl::None)?;

        let previous = self.store_total(&txn, commit, &owned)?;
        txn.commit()?;

        if let Some(previous) = previous {
            drop_ref_ignore_missing(&self.filesets, &previous)?;
        }
        Ok(())
    }

    fn drop_filesets(&self, commit: &Commit) -> Result<()> {
        let refs = {
            let mut conn = self.conn.lock();
            let txn = conn.transaction()?;

            let mut refs = Self::query_diffs(&txn, commit)?;
            refs.extend(Self::query_total(&txn, commit)?);

            txn.execute(
                "DELETE FROM commit_diffs WHERE repo_name = ?1 AND commit_id = ?2",
                params![commit.repo, commit.id],
            )?;
            txn.execute(
                "DELETE FROM commit_totals WHERE repo_name = ?1 AND commit_id = ?2",
                params![commit.repo, commit.id],
            )?;

            txn.commit()?;
            refs
        };

        for id in refs {
            // A reference may already be gone if its lease expired.
            drop_ref_ignore_missing(&self.filesets, &id)?;
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

    fn new_stores() -> (Arc<FilesetStore>, SqlCommitStore) {
        let filesets = Arc::new(FilesetStore::new(Arc::new(MemStore::new())));
        let commits = SqlCommitStore::open_in_memory(filesets.clone()).unwrap();
        (filesets, commits)
    }

    #[test]
    fn test_read_your_writes() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let handle = filesets.create(&tree_with_file("a.txt", b"hello"), Ttl::None)?;
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
    fn test_total_supersedes_diffs_for_reads() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let staged = filesets.create(&tree_with_file("staged", b"1"), Ttl::None)?;
        commits.add_fileset(&commit, &staged)?;

        let total_tree = tree_with_file("total", b"2");
        let total = filesets.create(&total_tree, Ttl::None)?;
        commits.set_fileset(&commit, &total)?;

        // Later diffs are isolated from reads once a total exists.
        commits.add_fileset(&commit, &staged)?;
        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert_eq!(read, total_tree);

        Ok(())
    }

    #[test]
    fn test_update_fileset_composes_and_finishes() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let staged = filesets.create(&tree_with_file("keep", b"1"), Ttl::None)?;
        commits.add_fileset(&commit, &staged)?;

        let extra = filesets.create(&tree_with_file("extra", b"2"), Ttl::None)?;
        commits.update_fileset(&commit, &mut |current| {
            filesets.compose(&[current, extra.clone()], Ttl::default_lease())
        })?;

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert!(read.get("keep").is_some());
        assert!(read.get("extra").is_some());

        Ok(())
    }

    #[test]
    fn test_set_fileset_replaces_previous_total() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let first = filesets.create(&tree_with_file("v", b"1"), Ttl::None)?;
        let second_tree = tree_with_file("v", b"2");
        let second = filesets.create(&second_tree, Ttl::None)?;

        commits.set_fileset(&commit, &first)?;
        commits.set_fileset(&commit, &second)?;

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert_eq!(read, second_tree);

        Ok(())
    }

    #[test]
    fn test_drop_filesets_clears_rows() -> Result<()> {
        let (filesets, commits) = new_stores();
        let commit = Commit::new("repo", "c1");

        let handle = filesets.create(&tree_with_file("a", b"1"), Ttl::None)?;
        commits.add_fileset(&commit, &handle)?;
        commits.set_fileset(&commit, &handle)?;

        commits.drop_filesets(&commit)?;

        // The commit now reads as empty.
        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert!(read.is_empty());

        Ok(())
    }
}
