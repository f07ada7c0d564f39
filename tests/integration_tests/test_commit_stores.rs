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

use std::sync::Arc;

use anyhow::Result;

use molino::{
    commits::{Commit, CommitStore, MemCommitStore, SqlCommitStore},
    fileset::{FilesetStore, Ttl},
    objectstore::memory::MemStore,
    testing,
};

fn stores() -> Vec<(&'static str, Arc<FilesetStore>, Arc<dyn CommitStore>)> {
    let mem_filesets = Arc::new(FilesetStore::new(Arc::new(MemStore::new())));
    let mem: Arc<dyn CommitStore> = Arc::new(MemCommitStore::new(mem_filesets.clone()));

    let sql_filesets = Arc::new(FilesetStore::new(Arc::new(MemStore::new())));
    let sql: Arc<dyn CommitStore> =
        Arc::new(SqlCommitStore::open_in_memory(sql_filesets.clone()).unwrap());

    vec![("memory", mem_filesets, mem), ("sql", sql_filesets, sql)]
}

/// Both implementations compose the staging list in append order, with the
/// later fileset winning at overlapping leaves.
#[test]
fn test_staging_order_across_implementations() -> Result<()> {
    for (label, filesets, commits) in stores() {
        let commit = Commit::new("repo", "c1");

        let f_a = filesets.create(&testing::tree_with_file("p", b"from-a"), Ttl::None)?;
        let f_b = filesets.create(&testing::tree_with_file("p", b"from-b"), Ttl::None)?;
        commits.add_fileset(&commit, &f_a)?;
        commits.add_fileset(&commit, &f_b)?;

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert_eq!(
            read.get("p"),
            testing::tree_with_file("p", b"from-b").get("p"),
            "{}: staging must merge in append order",
            label
        );
    }
    Ok(())
}

/// Every path added to an open commit is readable back (read-your-writes).
#[test]
fn test_read_your_writes_across_implementations() -> Result<()> {
    for (label, filesets, commits) in stores() {
        let commit = Commit::new("repo", "c1");

        let handle = filesets.create(&testing::tree_with_file("dir/f.txt", b"x"), Ttl::None)?;
        commits.add_fileset(&commit, &handle)?;

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert!(
            read.get("dir/f.txt").is_some(),
            "{}: added path must be readable",
            label
        );
    }
    Ok(())
}

/// A finished total supersedes staging for reads in both implementations.
#[test]
fn test_finished_total_supersedes_staging() -> Result<()> {
    for (label, filesets, commits) in stores() {
        let commit = Commit::new("repo", "c1");

        let staged = filesets.create(&testing::tree_with_file("staged", b"1"), Ttl::None)?;
        commits.add_fileset(&commit, &staged)?;

        let total_tree = testing::tree_with_file("total", b"2");
        let total = filesets.create(&total_tree, Ttl::None)?;
        commits.set_fileset(&commit, &total)?;

        let read = filesets.load(&commits.get_fileset(&commit)?)?;
        assert_eq!(read, total_tree, "{}: reads must return the total", label);
        assert!(read.get("staged").is_none());
    }
    Ok(())
}

/// Dropping a commit releases its references; a sweep then reclaims the
/// content nothing else holds.
#[test]
fn test_drop_then_sweep_reclaims_content() -> Result<()> {
    for (label, filesets, commits) in stores() {
        let commit = Commit::new("repo", "c1");

        let handle = filesets.create(&testing::tree_with_file("a", b"1"), Ttl::None)?;
        commits.add_fileset(&commit, &handle)?;
        filesets.drop_ref(&handle)?;

        commits.drop_filesets(&commit)?;

        let deleted = filesets.sweep(chrono::Utc::now())?;
        assert_eq!(deleted, 1, "{}: dropped content must be swept", label);
        assert_eq!(filesets.ref_count(), 0, "{}", label);
    }
    Ok(())
}
