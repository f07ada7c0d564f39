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

use anyhow::Result;
use tempfile::tempdir;

use molino::{
    commits::{Commit, CommitStore, MemCommitStore},
    datum::{self, PipelineSpec},
    errors,
    global::{CancelFlag, ID},
    hashtree::{HashTree, TreeNode},
    objectstore::{self, ObjectStore, memory::MemStore, names},
    testing,
    worker::{ProcessRequest, Worker, WorkerPaths},
};

fn worker_for(store: &MemStore, pipeline: PipelineSpec, root: &Path) -> Worker {
    Worker::new(
        Arc::new(store.clone()),
        pipeline,
        WorkerPaths {
            input_root: root.join("pfs"),
            output_root: root.join("pfs-out"),
        },
    )
    .unwrap()
}

/// A pre-seeded tag short-circuits the run: no user process, no new
/// objects.
#[test]
fn test_cache_hit_short_circuits() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();
    let marker = temp.path().join("ran");

    let pipeline = testing::sh_pipeline(
        "cache-hit",
        &["in"],
        &format!("touch \"{}\"", marker.display()),
    );
    let data = vec![testing::seed_input(&store, "in", "x", b"input-bytes")?];

    // Seed the store with the exact tag this datum resolves to.
    let tag = datum::hash_datum(&data, &pipeline.transform)?.to_hex();
    let tree_bytes = testing::tree_with_file("seeded.txt", b"seeded").serialize();
    objectstore::put(&store, &names::tag(&tag), &tree_bytes)?;
    let objects_before = store.len();

    let worker = worker_for(&store, pipeline, temp.path());
    let response = worker.process(&ProcessRequest { data }, &CancelFlag::new())?;

    assert_eq!(response.tag, tag);
    assert!(response.cached);
    assert!(!marker.exists(), "the user binary must not run on a hit");
    assert_eq!(store.len(), objects_before, "no new objects on a hit");

    Ok(())
}

/// A transform producing nothing yields the canonical empty tree under the
/// fingerprint tag.
#[test]
fn test_empty_output() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();

    let pipeline = testing::sh_pipeline("empty", &["x"], "true");
    let data = vec![testing::seed_input(&store, "x", "f", b"h1")?];
    let expected_tag = datum::hash_datum(&data, &pipeline.transform)?.to_hex();

    let worker = worker_for(&store, pipeline, temp.path());
    let response = worker.process(&ProcessRequest { data }, &CancelFlag::new())?;

    assert_eq!(response.tag, expected_tag);
    let stored = objectstore::get(&store, &names::tag(&response.tag))?;
    assert_eq!(stored, HashTree::empty().serialize());

    Ok(())
}

/// A single 5-byte output file produces one block ref with the content
/// hash, and the second invocation never reaches the user binary.
#[test]
fn test_single_file_output_and_idempotence() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();
    let marker = temp.path().join("runs");

    let pipeline = testing::sh_pipeline(
        "single-file",
        &["in"],
        &format!(
            "printf hello > \"$MOLINO_OUTPUT_ROOT/a.txt\"; echo run >> \"{}\"",
            marker.display()
        ),
    );
    let data = vec![testing::seed_input(&store, "in", "x", b"input")?];

    let worker = worker_for(&store, pipeline, temp.path());
    let first = worker.process(&ProcessRequest { data: data.clone() }, &CancelFlag::new())?;
    let second = worker.process(&ProcessRequest { data }, &CancelFlag::new())?;

    assert_eq!(first.tag, second.tag);
    assert!(second.cached);
    assert_eq!(
        std::fs::read_to_string(&marker)?.lines().count(),
        1,
        "user process must run exactly once across both invocations"
    );

    let tree = HashTree::deserialize(&objectstore::get(&store, &names::tag(&first.tag))?)?;
    let Some(TreeNode::File { size, blocks }) = tree.get("a.txt") else {
        panic!("expected a file at a.txt");
    };
    assert_eq!(*size, 5);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].hash, ID::from_content(b"hello"));
    assert_eq!(blocks[0].length, 5);

    // The block body round-trips through its ref.
    assert_eq!(
        objectstore::get(&store, &names::block(&blocks[0].hash))?,
        b"hello"
    );

    Ok(())
}

/// Empty directories created by the user code survive into the tree.
#[test]
fn test_empty_directory_preserved() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();

    let pipeline = testing::sh_pipeline("mkdir", &["in"], "mkdir \"$MOLINO_OUTPUT_ROOT/empty\"");
    let worker = worker_for(&store, pipeline, temp.path());
    let response = worker.process(&ProcessRequest { data: Vec::new() }, &CancelFlag::new())?;

    let tree = HashTree::deserialize(&objectstore::get(&store, &names::tag(&response.tag))?)?;
    assert_eq!(tree.get("empty"), Some(&TreeNode::Directory));

    Ok(())
}

/// Exit code 3 with accept_return_codes=[3] is a success and tags an empty
/// output tree.
#[test]
fn test_accepted_return_code() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();

    let mut pipeline = testing::sh_pipeline("accept-3", &["in"], "exit 3");
    pipeline.transform.accept_return_codes = vec![3];

    let worker = worker_for(&store, pipeline, temp.path());
    let response = worker.process(&ProcessRequest { data: Vec::new() }, &CancelFlag::new())?;

    let stored = objectstore::get(&store, &names::tag(&response.tag))?;
    assert_eq!(stored, HashTree::empty().serialize());

    Ok(())
}

/// A failing user binary reports a user-code failure and leaves no cache
/// entry, even when it produced partial output first.
#[test]
fn test_user_failure_leaves_no_tag() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();

    let pipeline = testing::sh_pipeline(
        "fails",
        &["in"],
        "printf partial > \"$MOLINO_OUTPUT_ROOT/partial.txt\"; exit 1",
    );
    let data = vec![testing::seed_input(&store, "in", "x", b"input")?];
    let tag = datum::hash_datum(&data, &pipeline.transform)?.to_hex();

    let worker = worker_for(&store, pipeline, temp.path());
    let err = worker
        .process(&ProcessRequest { data: data.clone() }, &CancelFlag::new())
        .unwrap_err();

    assert!(errors::is_user_code_failure(&err));
    assert!(!store.exists(&names::tag(&tag))?);

    // The failure is transparent to a later fixed run: a following process
    // call re-runs the datum.
    let worker_ok = worker_for(
        &store,
        testing::sh_pipeline("fails", &["in"], "true"),
        temp.path(),
    );
    let response = worker_ok.process(&ProcessRequest { data }, &CancelFlag::new())?;
    assert!(!response.cached);

    Ok(())
}

/// Inputs are staged under `<input_root>/<input_name>/<path>` and readable
/// by the user code.
#[test]
fn test_inputs_are_visible_to_user_code() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();

    let pipeline = testing::sh_pipeline(
        "copy",
        &["left", "right"],
        "cat \"$MOLINO_INPUT_ROOT/left/a.txt\" \"$MOLINO_INPUT_ROOT/right/b.txt\" \
         > \"$MOLINO_OUTPUT_ROOT/joined.txt\"",
    );
    let data = vec![
        testing::seed_input(&store, "left", "a.txt", b"foo-")?,
        testing::seed_input(&store, "right", "b.txt", b"bar")?,
    ];

    let worker = worker_for(&store, pipeline, temp.path());
    let response = worker.process(&ProcessRequest { data }, &CancelFlag::new())?;

    let tree = HashTree::deserialize(&objectstore::get(&store, &names::tag(&response.tag))?)?;
    let Some(TreeNode::File { size, blocks }) = tree.get("joined.txt") else {
        panic!("expected joined.txt");
    };
    assert_eq!(*size, 7);
    assert_eq!(blocks[0].hash, ID::from_content(b"foo-bar"));

    Ok(())
}

/// With an output commit configured, each successful datum appends its
/// fileset to the commit's staging list.
#[test]
fn test_output_commit_accumulation() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();

    let pipeline = testing::sh_pipeline(
        "committing",
        &["in"],
        "cp \"$MOLINO_INPUT_ROOT/in/f\" \"$MOLINO_OUTPUT_ROOT/out-$(cat \"$MOLINO_INPUT_ROOT/in/f\")\"",
    );
    let commit = Commit::new("repo", "c1");

    let base = Worker::new(
        Arc::new(store.clone()),
        pipeline.clone(),
        WorkerPaths {
            input_root: temp.path().join("pfs"),
            output_root: temp.path().join("pfs-out"),
        },
    )?;
    let commits: Arc<MemCommitStore> = Arc::new(MemCommitStore::new(base.filesets().clone()));
    let worker = base.with_output_commit(commits.clone(), commit.clone());

    for content in [b"1".as_slice(), b"2".as_slice()] {
        let data = vec![testing::seed_input(&store, "in", "f", content)?];
        let response = worker.process(&ProcessRequest { data }, &CancelFlag::new())?;
        assert!(!response.cached);
    }

    // The commit's composed fileset carries both datum outputs.
    let composed = commits.get_fileset(&commit)?;
    let tree = worker.filesets().load(&composed)?;
    assert!(tree.get("out-1").is_some());
    assert!(tree.get("out-2").is_some());

    Ok(())
}

/// A cancelled request surfaces as a cancellation error and publishes
/// nothing.
#[test]
fn test_cancelled_process_publishes_nothing() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();

    let pipeline = testing::sh_pipeline("cancelled", &["in"], "true");
    let data = vec![testing::seed_input(&store, "in", "x", b"input")?];
    let tag = datum::hash_datum(&data, &pipeline.transform)?.to_hex();

    let cancel = CancelFlag::new();
    cancel.cancel();

    let worker = worker_for(&store, pipeline, temp.path());
    let err = worker.process(&ProcessRequest { data }, &cancel).unwrap_err();

    assert!(errors::is_cancelled(&err));
    assert!(!store.exists(&names::tag(&tag))?);

    Ok(())
}
