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

#![cfg(unix)]

use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use molino::{
    global::CancelFlag,
    hashtree::{HashTree, TreeNode},
    objectstore::{self, memory::MemStore, names},
    testing,
    worker::{ProcessRequest, Worker, WorkerPaths},
};

/// A lazy input behaves exactly like an eager one from the user code's
/// point of view: the body materializes on first read through the overlay.
#[test]
#[ignore = "requires a FUSE-capable host"]
fn test_lazy_input_reads_through_overlay() -> Result<()> {
    let temp = tempdir()?;
    let store = MemStore::new();

    let mut pipeline = testing::sh_pipeline(
        "lazy",
        &["in"],
        "cp \"$MOLINO_INPUT_ROOT/in/f.txt\" \"$MOLINO_OUTPUT_ROOT/copy.txt\"",
    );
    pipeline.inputs[0].lazy = true;

    let data = vec![testing::seed_input(&store, "in", "f.txt", b"lazy-bytes")?];

    let worker = Worker::new(
        Arc::new(store.clone()),
        pipeline,
        WorkerPaths {
            input_root: temp.path().join("pfs"),
            output_root: temp.path().join("pfs-out"),
        },
    )?;
    let response = worker.process(&ProcessRequest { data }, &CancelFlag::new())?;

    let tree = HashTree::deserialize(&objectstore::get(&store, &names::tag(&response.tag))?)?;
    let Some(TreeNode::File { size, .. }) = tree.get("copy.txt") else {
        panic!("expected copy.txt in the output tree");
    };
    assert_eq!(*size, 10);

    Ok(())
}
