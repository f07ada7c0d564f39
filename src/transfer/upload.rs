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

use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use fastcdc::v2020::{Normalization, StreamCDC};
use parking_lot::Mutex;

use crate::{
    global::{CancelFlag, ID, defaults},
    hashtree::{BlockRef, HashTree, TreeBuilder},
    objectstore::{ObjectStore, names},
    ui::process_progress::ProcessReporter,
    warning,
};

/// Walks the output directory and assembles its content-addressed tree.
///
/// Directories (including empty ones) are recorded directly. File bodies
/// flow through a bounded channel into a fixed pool of upload workers, so
/// the walk cannot run ahead of the store. The shared tree builder is
/// single-writer, so recording happens behind a mutex.
pub fn upload_output(
    store: &Arc<dyn ObjectStore>,
    output_root: &Path,
    concurrency: usize,
    cancel: &CancelFlag,
    reporter: &Arc<ProcessReporter>,
) -> Result<HashTree> {
    let mut dirs: Vec<String> = Vec::new();
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    walk_output(output_root, output_root, &mut dirs, &mut files)?;

    let builder = Mutex::new(TreeBuilder::new());
    {
        let mut builder = builder.lock();
        for dir in &dirs {
            builder.put_dir(dir)?;
        }
    }

    let workers = concurrency.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .with_context(|| "Could not build the upload thread pool")?;

    let error_flag = AtomicBool::new(false);
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    let record_error = |e: anyhow::Error| {
        error_flag.store(true, Ordering::Release);
        let mut guard = first_error.lock();
        if guard.is_none() {
            *guard = Some(e);
        }
    };

    let (file_tx, file_rx) =
        crossbeam_channel::bounded::<(&String, &PathBuf)>(workers * 2);

    pool.scope(|scope| {
        for _ in 0..workers {
            let file_rx = file_rx.clone();
            let store = store.clone();
            let builder = &builder;
            let reporter = reporter.clone();
            let error_flag = &error_flag;
            let record_error = &record_error;
            let cancel = cancel.clone();

            scope.spawn(move |_| {
                while let Ok((rel, path)) = file_rx.recv() {
                    if cancel.is_cancelled() || error_flag.load(Ordering::Acquire) {
                        // Keep draining so the sender never blocks.
                        continue;
                    }
                    reporter.uploading(rel);

                    match save_file(store.as_ref(), path, &reporter) {
                        Ok((size, blocks)) => {
                            let result = builder.lock().put_file(rel, size, blocks);
                            if let Err(e) = result {
                                record_error(e);
                            }
                        }
                        Err(e) => record_error(
                            e.context(format!("Could not upload output file \'{}\'", rel)),
                        ),
                    }
                }
            });
        }

        for (rel, path) in &files {
            if error_flag.load(Ordering::Acquire) || cancel.is_cancelled() {
                break;
            }
            if file_tx.send((rel, path)).is_err() {
                break;
            }
        }

        drop(file_tx); // Signal the workers that no more files will come
    });

    cancel.check()?;
    if let Some(e) = first_error.lock().take() {
        return Err(e);
    }

    Ok(builder.into_inner().finish())
}

/// Splits a file into content-defined chunks and stores each one, skipping
/// blocks the store already holds. Returns the file size and its ordered
/// block refs.
fn save_file(
    store: &dyn ObjectStore,
    path: &Path,
    reporter: &ProcessReporter,
) -> Result<(u64, Vec<BlockRef>)> {
    let source = File::open(path)
        .with_context(|| format!("Could not open file \'{}\'", path.display()))?;
    let reader = BufReader::new(source);

    // The chunker parameters must remain stable across versions, otherwise
    // same contents will no longer produce same blocks and refs.
    let chunker = StreamCDC::with_level(
        reader,
        defaults::MIN_CHUNK_SIZE,
        defaults::AVG_CHUNK_SIZE,
        defaults::MAX_CHUNK_SIZE,
        Normalization::Level1,
    );

    let mut blocks = Vec::new();
    let mut offset = 0u64;

    for result in chunker {
        let chunk = result?;
        let length = chunk.data.len() as u64;

        let (hash, written) = put_block(store, chunk.data)?;
        blocks.push(BlockRef {
            hash,
            offset,
            length,
        });

        reporter.uploaded_block(length, written);
        offset += length;
    }

    Ok((offset, blocks))
}

/// Stores one block under its content hash. Returns the block ID and how
/// many bytes were written (zero when the block was already present).
pub(crate) fn put_block(store: &dyn ObjectStore, data: Vec<u8>) -> Result<(ID, u64)> {
    let id = ID::from_content(&data);
    let name = names::block(&id);

    if store.exists(&name)? {
        return Ok((id, 0));
    }

    let mut writer = store.writer(&name)?;
    writer
        .write_all(&data)
        .with_context(|| format!("Could not write block \'{}\'", id))?;
    writer.close()?;

    Ok((id, data.len() as u64))
}

fn walk_output(
    root: &Path,
    dir: &Path,
    dirs: &mut Vec<String>,
    files: &mut Vec<(String, PathBuf)>,
) -> Result<()> {
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Could not list output directory \'{}\'", dir.display()))?
    {
        entries.push(entry?.path());
    }
    entries.sort();

    for path in entries {
        let rel = path
            .strip_prefix(root)
            .expect("walked path is below the output root")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let meta = std::fs::symlink_metadata(&path)
            .with_context(|| format!("Could not stat \'{}\'", path.display()))?;

        if meta.is_dir() {
            dirs.push(rel);
            walk_output(root, &path, dirs, files)?;
        } else if meta.is_file() {
            files.push((rel, path));
        } else {
            warning!("Skipping non-regular output entry \'{}\'", rel);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        hashtree::TreeNode,
        objectstore::{self, memory::MemStore},
    };

    fn upload(dir: &Path, store: &MemStore) -> Result<HashTree> {
        let store: Arc<dyn ObjectStore> = Arc::new(store.clone());
        upload_output(
            &store,
            dir,
            2,
            &CancelFlag::new(),
            &Arc::new(ProcessReporter::hidden()),
        )
    }

    #[test]
    fn test_single_file_upload() -> Result<()> {
        let temp = tempdir()?;
        std::fs::write(temp.path().join("a.txt"), b"hello")?;

        let store = MemStore::new();
        let tree = upload(temp.path(), &store)?;

        let Some(TreeNode::File { size, blocks }) = tree.get("a.txt") else {
            panic!("expected a file node");
        };
        assert_eq!(*size, 5);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].hash, ID::from_content(b"hello"));
        assert_eq!(blocks[0].offset, 0);
        assert_eq!(blocks[0].length, 5);

        // The block body is retrievable by its ref.
        let body = objectstore::get(&store, &names::block(&blocks[0].hash))?;
        assert_eq!(body, b"hello");

        Ok(())
    }

    #[test]
    fn test_empty_output_is_an_empty_tree() -> Result<()> {
        let temp = tempdir()?;
        let tree = upload(temp.path(), &MemStore::new())?;
        assert!(tree.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_directories_are_preserved() -> Result<()> {
        let temp = tempdir()?;
        std::fs::create_dir_all(temp.path().join("empty"))?;
        std::fs::create_dir_all(temp.path().join("nested/inner"))?;

        let tree = upload(temp.path(), &MemStore::new())?;
        assert_eq!(tree.get("empty"), Some(&TreeNode::Directory));
        assert_eq!(tree.get("nested/inner"), Some(&TreeNode::Directory));

        Ok(())
    }

    #[test]
    fn test_upload_is_deterministic_and_deduplicated() -> Result<()> {
        let temp = tempdir()?;
        std::fs::write(temp.path().join("a"), b"same-bytes")?;
        std::fs::create_dir_all(temp.path().join("sub"))?;
        std::fs::write(temp.path().join("sub/b"), b"same-bytes")?;

        let store = MemStore::new();
        let reporter = Arc::new(ProcessReporter::hidden());
        let dyn_store: Arc<dyn ObjectStore> = Arc::new(store.clone());
        // Single worker so the dedup counters are deterministic.
        let tree =
            upload_output(&dyn_store, temp.path(), 1, &CancelFlag::new(), &reporter)?;

        let again = upload(temp.path(), &store)?;
        assert_eq!(tree.serialize(), again.serialize());

        // Identical contents share one block object.
        let summary = reporter.summary();
        assert_eq!(summary.blocks_written, 1);
        assert_eq!(summary.uploaded_bytes, 20);
        assert_eq!(summary.written_bytes, 10);

        Ok(())
    }

    #[test]
    fn test_cancelled_upload_reports_cancellation() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("a"), b"data").unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();

        let store: Arc<dyn ObjectStore> = Arc::new(MemStore::new());
        let err = upload_output(
            &store,
            temp.path(),
            2,
            &cancel,
            &Arc::new(ProcessReporter::hidden()),
        )
        .unwrap_err();
        assert!(crate::errors::is_cancelled(&err));
    }
}
