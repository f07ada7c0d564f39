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

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::{
    commits::{Commit, CommitStore},
    datum::{self, FileInfo, PipelineSpec},
    errors,
    fileset::{FilesetStore, Ttl},
    global::{
        CancelFlag,
        defaults::{self, ENV_INPUT_ROOT, ENV_OUTPUT_ROOT},
    },
    objectstore::{self, ObjectStore, names},
    runner, transfer,
    ui::process_progress::ProcessReporter,
};

/// One processing request: the datum's input file slices, positionally
/// aligned with the pipeline's declared inputs.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub data: Vec<FileInfo>,
}

#[derive(Debug, Clone)]
pub struct ProcessResponse {
    /// The fingerprint tag under which the output tree is stored.
    pub tag: String,
    /// Whether the tag already existed and the run was skipped.
    pub cached: bool,
}

/// Local staging layout of a worker.
#[derive(Debug, Clone)]
pub struct WorkerPaths {
    /// Each declared input becomes a subdirectory below this root.
    pub input_root: PathBuf,
    /// The directory the user binary writes its output into.
    pub output_root: PathBuf,
}

/// Executes datums for one pipeline against an object store.
///
/// `process` is safe to call from concurrent threads: the cache probe is
/// admitted concurrently, everything from download onward is serialized
/// behind a worker-wide mutex because all user processes share the staging
/// directories. Cross-worker coordination is unnecessary: the output is
/// content-addressed, so two workers racing on the same datum write
/// byte-identical objects.
pub struct Worker {
    store: Arc<dyn ObjectStore>,
    filesets: Arc<FilesetStore>,
    pipeline: PipelineSpec,
    paths: WorkerPaths,
    upload_concurrency: usize,
    reporter: Arc<ProcessReporter>,
    output_commit: Option<(Arc<dyn CommitStore>, Commit)>,
    exec_lock: Mutex<()>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        pipeline: PipelineSpec,
        paths: WorkerPaths,
    ) -> Result<Self> {
        pipeline.validate()?;

        let filesets = Arc::new(FilesetStore::new(store.clone()));
        Ok(Self {
            store,
            filesets,
            pipeline,
            paths,
            upload_concurrency: defaults::DEFAULT_UPLOAD_CONCURRENCY.min(num_cpus::get().max(1)),
            reporter: Arc::new(ProcessReporter::hidden()),
            output_commit: None,
            exec_lock: Mutex::new(()),
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<ProcessReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency.max(1);
        self
    }

    /// Additionally append every produced output fileset to the given
    /// commit's staging list.
    pub fn with_output_commit(mut self, commits: Arc<dyn CommitStore>, commit: Commit) -> Self {
        self.output_commit = Some((commits, commit));
        self
    }

    pub fn filesets(&self) -> &Arc<FilesetStore> {
        &self.filesets
    }

    /// Runs one datum end to end: fingerprint, cache probe, download, user
    /// code, upload, tag.
    ///
    /// The tag is written last, so a failed run never leaves a visible
    /// cache entry and the next invocation re-runs the datum. Local staging
    /// state is not rolled back on failure; the next run overwrites it.
    pub fn process(&self, req: &ProcessRequest, cancel: &CancelFlag) -> Result<ProcessResponse> {
        let tag = datum::hash_datum(&req.data, &self.pipeline.transform)?.to_hex();
        let tag_name = names::tag(&tag);

        // Cache probe. A present tag short-circuits the whole run; only a
        // clean miss falls through to compute.
        match objectstore::get(self.store.as_ref(), &tag_name) {
            Ok(_) => {
                return Ok(ProcessResponse { tag, cached: true });
            }
            Err(e) if errors::is_not_found(&e) => {}
            Err(e) => return Err(e).with_context(|| "Could not probe the output cache"),
        }

        // All user processes of this worker share the staging directories,
        // so exactly one datum may produce at a time.
        let _exec_guard = self.exec_lock.lock();
        cancel.check()?;

        let staged = transfer::download::stage_inputs(
            self.store.clone(),
            &self.pipeline,
            &req.data,
            &self.paths.input_root,
            cancel,
            &self.reporter,
        )?;
        transfer::reset_dir(&self.paths.output_root)?;

        self.reporter.running(&self.pipeline.transform.cmd.join(" "));
        let extra_env = [
            (
                ENV_INPUT_ROOT.to_string(),
                self.paths.input_root.to_string_lossy().to_string(),
            ),
            (
                ENV_OUTPUT_ROOT.to_string(),
                self.paths.output_root.to_string_lossy().to_string(),
            ),
        ];
        runner::run_user_code(&self.pipeline.transform, &extra_env, cancel)?;

        // Inputs are no longer needed once the user code has finished;
        // unmount lazy overlays before uploading.
        drop(staged);

        let tree = transfer::upload::upload_output(
            &self.store,
            &self.paths.output_root,
            self.upload_concurrency,
            cancel,
            &self.reporter,
        )?;

        // The tag is the commit point and is written last.
        let bytes = tree.serialize();
        objectstore::put(self.store.as_ref(), &tag_name, &bytes)
            .with_context(|| format!("Could not record output under tag \'{}\'", tag))?;

        if let Some((commits, commit)) = &self.output_commit {
            let handle = self.filesets.create(&tree, Ttl::default_lease())?;
            commits
                .add_fileset(commit, &handle)
                .with_context(|| format!("Could not append output to commit \'{}\'", commit))?;
            self.filesets.drop_ref(&handle)?;
        }

        Ok(ProcessResponse { tag, cached: false })
    }
}
