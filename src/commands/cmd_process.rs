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
use clap::Parser;

use crate::{
    datum::{FileInfo, PipelineSpec},
    global::{CancelFlag, defaults},
    ui::{self, process_progress::ProcessReporter},
    worker::{ProcessRequest, Worker, WorkerPaths},
};

use super::GlobalArgs;

#[derive(Parser, Debug)]
pub struct CmdArgs {
    /// Pipeline spec (JSON)
    #[clap(short, long, value_parser)]
    pub pipeline: PathBuf,

    /// Datum: the list of input file slices (JSON)
    #[clap(short, long, value_parser)]
    pub datum: PathBuf,

    /// Directory the inputs are staged into
    #[clap(long, default_value = defaults::DEFAULT_INPUT_ROOT)]
    pub input_root: PathBuf,

    /// Directory the user binary writes its output to
    #[clap(long, default_value = defaults::DEFAULT_OUTPUT_ROOT)]
    pub output_root: PathBuf,

    /// Number of concurrent upload workers
    #[clap(short, long)]
    pub jobs: Option<usize>,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let store = super::open_store(global_args)?;

    let pipeline_file = std::fs::File::open(&args.pipeline)
        .with_context(|| format!("Could not open \'{}\'", args.pipeline.display()))?;
    let pipeline: PipelineSpec = serde_json::from_reader(pipeline_file)
        .with_context(|| "Could not parse the pipeline spec")?;

    let datum_file = std::fs::File::open(&args.datum)
        .with_context(|| format!("Could not open \'{}\'", args.datum.display()))?;
    let data: Vec<FileInfo> =
        serde_json::from_reader(datum_file).with_context(|| "Could not parse the datum")?;

    let reporter = Arc::new(ProcessReporter::new());
    let mut worker = Worker::new(
        store,
        pipeline,
        WorkerPaths {
            input_root: args.input_root.clone(),
            output_root: args.output_root.clone(),
        },
    )?
    .with_reporter(reporter.clone());
    if let Some(jobs) = args.jobs {
        worker = worker.with_upload_concurrency(jobs);
    }

    // Ctrl+C aborts the run; nothing is published on a cancelled run.
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel())?;

    let response = match worker.process(&ProcessRequest { data }, &cancel) {
        Ok(response) => response,
        Err(e) => {
            reporter.abandon();
            return Err(e);
        }
    };

    reporter.finish();
    if response.cached {
        ui::cli::log_info("Cached", &response.tag);
    } else {
        ui::cli::log_success("Tag", &response.tag);
    }

    Ok(())
}
