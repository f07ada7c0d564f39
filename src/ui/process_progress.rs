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
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::{ui, utils};

/// Counters accumulated over one datum run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSummary {
    pub downloaded_bytes: u64,
    pub uploaded_bytes: u64,
    /// Bytes actually written to the store (after block dedup).
    pub written_bytes: u64,
    pub blocks_written: u64,
}

/// Progress reporter for the three phases of one datum run
/// (download, user code, upload). Shared across worker threads.
pub struct ProcessReporter {
    downloaded_bytes: AtomicU64,
    uploaded_bytes: AtomicU64,
    written_bytes: AtomicU64,
    blocks_written: AtomicU64,

    spinner: ProgressBar,
}

impl ProcessReporter {
    pub fn new() -> Self {
        Self::with_draw_target(ui::default_bar_draw_target())
    }

    /// A reporter that draws nothing. Used by tests and embedding callers.
    pub fn hidden() -> Self {
        Self::with_draw_target(ProgressDrawTarget::hidden())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        let spinner = ProgressBar::with_draw_target(None, target);
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars(ui::SPINNER_TICK_CHARS),
        );
        spinner.enable_steady_tick(Duration::from_millis(33));

        Self {
            downloaded_bytes: AtomicU64::new(0),
            uploaded_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            blocks_written: AtomicU64::new(0),
            spinner,
        }
    }

    pub fn downloading(&self, path: &str) {
        self.spinner.set_message(format!("downloading {}", path));
    }

    pub fn downloaded_bytes(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn running(&self, cmd: &str) {
        self.spinner.set_message(format!("running {}", cmd));
    }

    pub fn uploading(&self, path: &str) {
        self.spinner.set_message(format!("uploading {}", path));
    }

    /// Records one uploaded block: `raw` bytes of output consumed, `written`
    /// bytes stored (0 when the block already existed in the store).
    pub fn uploaded_block(&self, raw: u64, written: u64) {
        self.uploaded_bytes.fetch_add(raw, Ordering::Relaxed);
        self.written_bytes.fetch_add(written, Ordering::Relaxed);
        if written > 0 {
            self.blocks_written.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn finish(&self) {
        let summary = self.summary();
        self.spinner.finish_with_message(format!(
            "done ({} in, {} out, {} stored)",
            utils::format_size(summary.downloaded_bytes),
            utils::format_size(summary.uploaded_bytes),
            utils::format_size(summary.written_bytes),
        ));
    }

    pub fn abandon(&self) {
        self.spinner.abandon();
    }

    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            downloaded_bytes: self.downloaded_bytes.load(Ordering::Relaxed),
            uploaded_bytes: self.uploaded_bytes.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProcessReporter {
    fn default() -> Self {
        Self::hidden()
    }
}
