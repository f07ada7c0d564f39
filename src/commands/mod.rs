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

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    global::defaults::ENV_SFTP_PASSWORD,
    objectstore::{ObjectStore, localfs::LocalStore, sftp::SftpStore},
    utils::url::StoreLocation,
};

pub mod cmd_cat;
pub mod cmd_process;

// CLI arguments
#[derive(Parser, Debug)]
#[clap(
    version = env!("CARGO_PKG_VERSION"), // Version from crate metadata
    about = "Pipeline worker for content-addressed pipelines"
)]
pub struct Cli {
    // Subcommand
    #[command(subcommand)]
    pub command: Command,

    // Global arguments
    #[clap(flatten)]
    pub global_args: GlobalArgs,
}

// List of commands
#[derive(Subcommand, Debug)]
pub enum Command {
    #[clap(about = "Process one datum through a pipeline")]
    Process(cmd_process::CmdArgs),

    #[clap(about = "Print a stored object or a tagged output tree")]
    Cat(cmd_cat::CmdArgs),
}

#[derive(Parser, Debug)]
pub struct GlobalArgs {
    /// Object store location: a local path or an sftp:// URL
    #[clap(short, long, value_parser)]
    pub store: String,

    /// Verbosity level
    #[clap(short, long)]
    pub verbosity: Option<u32>,

    /// Silence progress output
    #[clap(short, long, default_value_t = false)]
    pub quiet: bool,
}

/// Opens the object store named by the global arguments. The password of
/// `sftp://` stores comes from the URL or from the environment.
pub fn open_store(global_args: &GlobalArgs) -> Result<Arc<dyn ObjectStore>> {
    match global_args.store.parse::<StoreLocation>()? {
        StoreLocation::Local(path) => Ok(Arc::new(LocalStore::new(path))),
        StoreLocation::Sftp {
            username,
            password,
            host,
            port,
            path,
        } => {
            let password = match password {
                Some(password) => password,
                None => std::env::var(ENV_SFTP_PASSWORD).with_context(|| {
                    format!(
                        "No password in the store URL and \'{}\' is not set",
                        ENV_SFTP_PASSWORD
                    )
                })?,
            };
            Ok(Arc::new(SftpStore::new(
                path, username, host, port, password,
            )))
        }
    }
}
