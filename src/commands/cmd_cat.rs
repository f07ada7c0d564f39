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

use std::io::Write;

use anyhow::{Result, bail};
use clap::Parser;

use crate::{
    hashtree::HashTree,
    log,
    objectstore::{self, names},
};

use super::GlobalArgs;

#[derive(Parser, Debug)]
pub struct CmdArgs {
    /// Print the output tree stored under a tag, as JSON
    #[clap(long, value_parser)]
    pub tag: Option<String>,

    /// Print a raw object by name
    #[clap(long, value_parser)]
    pub object: Option<String>,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let store = super::open_store(global_args)?;

    if let Some(tag) = &args.tag {
        let bytes = objectstore::get(store.as_ref(), &names::tag(tag))?;
        let tree = HashTree::deserialize(&bytes)?;
        log!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    if let Some(object) = &args.object {
        let bytes = objectstore::get(store.as_ref(), object)?;
        std::io::stdout().write_all(&bytes)?;
        return Ok(());
    }

    bail!("Nothing to print. Use --tag or --object.");
}
