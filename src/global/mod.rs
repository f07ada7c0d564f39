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

pub mod defaults;

use std::sync::{
    Arc, LazyLock,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Result, anyhow};
use parking_lot::{RwLock, RwLockReadGuard};
use rand::RngCore;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

use crate::{commands::GlobalArgs, errors::EngineError, global::defaults::DEFAULT_VERBOSITY, utils};

pub const ID_LENGTH: usize = 32;
pub type Hash256 = [u8; ID_LENGTH];

pub struct GlobalOpts {
    pub verbosity: u32,
}

impl Default for GlobalOpts {
    fn default() -> Self {
        Self {
            verbosity: DEFAULT_VERBOSITY,
        }
    }
}

pub static GLOBAL_OPTS: LazyLock<RwLock<Option<GlobalOpts>>> =
    LazyLock::new(|| RwLock::new(Some(GlobalOpts::default())));

pub fn set_global_opts_with_args(global_args: &GlobalArgs) {
    let verbosity = if global_args.quiet {
        0
    } else if let Some(v) = global_args.verbosity {
        v
    } else {
        DEFAULT_VERBOSITY
    };

    let new_opts = GlobalOpts { verbosity };

    let mut opts_guard = GLOBAL_OPTS.write();
    *opts_guard = Some(new_opts);
}

pub fn global_opts() -> RwLockReadGuard<'static, Option<GlobalOpts>> {
    GLOBAL_OPTS.read()
}

/// This is an ID that identifies an object by its content.
///
/// IDs are 32 bytes and render as 64 lowercase hex characters. The hex
/// codec is blake3's own fixed-size codec, which already validates length
/// and charset on parse.
#[derive(Hash, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub struct ID(Hash256);

impl ID {
    /// Creates a new, random ID.
    pub fn new_random() -> Self {
        let mut random_bytes: Hash256 = Default::default();
        rand::rng().fill_bytes(&mut random_bytes);
        Self(random_bytes)
    }

    /// Constructs an ID from a byte array.
    pub fn from_bytes(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derives the ID of a byte stream from its content hash.
    pub fn from_content<T: AsRef<[u8]>>(data: T) -> Self {
        Self(utils::calculate_hash(data))
    }

    pub fn as_bytes(&self) -> &Hash256 {
        &self.0
    }

    /// Converts the ID to a hex String.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// Convert to hex String with `len` bytes
    pub fn to_short_hex(&self, len: usize) -> String {
        utils::bytes_to_hex(&self.0[0..len])
    }

    /// Parses an ID from its 64-character hex form.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hash = blake3::Hash::from_hex(hex_str)
            .map_err(|e| anyhow!("Invalid ID \'{}\': {}", hex_str, e))?;
        Ok(Self(hash.into()))
    }
}

impl std::fmt::Display for ID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl Serialize for ID {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ID {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = ID;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "a {}-character hex string", 2 * ID_LENGTH)
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<ID, E>
            where
                E: de::Error,
            {
                ID::from_hex(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

/// A request-scoped cancellation flag shared between the coordinator, the
/// transfer loops and the user-process wait. Setting it aborts in-flight
/// work at the next suspension point; partial work is abandoned, never
/// published.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns a `Cancelled` error if the flag has been raised.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        Ok(())
    }
}
