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
    collections::VecDeque,
    net::TcpStream,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use ssh2::{Session, Sftp};

use crate::errors::EngineError;

/// An SFTP connection held in the pool between uses.
struct PooledConnection {
    session: Session,
    sftp: Sftp,
    last_used: Instant,
}

struct PoolState {
    idle: VecDeque<PooledConnection>,
    /// Connections alive in total: idle plus borrowed.
    num_established: usize,
}

struct PoolInner {
    addr: String,
    username: String,
    password: String,
    max_connections: usize,
    /// How long `get` waits for a borrowed connection to come back.
    connect_timeout: Duration,
    /// Idle connections older than this are discarded instead of reused.
    idle_timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// A bounded pool of SFTP sessions shared between worker threads.
///
/// `get` hands out an [`SftpClient`] that returns its connection to the pool
/// on drop. When every connection is borrowed, `get` blocks on a condvar
/// until one comes back or the wait times out.
#[derive(Clone)]
pub struct SftpConnectionPool {
    inner: Arc<PoolInner>,
}

impl SftpConnectionPool {
    pub fn new(
        addr: String,
        username: String,
        password: String,
        max_connections: usize,
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                addr,
                username,
                password,
                max_connections,
                connect_timeout,
                idle_timeout,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    num_established: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    pub fn get(&self) -> Result<SftpClient> {
        let mut state = self.inner.state.lock();

        loop {
            while let Some(conn) = state.idle.pop_front() {
                if conn.last_used.elapsed() > self.inner.idle_timeout {
                    state.num_established -= 1;
                    continue;
                }
                return Ok(self.wrap(conn.session, conn.sftp));
            }

            if state.num_established < self.inner.max_connections {
                // Reserve the slot before connecting so concurrent callers
                // cannot overshoot the bound while we are off the lock.
                state.num_established += 1;
                drop(state);

                match connect(&self.inner) {
                    Ok((session, sftp)) => return Ok(self.wrap(session, sftp)),
                    Err(e) => {
                        self.inner.state.lock().num_established -= 1;
                        self.inner.available.notify_one();
                        return Err(e).with_context(|| {
                            format!("Could not open sftp connection to \'{}\'", self.inner.addr)
                        });
                    }
                }
            }

            if self
                .inner
                .available
                .wait_for(&mut state, self.inner.connect_timeout)
                .timed_out()
            {
                return Err(EngineError::Transient(format!(
                    "timed out waiting for an sftp connection to \'{}\'",
                    self.inner.addr
                ))
                .into());
            }
        }
    }

    fn wrap(&self, session: Session, sftp: Sftp) -> SftpClient {
        SftpClient {
            session: Some(session),
            sftp: Some(sftp),
            pool: self.clone(),
        }
    }

    fn put_back(&self, session: Session, sftp: Sftp) {
        let mut state = self.inner.state.lock();
        state.idle.push_back(PooledConnection {
            session,
            sftp,
            last_used: Instant::now(),
        });
        self.inner.available.notify_one();
    }
}

/// An SFTP connection borrowed from the pool. Returned automatically on drop.
pub struct SftpClient {
    session: Option<Session>,
    sftp: Option<Sftp>,
    pool: SftpConnectionPool,
}

impl SftpClient {
    pub fn sftp(&self) -> &Sftp {
        self.sftp.as_ref().expect("client already returned")
    }
}

impl Drop for SftpClient {
    fn drop(&mut self) {
        if let (Some(session), Some(sftp)) = (self.session.take(), self.sftp.take()) {
            self.pool.put_back(session, sftp);
        }
    }
}

fn connect(inner: &PoolInner) -> Result<(Session, Sftp)> {
    let tcp = TcpStream::connect(&inner.addr)
        .with_context(|| format!("Could not connect to \'{}\'", inner.addr))?;

    let mut session = Session::new().with_context(|| "Could not create SSH session")?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .with_context(|| "SSH handshake failed")?;
    session
        .userauth_password(&inner.username, &inner.password)
        .with_context(|| format!("SSH authentication failed for \'{}\'", inner.username))?;
    session.set_keepalive(true, 30);

    let sftp = session
        .sftp()
        .with_context(|| "Could not open SFTP channel")?;

    Ok((session, sftp))
}
