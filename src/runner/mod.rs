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
    io::Write,
    process::{Command, ExitStatus, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};

use crate::{
    datum::Transform,
    errors::EngineError,
    global::{CancelFlag, defaults::RUNNER_POLL_INTERVAL_MS},
};

/// Runs the user binary for one datum and classifies its exit status.
///
/// The transform's command vector becomes argv, its stdin lines are fed
/// newline-terminated on a pipe, stdout and stderr are inherited. Exit code
/// zero and codes from `accept_return_codes` count as success; everything
/// else, including death by signal, is a user-code failure.
///
/// Cancellation kills the child.
pub fn run_user_code(
    transform: &Transform,
    extra_env: &[(String, String)],
    cancel: &CancelFlag,
) -> Result<()> {
    if transform.cmd.is_empty() {
        return Err(
            EngineError::InvariantViolation("transform has no command".to_string()).into(),
        );
    }

    let mut command = Command::new(&transform.cmd[0]);
    command
        .args(&transform.cmd[1..])
        .envs(transform.env.iter())
        .envs(extra_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let mut child = command
        .spawn()
        .with_context(|| format!("Could not spawn user command \'{}\'", transform.cmd[0]))?;

    // Feed stdin from its own thread so a large script cannot deadlock
    // against a full pipe. A child that never reads stdin closes the pipe;
    // the resulting broken-pipe write error is not our failure.
    let stdin = child.stdin.take();
    let stdin_lines = transform.stdin.clone();
    let stdin_thread = std::thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            for line in &stdin_lines {
                if stdin.write_all(line.as_bytes()).is_err() {
                    return;
                }
                if stdin.write_all(b"\n").is_err() {
                    return;
                }
            }
        }
    });

    let status = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdin_thread.join();
            return Err(EngineError::Cancelled.into());
        }

        match child
            .try_wait()
            .with_context(|| "Could not wait on the user process")?
        {
            Some(status) => break status,
            None => std::thread::sleep(Duration::from_millis(RUNNER_POLL_INTERVAL_MS)),
        }
    };
    let _ = stdin_thread.join();

    classify_status(status, &transform.accept_return_codes)
}

fn classify_status(status: ExitStatus, accepted: &[i32]) -> Result<()> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) if accepted.contains(&code) => Ok(()),
        Some(code) => Err(EngineError::UserCode { code }.into()),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return Err(EngineError::UserSignal { signal }.into());
                }
            }
            Err(EngineError::UserSignal { signal: 0 }.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors;

    fn sh(script: &str) -> Transform {
        Transform {
            cmd: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_exit_is_success() {
        let transform = Transform {
            cmd: vec!["true".to_string()],
            ..Default::default()
        };
        run_user_code(&transform, &[], &CancelFlag::new()).unwrap();
    }

    #[test]
    fn test_nonzero_exit_is_user_code_failure() {
        let transform = Transform {
            cmd: vec!["false".to_string()],
            ..Default::default()
        };
        let err = run_user_code(&transform, &[], &CancelFlag::new()).unwrap_err();
        assert!(errors::is_user_code_failure(&err));
    }

    #[test]
    fn test_accepted_return_code_is_success() {
        let mut transform = sh("exit 3");
        transform.accept_return_codes = vec![3];
        run_user_code(&transform, &[], &CancelFlag::new()).unwrap();

        // The same exit without the declaration fails.
        let err = run_user_code(&sh("exit 3"), &[], &CancelFlag::new()).unwrap_err();
        assert!(errors::is_user_code_failure(&err));
    }

    #[test]
    fn test_signal_termination_is_failure() {
        let err = run_user_code(&sh("kill -9 $$"), &[], &CancelFlag::new()).unwrap_err();
        assert!(errors::is_user_code_failure(&err));
    }

    #[test]
    fn test_stdin_lines_reach_the_process() {
        let mut transform = sh("read line; test \"$line\" = hello");
        transform.stdin = vec!["hello".to_string()];
        run_user_code(&transform, &[], &CancelFlag::new()).unwrap();
    }

    #[test]
    fn test_env_reaches_the_process() {
        let mut transform = sh("test \"$MOLINO_TEST_VAR\" = marker");
        transform
            .env
            .insert("MOLINO_TEST_VAR".to_string(), "marker".to_string());
        run_user_code(&transform, &[], &CancelFlag::new()).unwrap();
    }

    #[test]
    fn test_cancel_kills_the_process() {
        let cancel = CancelFlag::new();
        cancel.cancel();

        let start = std::time::Instant::now();
        let err = run_user_code(&sh("sleep 30"), &[], &cancel).unwrap_err();
        assert!(errors::is_cancelled(&err));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_empty_command_is_invariant_violation() {
        let err = run_user_code(&Transform::default(), &[], &CancelFlag::new()).unwrap_err();
        assert!(errors::is_invariant_violation(&err));
    }
}
