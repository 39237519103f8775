//! Hashing of user passwords with an external utility.
//!
//! Two utilities are probed in the configured order. Each call spawns one
//! short-lived child process, reads the first line it prints and waits for it
//! to exit. If neither utility can be executed hashing fails: a cleartext
//! password is never stored in its place.
use std::{path::Path, process::Stdio};

use tokio::{
	io::{AsyncBufReadExt, BufReader},
	process::Command,
};
use tracing::{debug, instrument, warn};

use crate::{config::HashingConfig, error::Error};

/// Turns cleartext passwords into values suitable for `userPassword`.
#[derive(Debug, Clone)]
pub struct Hasher {
	/// Where to find the utilities
	config: HashingConfig,
}

impl Hasher {
	/// Create a hasher using the utilities named in `config`.
	#[must_use]
	pub fn new(config: HashingConfig) -> Self {
		Self { config }
	}

	/// Pick the first executable utility and prepare its invocation.
	fn command(&self, cleartext: &str) -> Result<Command, Error> {
		let primary = &self.config.primary;
		let fallback = &self.config.fallback;
		if is_executable(primary) {
			debug!(utility = %primary.display(), "Hashing password");
			let mut command = Command::new(primary);
			command.arg("-s").arg(cleartext).arg("-n");
			Ok(command)
		} else if is_executable(fallback) {
			debug!(utility = %fallback.display(), "Hashing password with fallback utility");
			let mut command = Command::new(fallback);
			command.arg("-s").arg(&self.config.fallback_scheme).arg(cleartext);
			Ok(command)
		} else {
			Err(Error::HashingUnavailable)
		}
	}

	/// Hash `cleartext`.
	#[instrument(skip_all)]
	pub async fn hash(&self, cleartext: &str) -> Result<String, Error> {
		let mut command = self.command(cleartext)?;
		command
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true);

		let mut child = command.spawn().map_err(|err| Error::HashingFailed(err.to_string()))?;
		let line = match child.stdout.take() {
			Some(stdout) => BufReader::new(stdout).lines().next_line().await,
			None => Ok(None),
		};
		// The pipe is closed at this point, so the child cannot block on it
		if let Err(err) = child.wait().await {
			warn!("Failed to wait for hashing utility: {err}");
		}

		let line = line
			.map_err(|err| Error::HashingFailed(err.to_string()))?
			.ok_or_else(|| Error::HashingFailed("no output from hashing utility".to_owned()))?;
		let hash = line.replace(['\n', '\r'], "");
		let hash = hash.trim();
		if hash.is_empty() {
			return Err(Error::HashingFailed("hashing utility printed an empty line".to_owned()));
		}
		Ok(hash.to_owned())
	}
}

/// Whether `path` is a regular file anyone may execute.
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;

	std::fs::metadata(path)
		.map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}

/// Whether `path` is a regular file.
#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
	path.is_file()
}
