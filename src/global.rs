use std::env;
use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;

use crate::job;
use crate::search;

/// Everything the shell mutates over a session. The signal handler sees
/// none of it except the foreground group mirrored in `signal`.
pub struct State {
	pub search_cache: search::SearchCache,
	pub job_table: job::JobTable,
	pub cwd: PathBuf,
	pub interactive: bool,
	pub exiting: bool,
}

impl State {
	pub fn new(interactive: bool) -> State {
		State {
			search_cache: search::SearchCache::new(),
			job_table: job::JobTable::new(),
			cwd: env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
			interactive,
			exiting: false,
		}
	}

	/// `$parent/dir> `: the last two components of the working directory.
	pub fn prompt(&self) -> String {
		let name = |p: &Path| p.file_name().map(|n| n.to_string_lossy().into_owned());
		match (self.cwd.parent().and_then(name), name(&self.cwd)) {
			(Some(parent), Some(dir)) => format!("${}/{}> ", parent, dir),
			(None, Some(dir)) => format!("${}> ", dir),
			_ => String::from("$/> "),
		}
	}

	/// Hangs up every remaining job and waits for all of them.
	pub fn shutdown(&mut self) {
		self.job_table.reap();
		if !self.job_table.is_empty() {
			log::debug!("hanging up {} job(s), {} in background",
				self.job_table.len(), self.job_table.background().count());
			self.job_table.signal_all(Signal::SIGHUP);
			self.job_table.signal_all(Signal::SIGCONT);
		}
		self.job_table.drain();
	}
}
