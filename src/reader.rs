use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg};
use nix::poll::{self, PollFd, PollFlags};
use nix::unistd;

use crate::job::JobTable;
use crate::signal;

pub enum Line {
	Text(Vec<u8>),
	/// SIGINT arrived while no job was in the foreground.
	Interrupted,
	Eof,
}

/// Line input that keeps reaping children while the shell sits idle.
///
/// Standard input is shared with the children, so nothing past the current
/// newline is ever consumed: input is read one byte at a time.
pub struct LineReader {
	input: OwnedFd,
	wake: OwnedFd,
	pending: Vec<u8>,
}

impl LineReader {
	pub fn new(wake: OwnedFd) -> io::Result<LineReader> {
		let fd = fcntl::fcntl(libc::STDIN_FILENO, FcntlArg::F_DUPFD_CLOEXEC(0))?;
		Ok(LineReader::with_input(unsafe { OwnedFd::from_raw_fd(fd) }, wake))
	}

	fn with_input(input: OwnedFd, wake: OwnedFd) -> LineReader {
		LineReader { input, wake, pending: vec![] }
	}

	/// Returns false when an interrupt cut the wait short.
	fn wait_readable(&mut self, job_table: &mut JobTable) -> bool {
		loop {
			job_table.reap();
			if signal::take_interrupt() {
				return false;
			}
			let mut fds = [
				PollFd::new(self.input.as_raw_fd(), PollFlags::POLLIN),
				PollFd::new(self.wake.as_raw_fd(), PollFlags::POLLIN),
			];
			match poll::poll(&mut fds, -1) {
				Ok(_) => {},
				Err(Errno::EINTR) => { continue; },
				Err(e) => {
					log::warn!("poll: {}", e);
					return true;
				},
			}
			let ready = |fd: &PollFd| fd.revents().map_or(false, |r| !r.is_empty());
			if ready(&fds[1]) {
				signal::drain_wake(&self.wake);
				continue;
			}
			if ready(&fds[0]) {
				return true;
			}
		}
	}

	fn read_byte(&mut self) -> io::Result<Option<u8>> {
		let mut buf = [0u8; 1];
		loop {
			match unistd::read(self.input.as_raw_fd(), &mut buf) {
				Ok(0) => return Ok(None),
				Ok(_) => return Ok(Some(buf[0])),
				Err(Errno::EINTR) => {},
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// A partial line survives an interrupt and is completed by the next
	/// call.
	pub fn read_line(&mut self, job_table: &mut JobTable) -> io::Result<Line> {
		loop {
			if !self.wait_readable(job_table) {
				return Ok(Line::Interrupted);
			}
			match self.read_byte()? {
				None if self.pending.is_empty() => return Ok(Line::Eof),
				None => return Ok(Line::Text(mem::take(&mut self.pending))),
				Some(c) => {
					self.pending.push(c);
					if c == b'\n' {
						return Ok(Line::Text(mem::take(&mut self.pending)));
					}
				},
			}
		}
	}
}
