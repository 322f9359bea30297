//! Interrupt forwarding and child wake-ups.
//!
//! The SIGINT handler only reads `FOREGROUND`; the job table writes it when a
//! foreground job is registered and again once that job is fully reaped.
//! With no foreground job the interrupt is noted and the main loop woken so
//! it can prompt again.
//! The SIGCHLD handler only writes one byte into a pipe the main loop polls,
//! so reaping itself always happens outside signal context.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::fcntl::OFlag;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{self, Pid};

static FOREGROUND: AtomicI32 = AtomicI32::new(0);
static CHILD_WAKE: AtomicI32 = AtomicI32::new(-1);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn forward_interrupt(sig: libc::c_int) {
	let pgid = FOREGROUND.load(Ordering::SeqCst);
	if pgid > 0 {
		unsafe { libc::killpg(pgid, sig); }
	} else {
		INTERRUPTED.store(true, Ordering::SeqCst);
		wake();
	}
}

extern "C" fn child_changed(_: libc::c_int) {
	wake();
}

// Async-signal-safe: one write(2), errno preserved.
fn wake() {
	let fd = CHILD_WAKE.load(Ordering::SeqCst);
	if fd >= 0 {
		// A full pipe already means a wake-up is pending.
		unsafe {
			let saved = *libc::__errno_location();
			libc::write(fd, b"c".as_ptr() as *const libc::c_void, 1);
			*libc::__errno_location() = saved;
		}
	}
}

pub fn set_foreground(pgid: Option<Pid>) {
	FOREGROUND.store(pgid.map_or(0, Pid::as_raw), Ordering::SeqCst);
}

/// True once per interrupt that arrived while no job held the foreground.
pub fn take_interrupt() -> bool {
	INTERRUPTED.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
pub fn foreground() -> Option<Pid> {
	match FOREGROUND.load(Ordering::SeqCst) {
		0 => None,
		pgid => Some(Pid::from_raw(pgid)),
	}
}

/// SIGINT is forwarded to the foreground group; SIGHUP and SIGTTOU are
/// ignored by the shell itself. Returns the read end of the pipe that
/// becomes readable whenever a child terminates or an interrupt finds no
/// foreground job.
pub fn install() -> nix::Result<OwnedFd> {
	let (wake_read, wake_write) = unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
	let wake_read = unsafe { OwnedFd::from_raw_fd(wake_read) };
	let old = CHILD_WAKE.swap(wake_write, Ordering::SeqCst);
	if old >= 0 {
		let _ = unistd::close(old);
	}

	let forward = SigAction::new(SigHandler::Handler(forward_interrupt), SaFlags::SA_RESTART, SigSet::empty());
	let wake = SigAction::new(SigHandler::Handler(child_changed), SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP, SigSet::empty());
	let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
	unsafe {
		signal::sigaction(Signal::SIGINT, &forward)?;
		signal::sigaction(Signal::SIGCHLD, &wake)?;
		signal::sigaction(Signal::SIGHUP, &ignore)?;
		signal::sigaction(Signal::SIGTTOU, &ignore)?;
	}
	Ok(wake_read)
}

/// Empties the wake-up pipe after the main loop has noticed it.
pub fn drain_wake(wake: &OwnedFd) {
	let mut buf = [0u8; 64];
	while let Ok(n) = unistd::read(wake.as_raw_fd(), &mut buf) {
		if n < buf.len() { break; }
	}
}

/// Called in a forked child before exec; ignored dispositions (including
/// the SIGPIPE the Rust runtime ignores) would otherwise survive the exec.
pub fn restore_defaults() {
	let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	for &sig in &[Signal::SIGINT, Signal::SIGCHLD, Signal::SIGHUP, Signal::SIGTTOU, Signal::SIGPIPE] {
		let _ = unsafe { signal::sigaction(sig, &default) };
	}
}
