use std::collections::BTreeMap;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

use crate::signal as sigctl;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum State { Running, Done }

pub trait WaitStatusExt {
	fn is_terminated(self) -> bool;
}

impl WaitStatusExt for WaitStatus {
	fn is_terminated(self) -> bool {
		matches!(self, WaitStatus::Exited(..) | WaitStatus::Signaled(..))
	}
}

#[derive(Debug)]
pub struct Job {
	pub pgid: Pid,
	pub is_background: bool,
	pub command: String,
	members: Vec<Pid>,
	last: Pid,
	last_status: Option<WaitStatus>,
}

impl Job {
	pub fn members(&self) -> &[Pid] {
		&self.members
	}

	pub fn state(&self) -> State {
		if self.members.is_empty() { State::Done } else { State::Running }
	}

	/// Exit status of the final stage, once it has been reaped.
	pub fn last_status(&self) -> Option<WaitStatus> {
		self.last_status
	}

	fn retire(&mut self, pid: Pid, status: WaitStatus) -> bool {
		match self.members.iter().position(|&m| m == pid) {
			Some(i) => {
				self.members.remove(i);
				if pid == self.last {
					self.last_status = Some(status);
				}
				true
			},
			None => false,
		}
	}
}

/// Forks the members of one job, putting every child into the process
/// group of the first.
#[derive(Debug)]
pub struct JobBuilder {
	imp: Job,
}

impl JobBuilder {
	pub fn new(size_hint: usize, is_background: bool, command: String) -> JobBuilder {
		JobBuilder {
			imp: Job {
				pgid: Pid::from_raw(0),
				is_background,
				command,
				members: Vec::with_capacity(size_hint),
				last: Pid::from_raw(0),
				last_status: None,
			}
		}
	}

	pub fn is_empty(&self) -> bool {
		self.imp.members.is_empty()
	}

	/// Both sides call `setpgid`, so the group exists no matter which of
	/// them runs first.
	pub fn push_fork(&mut self) -> nix::Result<ForkResult> {
		let job = &mut self.imp;
		let pgid = job.pgid;

		let r = unsafe { unistd::fork() }?;
		match r {
			ForkResult::Parent { child } => {
				let target = if job.members.is_empty() { child } else { pgid };
				// EACCES once the child has exec'd; it already did it itself.
				if let Err(e) = unistd::setpgid(child, target) {
					if e != Errno::EACCES {
						log::warn!("setpgid({}, {}): {}", child, target, e);
					}
				}
				if job.members.is_empty() {
					job.pgid = child;
					// An interrupt from here on must reach the new group,
					// even before the job is in the table.
					if !job.is_background {
						sigctl::set_foreground(Some(child));
					}
				}
				job.members.push(child);
				job.last = child;
			},
			ForkResult::Child => {
				let _ = unistd::setpgid(Pid::from_raw(0), pgid);
			},
		}
		Ok(r)
	}

	pub fn build(self) -> Job {
		assert!(!self.imp.members.is_empty());
		self.imp
	}
}

/// Live jobs keyed by process group. At most one of them is foreground.
#[derive(Debug, Default)]
pub struct JobTable {
	jobs: BTreeMap<Pid, Job>,
	foreground: Option<Pid>,
	faults: usize,
}

impl JobTable {
	pub fn new() -> JobTable {
		JobTable::default()
	}

	pub fn len(&self) -> usize {
		self.jobs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.jobs.is_empty()
	}

	#[cfg(test)]
	pub fn get(&self, pgid: Pid) -> Option<&Job> {
		self.jobs.get(&pgid)
	}

	#[cfg(test)]
	pub fn foreground(&self) -> Option<Pid> {
		self.foreground
	}

	/// Bookkeeping inconsistencies seen so far. Non-zero makes the shell
	/// exit with a failure status.
	pub fn faults(&self) -> usize {
		self.faults
	}

	pub fn background(&self) -> impl Iterator<Item = &Job> {
		self.jobs.values().filter(|j| j.is_background)
	}

	pub fn push(&mut self, job: Job) -> Pid {
		let pgid = job.pgid;
		log::debug!("job {} started ({}): {:?} {}",
			pgid, if job.is_background { "background" } else { "foreground" }, job.members(), job.command);
		if !job.is_background {
			if let Some(old) = self.foreground {
				log::warn!("job {} replaces foreground job {}", pgid, old);
				debug_assert!(false, "second foreground job {}", pgid);
				self.faults += 1;
			}
			self.foreground = Some(pgid);
			sigctl::set_foreground(Some(pgid));
		}
		self.jobs.insert(pgid, job);
		pgid
	}

	/// Removes a reaped pid from its job, and the job from the table once it
	/// has no members left. Returns the job's group.
	pub fn retire(&mut self, pid: Pid, status: WaitStatus) -> Option<Pid> {
		self.retire_member(pid, status).map(|(pgid, _)| pgid)
	}

	// The finished job comes back once its last member is retired.
	fn retire_member(&mut self, pid: Pid, status: WaitStatus) -> Option<(Pid, Option<Job>)> {
		log::trace!("reaped {}: {:?}", pid, status);
		let found = self.jobs.iter_mut()
			.find_map(|(&pgid, job)| if job.retire(pid, status) { Some(pgid) } else { None });
		let pgid = match found {
			Some(pgid) => pgid,
			None => {
				log::warn!("reaped pid {} belongs to no job", pid);
				debug_assert!(false, "reaped pid {} belongs to no job", pid);
				self.faults += 1;
				return None;
			},
		};
		if self.jobs[&pgid].state() == State::Done {
			return Some((pgid, self.remove(pgid)));
		}
		Some((pgid, None))
	}

	fn remove(&mut self, pgid: Pid) -> Option<Job> {
		let job = self.jobs.remove(&pgid)?;
		if self.foreground == Some(pgid) {
			self.foreground = None;
			sigctl::set_foreground(None);
		}
		log::debug!("job {} done: {:?}", pgid, job.last_status);
		Some(job)
	}

	fn record(&mut self, r: nix::Result<WaitStatus>) -> Option<nix::Result<Pid>> {
		match r {
			Ok(status) => {
				let pid = status.pid()?;
				if status.is_terminated() {
					self.retire(pid, status);
				}
				Some(Ok(pid))
			},
			Err(e) => Some(Err(e)),
		}
	}

	/// Collects every child that has already terminated, without blocking.
	pub fn reap(&mut self) {
		loop {
			match self.record(wait::waitpid(None, Some(WaitPidFlag::WNOHANG))) {
				None => { break; },
				Some(Ok(_)) => {},
				Some(Err(Errno::EINTR)) => {},
				Some(Err(Errno::ECHILD)) => { break; },
				Some(Err(e)) => {
					log::warn!("waitpid: {}", e);
					break;
				},
			}
		}
	}

	/// Blocks until every member of `pgid` has been reaped. Returns the
	/// status of the job's final stage.
	pub fn wait_job(&mut self, pgid: Pid) -> Option<WaitStatus> {
		while self.jobs.contains_key(&pgid) {
			match wait::waitpid(Pid::from_raw(-pgid.as_raw()), None) {
				Ok(status) => {
					let pid = match status.pid() {
						Some(pid) if status.is_terminated() => pid,
						_ => continue,
					};
					if let Some((_, Some(job))) = self.retire_member(pid, status) {
						if job.pgid == pgid {
							return job.last_status();
						}
					}
				},
				Err(Errno::EINTR) => {},
				Err(e) => {
					log::warn!("waitpid({}): {}; dropping job", -pgid.as_raw(), e);
					self.faults += 1;
					self.remove(pgid);
				},
			}
		}
		None
	}

	pub fn signal_all(&self, sig: Signal) {
		for &pgid in self.jobs.keys() {
			if let Err(e) = signal::killpg(pgid, sig) {
				log::warn!("killpg({}, {}): {}", pgid, sig, e);
			}
		}
	}

	/// Blocks until the table is empty.
	pub fn drain(&mut self) {
		while !self.jobs.is_empty() {
			match wait::waitpid(None, None) {
				Ok(status) => { self.record(Ok(status)); },
				Err(Errno::EINTR) => {},
				Err(e) => {
					log::warn!("waitpid: {}; dropping {} job(s)", e, self.jobs.len());
					self.faults += 1;
					let pgids: Vec<Pid> = self.jobs.keys().copied().collect();
					for pgid in pgids {
						self.remove(pgid);
					}
				},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serial_test::serial;

	fn fake_job(pids: &[i32], is_background: bool) -> Job {
		let members: Vec<Pid> = pids.iter().map(|&p| Pid::from_raw(p)).collect();
		Job {
			pgid: members[0],
			is_background,
			command: String::from("fake"),
			last: *members.last().unwrap(),
			members,
			last_status: None,
		}
	}

	fn exited(pid: i32, code: i32) -> WaitStatus {
		WaitStatus::Exited(Pid::from_raw(pid), code)
	}

	#[test]
	#[serial]
	fn job_removed_once_all_members_retired() {
		let mut table = JobTable::new();
		let pgid = table.push(fake_job(&[901, 902, 903], true));
		assert_eq!(pgid, Pid::from_raw(901));
		assert_eq!(table.retire(Pid::from_raw(902), exited(902, 0)), Some(pgid));
		assert_eq!(table.retire(Pid::from_raw(901), exited(901, 0)), Some(pgid));
		assert_eq!(table.get(pgid).unwrap().members(), &[Pid::from_raw(903)]);
		assert_eq!(table.get(pgid).unwrap().state(), State::Running);
		assert_eq!(table.retire(Pid::from_raw(903), exited(903, 3)), Some(pgid));
		assert!(table.get(pgid).is_none());
		assert!(table.is_empty());
	}

	#[test]
	fn last_stage_status_is_kept() {
		let mut job = fake_job(&[911, 912], false);
		assert!(job.retire(Pid::from_raw(912), exited(912, 4)));
		assert!(!job.retire(Pid::from_raw(912), exited(912, 4)));
		assert!(job.retire(Pid::from_raw(911), exited(911, 0)));
		assert_eq!(job.last_status(), Some(exited(912, 4)));
		assert_eq!(job.state(), State::Done);
	}

	#[test]
	#[serial]
	fn foreground_tracking() {
		let mut table = JobTable::new();
		let bg = table.push(fake_job(&[921], true));
		assert_eq!(table.foreground(), None);
		let fg = table.push(fake_job(&[931, 932], false));
		assert_eq!(table.foreground(), Some(fg));
		assert_eq!(sigctl::foreground(), Some(fg));
		assert_eq!(table.background().map(|j| j.pgid).collect::<Vec<_>>(), vec![bg]);

		table.retire(Pid::from_raw(931), exited(931, 0));
		assert_eq!(table.foreground(), Some(fg));
		table.retire(Pid::from_raw(932), WaitStatus::Signaled(Pid::from_raw(932), Signal::SIGINT, false));
		assert_eq!(table.foreground(), None);
		assert_eq!(sigctl::foreground(), None);
		assert_eq!(table.len(), 1);
		assert!(table.get(bg).is_some());
	}

	#[test]
	fn wait_status_ext() {
		assert!(exited(1, 0).is_terminated());
		assert!(!WaitStatus::StillAlive.is_terminated());
		assert!(WaitStatus::Signaled(Pid::from_raw(7), Signal::SIGINT, false).is_terminated());
	}

	#[test]
	#[serial]
	fn foreground_group_published_at_first_fork() {
		sigctl::set_foreground(None);
		let mut builder = JobBuilder::new(1, true, String::from("bg"));
		match builder.push_fork().unwrap() {
			ForkResult::Child => unsafe { libc::_exit(0) },
			ForkResult::Parent { .. } => assert_eq!(sigctl::foreground(), None),
		}
		let mut table = JobTable::new();
		let bg = table.push(builder.build());
		table.wait_job(bg);

		let mut builder = JobBuilder::new(1, false, String::from("fg"));
		let child = match builder.push_fork().unwrap() {
			ForkResult::Child => unsafe { libc::_exit(3) },
			ForkResult::Parent { child } => child,
		};
		assert_eq!(sigctl::foreground(), Some(child));
		let pgid = table.push(builder.build());
		assert_eq!(pgid, child);
		assert_eq!(table.wait_job(pgid), Some(WaitStatus::Exited(child, 3)));
		assert_eq!(sigctl::foreground(), None);
		assert!(table.is_empty());
		assert_eq!(table.faults(), 0);
	}
}
