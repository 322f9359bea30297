use std::convert::Infallible;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::OFlag;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, ForkResult, Pid};

use crate::builtin;
use crate::error::{Result, ShellError};
use crate::global;
use crate::job;
use crate::search::SearchCache;
use crate::signal as sigctl;
use crate::types::*;

/// A stage resolved to an executable, ready for `execv` in the child.
struct Program {
	name: String,
	path: CString,
	argv: Vec<CString>,
}

impl Program {
	fn resolve(search_cache: &mut SearchCache, stage: &PipelineStage) -> Result<Program> {
		use std::os::unix::ffi::{OsStrExt, OsStringExt};

		let name = stage.name().to_string_lossy().into_owned();
		let not_found = || ShellError::CommandNotFound(name.clone());
		let path = search_cache.resolve(stage.name()).ok_or_else(not_found)?;
		let path = CString::new(path.into_os_string().into_vec()).map_err(|_| not_found())?;
		let argv = stage.argv.iter()
			.map(|a| CString::new(a.as_bytes()))
			.collect::<std::result::Result<Vec<_>, _>>()
			.map_err(|_| not_found())?;
		Ok(Program { name, path, argv })
	}
}

fn open_redirect(path: &Path, write: bool) -> Result<File> {
	let mut oopt = fs::OpenOptions::new();
	if write {
		oopt.write(true).create(true).truncate(true).mode(0o644);
	} else {
		oopt.read(true);
	}
	oopt.open(path).map_err(|source| ShellError::Redirection { path: path.to_path_buf(), source })
}

fn do_exec_program(program: &Program, stdin: Option<&OwnedFd>, stdout: Option<&OwnedFd>) -> nix::Result<Infallible> {
	if let Some(fd) = stdin {
		unistd::dup2(fd.as_raw_fd(), libc::STDIN_FILENO)?;
	}
	if let Some(fd) = stdout {
		unistd::dup2(fd.as_raw_fd(), libc::STDOUT_FILENO)?;
	}
	unistd::execv(&program.path, &program.argv)
}

// Runs in the forked child only. Never returns into the shell's loop.
fn exec_program(program: &Program, stdin: Option<&OwnedFd>, stdout: Option<&OwnedFd>) -> ! {
	sigctl::restore_defaults();
	match do_exec_program(program, stdin, stdout) {
		Ok(never) => match never {},
		Err(e) => {
			let _ = writeln!(io::stderr(), "jobsh: {}: {}", program.name, e.desc());
			unsafe { libc::_exit(126) }
		},
	}
}

/// Forks one child per program, in pipeline order. Stage `i` writes into
/// the pipe stage `i + 1` reads from; each end is closed in the shell as
/// soon as the child holding it exists.
fn spawn_commands(programs: &[Program], input: Option<File>, output: Option<File>,
                  job_builder: &mut job::JobBuilder) -> Result<()> {
	let last = programs.len() - 1;
	let mut stdin: Option<OwnedFd> = input.map(OwnedFd::from);
	let mut output: Option<OwnedFd> = output.map(OwnedFd::from);

	for (i, program) in programs.iter().enumerate() {
		let (stdout, next_stdin) = if i == last {
			(output.take(), None)
		} else {
			let (pipe_read, pipe_write) = unistd::pipe2(OFlag::O_CLOEXEC)?;
			let ends = unsafe { (OwnedFd::from_raw_fd(pipe_write), OwnedFd::from_raw_fd(pipe_read)) };
			(Some(ends.0), Some(ends.1))
		};

		match job_builder.push_fork()? {
			ForkResult::Parent { .. } => {},
			ForkResult::Child => {
				drop(next_stdin);
				drop(output);
				exec_program(program, stdin.as_ref(), stdout.as_ref());
			},
		}
		stdin = next_stdin;
	}
	Ok(())
}

fn describe(plan: &PipelinePlan) -> String {
	plan.stages.iter()
		.map(|s| s.argv.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" "))
		.collect::<Vec<_>>()
		.join(" | ")
}

/// Creates the job for `plan` and registers it. Nothing is forked unless
/// every stage resolves and every redirection opens.
pub fn launch(state: &mut global::State, plan: &PipelinePlan) -> Result<Pid> {
	assert!(!plan.is_empty());

	let programs = plan.stages.iter()
		.map(|stage| Program::resolve(&mut state.search_cache, stage))
		.collect::<Result<Vec<_>>>()?;
	let input = plan.input().map(|p| open_redirect(p, false)).transpose()?;
	let output = plan.output().map(|p| open_redirect(p, true)).transpose()?;

	let mut job_builder = job::JobBuilder::new(programs.len(), plan.is_background, describe(plan));
	if let Err(e) = spawn_commands(&programs, input, output, &mut job_builder) {
		if !job_builder.is_empty() {
			// A partial pipeline would never see EOF; kill it and collect it now.
			let pgid = state.job_table.push(job_builder.build());
			let _ = signal::killpg(pgid, Signal::SIGKILL);
			state.job_table.wait_job(pgid);
		}
		return Err(e);
	}
	Ok(state.job_table.push(job_builder.build()))
}

fn give_terminal(pgid: Pid) {
	if let Err(e) = unistd::tcsetpgrp(libc::STDIN_FILENO, pgid) {
		log::warn!("tcsetpgrp({}): {}", pgid, e);
	}
}

fn wait_foreground(state: &mut global::State, pgid: Pid) {
	if state.interactive {
		give_terminal(pgid);
	}
	let status = state.job_table.wait_job(pgid);
	if state.interactive {
		give_terminal(unistd::getpgrp());
	}
	log::debug!("foreground job {} finished: {:?}", pgid, status);
}

pub fn eval(state: &mut global::State, plan: &PipelinePlan) -> Result<()> {
	if plan.is_empty() {
		return Ok(());
	}

	if plan.stages.len() == 1 {
		let stage = &plan.stages[0];
		if let Some(func) = builtin::match_builtin(stage.name()) {
			if stage.input.is_some() || stage.output.is_some() {
				return Err(ShellError::BuiltinRedirect(stage.name().to_string_lossy().into_owned()));
			}
			log::debug!("builtin {:?}", stage.argv);
			return func(state, &stage.argv[1 ..]);
		}
	}

	let pgid = launch(state, plan)?;
	if !plan.is_background {
		wait_foreground(state, pgid);
	}
	Ok(())
}
