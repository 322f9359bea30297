use std::env;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use nix::unistd;

use crate::error::{Result, ShellError};
use crate::global;

pub type Builtin = fn(&mut global::State, &[OsString]) -> Result<()>;

fn directory_error(path: PathBuf, reason: &str) -> ShellError {
	ShellError::Directory { path, reason: reason.to_string() }
}

pub fn builtin_cd(state: &mut global::State, args: &[OsString]) -> Result<()> {
	let target = match args {
		[] => match env::var_os("HOME") {
			Some(home) => PathBuf::from(home),
			None => return Err(directory_error(PathBuf::from("~"), "HOME not set")),
		},
		[dir] => PathBuf::from(dir),
		_ => return Err(directory_error(PathBuf::from(&args[0]), "too many arguments")),
	};

	if !target.exists() {
		return Err(directory_error(target, "no such file or directory"));
	}
	if !target.is_dir() {
		return Err(directory_error(target, "not a directory"));
	}
	if let Err(e) = unistd::chdir(&target) {
		return Err(directory_error(target, e.desc()));
	}
	state.cwd = env::current_dir().unwrap_or_else(|_| state.cwd.join(&target));
	log::debug!("cd {}", state.cwd.display());
	Ok(())
}

pub fn builtin_exit(state: &mut global::State, _: &[OsString]) -> Result<()> {
	state.exiting = true;
	Ok(())
}

pub fn match_builtin(name: &OsStr) -> Option<Builtin> {
	match name.to_str()? {
		"cd" => Some(builtin_cd),
		"exit" => Some(builtin_exit),
		_ => None,
	}
}
