use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

const PATH_KEY: &str = "PATH";
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

fn is_executable(path: &Path) -> bool {
	fs::metadata(path).map_or(false, |m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// Maps command names to the first executable of that name on `PATH`.
pub struct SearchCache {
	path: OsString,
	imp: HashMap<OsString, PathBuf>,
}

impl SearchCache {
	pub fn new() -> SearchCache {
		let path = env::var_os(PATH_KEY).unwrap_or_else(|| OsString::from(DEFAULT_PATH));
		SearchCache::with_path(path)
	}

	pub fn with_path<S: Into<OsString>>(path: S) -> SearchCache {
		let mut this = SearchCache { path: path.into(), imp: HashMap::new() };
		this.rehash();
		this
	}

	fn add_entry(&mut self, entry: io::Result<fs::DirEntry>) -> io::Result<()> {
		let e = entry?;
		let path = e.path();
		if is_executable(&path) {
			self.imp.entry(e.file_name()).or_insert(path);
		}
		Ok(())
	}

	pub fn rehash(&mut self) {
		self.imp.clear();
		let dirs: Vec<PathBuf> = env::split_paths(&self.path).collect();
		for dir in dirs {
			if let Ok(entries) = fs::read_dir(&dir) {
				for entry in entries {
					let _ = self.add_entry(entry);
				}
			}
		}
		log::trace!("search cache rehashed: {} commands", self.imp.len());
	}

	pub fn lookup(&self, name: &OsStr) -> Option<&Path> {
		self.imp.get(name).map(PathBuf::as_path)
	}

	/// Names containing a slash are taken as paths. Anything else goes
	/// through the cache, rehashing once on a miss.
	pub fn resolve(&mut self, name: &OsStr) -> Option<PathBuf> {
		if name.as_bytes().contains(&b'/') {
			let path = PathBuf::from(name);
			return if is_executable(&path) { Some(path) } else { None };
		}
		if self.lookup(name).map_or(true, |p| !is_executable(p)) {
			self.rehash();
		}
		self.lookup(name).map(Path::to_path_buf)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs::File;

	fn make_exec(dir: &Path, name: &str, mode: u32) -> PathBuf {
		let path = dir.join(name);
		File::create(&path).unwrap();
		fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
		path
	}

	#[test]
	fn first_directory_wins() {
		let a = tempfile::tempdir().unwrap();
		let b = tempfile::tempdir().unwrap();
		let first = make_exec(a.path(), "tool", 0o755);
		make_exec(b.path(), "tool", 0o755);
		let path = env::join_paths([a.path(), b.path()]).unwrap();
		let cache = SearchCache::with_path(path);
		assert_eq!(cache.lookup(OsStr::new("tool")), Some(first.as_path()));
	}

	#[test]
	fn skips_non_executables() {
		let dir = tempfile::tempdir().unwrap();
		make_exec(dir.path(), "data", 0o644);
		let mut cache = SearchCache::with_path(dir.path());
		assert_eq!(cache.lookup(OsStr::new("data")), None);
		assert_eq!(cache.resolve(OsStr::new("data")), None);
	}

	#[test]
	fn rehash_on_miss() {
		let dir = tempfile::tempdir().unwrap();
		let mut cache = SearchCache::with_path(dir.path());
		assert_eq!(cache.resolve(OsStr::new("late")), None);
		let late = make_exec(dir.path(), "late", 0o755);
		assert_eq!(cache.resolve(OsStr::new("late")), Some(late));
	}

	#[test]
	fn slash_names_bypass_cache() {
		let dir = tempfile::tempdir().unwrap();
		let tool = make_exec(dir.path(), "tool", 0o700);
		let mut cache = SearchCache::with_path("");
		assert_eq!(cache.resolve(tool.as_os_str()), Some(tool.clone()));
		assert_eq!(cache.resolve(dir.path().join("missing").as_os_str()), None);
		assert_eq!(cache.resolve(dir.path().as_os_str()), None);
	}
}
