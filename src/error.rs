use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("missing command around '|'")]
	EmptyStage,
	#[error("redirection '{0}' is only allowed on the {1} stage")]
	MisplacedRedirect(char, &'static str),
	#[error("expected file name after '{0}'")]
	MissingRedirectTarget(char),
	#[error("duplicate redirection '{0}'")]
	DuplicateRedirect(char),
	#[error("'&' must be the last token of the line")]
	TrailingBackground,
	#[error("unexpected character '{0}'")]
	UnknownSeparator(char),
	#[error("arithmetic: {0}")]
	Arithmetic(String),
}

#[derive(Debug, Error)]
pub enum ShellError {
	#[error("parse error: {0}")]
	Parse(#[from] ParseError),
	#[error("{0}: command not found")]
	CommandNotFound(String),
	#[error("{}: {source}", path.display())]
	Redirection { path: PathBuf, #[source] source: io::Error },
	#[error("{0}: built-in commands take no redirection")]
	BuiltinRedirect(String),
	#[error("cd: {}: {reason}", path.display())]
	Directory { path: PathBuf, reason: String },
	#[error("{0}")]
	Sys(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;
