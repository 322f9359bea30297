use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStage {
	pub argv: Vec<OsString>,
	pub input: Option<PathBuf>,
	pub output: Option<PathBuf>,
}

impl PipelineStage {
	pub fn name(&self) -> &OsStr {
		&self.argv[0]
	}
}

/// One parsed command line. An empty `stages` vector is the blank line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelinePlan {
	pub stages: Vec<PipelineStage>,
	pub is_background: bool,
}

impl PipelinePlan {
	pub fn is_empty(&self) -> bool {
		self.stages.is_empty()
	}

	pub fn input(&self) -> Option<&PathBuf> {
		self.stages.first().and_then(|s| s.input.as_ref())
	}

	pub fn output(&self) -> Option<&PathBuf> {
		self.stages.last().and_then(|s| s.output.as_ref())
	}
}
