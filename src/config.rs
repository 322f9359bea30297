use clap::{ArgAction, Parser};

pub const LOG_ENV: &str = "JOBSH_LOG";

#[derive(Debug, Parser)]
#[command(name = "jobsh", version, about = "A small job-control shell")]
pub struct Config {
	/// Never print a prompt, even on a terminal
	#[arg(short = 'p', long)]
	pub no_prompt: bool,

	/// Raise log verbosity (-v debug, -vv trace); JOBSH_LOG overrides
	#[arg(short, long, action = ArgAction::Count)]
	pub verbose: u8,
}

impl Config {
	pub fn log_filter(&self) -> &'static str {
		match self.verbose {
			0 => "warn",
			1 => "debug",
			_ => "trace",
		}
	}

	pub fn init_logger(&self) {
		env_logger::Builder::new()
			.parse_filters(self.log_filter())
			.parse_env(LOG_ENV)
			.init();
	}
}
