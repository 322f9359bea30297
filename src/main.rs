mod arith;
mod builtin;
mod config;
mod error;
mod eval;
mod global;
mod job;
mod parser;
mod reader;
mod search;
mod signal;
mod types;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use nix::unistd;

use error::ShellError;

fn run(config: &config::Config) -> i32 {
	let wake = match signal::install() {
		Ok(wake) => wake,
		Err(e) => {
			eprintln!("jobsh: installing signal handlers: {}", e);
			return 1;
		},
	};
	let mut reader = match reader::LineReader::new(wake) {
		Ok(reader) => reader,
		Err(e) => {
			eprintln!("jobsh: stdin: {}", e);
			return 1;
		},
	};

	let interactive = unistd::isatty(libc::STDIN_FILENO).unwrap_or(false);
	let show_prompt = interactive && !config.no_prompt;
	let mut state = global::State::new(interactive);
	let mut stdout = io::stdout();

	while !state.exiting {
		if show_prompt {
			let _ = write!(stdout, "{}", state.prompt());
			let _ = stdout.flush();
		}
		let line = match reader.read_line(&mut state.job_table) {
			Ok(reader::Line::Text(line)) => line,
			Ok(reader::Line::Interrupted) => {
				if show_prompt {
					let _ = writeln!(stdout);
				}
				continue;
			},
			Ok(reader::Line::Eof) => {
				if show_prompt {
					let _ = writeln!(stdout);
				}
				break;
			},
			Err(e) => {
				log::warn!("reading input: {}", e);
				break;
			},
		};
		let r = parser::parse(&line)
			.map_err(ShellError::from)
			.and_then(|plan| eval::eval(&mut state, &plan));
		if let Err(e) = r {
			eprintln!("jobsh: {}", e);
		}
	}

	state.shutdown();
	if state.job_table.faults() == 0 { 0 } else { 1 }
}

fn main() {
	let config = config::Config::parse();
	config.init_logger();
	process::exit(run(&config));
}
