use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use crate::arith;
use crate::error::ParseError;
use crate::types::*;

type ParseResult<T> = Result<T, ParseError>;

struct Parser<'a> {
	line: &'a [u8],
	i: usize,
}

impl<'a> Parser<'a> {
	fn peek(&self) -> Option<u8> {
		self.line.get(self.i).copied()
	}

	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.peek() {
			if !f(c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		matches!(c, b' ' | b'\t' | b'\n' | b'\r')
	}

	fn is_letter(c: u8) -> bool {
		match c {
			b'>' | b'<' | b'&' | b'|' | b'\0' => false,
			_ => !Parser::is_whitespace(c),
		}
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Parser::is_whitespace);
	}

	// `$((...))` is read as one piece so that blanks and parentheses inside
	// the expression do not end the word.
	fn read_word(&mut self) -> ParseResult<Option<OsString>> {
		let orig = self.i;
		loop {
			let rest = &self.line[self.i ..];
			if rest.starts_with(arith::OPEN.as_bytes()) {
				match arith::span(rest) {
					Some(len) => self.i += len,
					None => return Err(ParseError::Arithmetic("unterminated $((".to_string())),
				}
			} else if rest.first().map_or(false, |&c| Parser::is_letter(c)) {
				self.i += 1;
			} else {
				break;
			}
		}
		if orig == self.i {
			return Ok(None);
		}
		arith::expand(&self.line[orig .. self.i]).map(|w| Some(OsString::from_vec(w)))
	}

	fn parse_stage(&mut self) -> ParseResult<PipelineStage> {
		let mut argv: Vec<OsString> = vec![];
		let mut input: Option<PathBuf> = None;
		let mut output: Option<PathBuf> = None;

		loop {
			self.skip_whitespaces();
			match self.peek() {
				Some(c @ b'<') | Some(c @ b'>') => {
					self.i += 1;
					self.skip_whitespaces();
					let target = self.read_word()?.ok_or(ParseError::MissingRedirectTarget(c as char))?;
					let slot = if c == b'<' { &mut input } else { &mut output };
					if slot.is_some() {
						return Err(ParseError::DuplicateRedirect(c as char));
					}
					*slot = Some(PathBuf::from(target));
				},
				_ => match self.read_word()? {
					Some(word) => argv.push(word),
					None => { break; },
				},
			}
		}

		if argv.is_empty() {
			return Err(ParseError::EmptyStage);
		}
		Ok(PipelineStage { argv, input, output })
	}

	fn parse_pipeline(&mut self) -> ParseResult<PipelinePlan> {
		let mut stages: Vec<PipelineStage> = vec![];
		let mut is_background = false;

		self.skip_whitespaces();
		if self.peek().is_none() {
			return Ok(PipelinePlan::default());
		}

		loop {
			stages.push(self.parse_stage()?);
			match self.peek() {
				Some(b'|') => { self.i += 1; },
				Some(b'&') => {
					self.i += 1;
					self.skip_whitespaces();
					if self.peek().is_some() {
						return Err(ParseError::TrailingBackground);
					}
					is_background = true;
					break;
				},
				Some(c) => { return Err(ParseError::UnknownSeparator(c as char)); },
				None => { break; },
			}
		}

		let last = stages.len() - 1;
		for (i, stage) in stages.iter().enumerate() {
			if i != 0 && stage.input.is_some() {
				return Err(ParseError::MisplacedRedirect('<', "first"));
			}
			if i != last && stage.output.is_some() {
				return Err(ParseError::MisplacedRedirect('>', "last"));
			}
		}
		Ok(PipelinePlan { stages, is_background })
	}
}

/// Lines are bytes; words need not be valid UTF-8.
pub fn parse<L: AsRef<[u8]> + ?Sized>(line: &L) -> ParseResult<PipelinePlan> {
	let line = line.as_ref();
	let mut parser = Parser { line, i: 0 };
	let plan = parser.parse_pipeline();
	log::trace!("parsed {:?} -> {:?}", String::from_utf8_lossy(line), plan);
	plan
}

#[cfg(test)]
mod tests {
	use super::*;

	fn argvs(plan: &PipelinePlan) -> Vec<Vec<&str>> {
		plan.stages.iter().map(|s| s.argv.iter().map(|a| a.to_str().unwrap()).collect()).collect()
	}

	#[test]
	fn blank_line_is_empty_plan() {
		assert!(parse("").unwrap().is_empty());
		assert!(parse("   \t\n").unwrap().is_empty());
	}

	#[test]
	fn single_command() {
		let plan = parse("ls -l /tmp\n").unwrap();
		assert_eq!(argvs(&plan), vec![vec!["ls", "-l", "/tmp"]]);
		assert!(!plan.is_background);
		assert_eq!(plan.input(), None);
		assert_eq!(plan.output(), None);
	}

	#[test]
	fn pipeline_stages_in_order() {
		let plan = parse("echo hello world | grep hello | wc -w").unwrap();
		assert_eq!(argvs(&plan), vec![vec!["echo", "hello", "world"], vec!["grep", "hello"], vec!["wc", "-w"]]);
		let plan = parse("echo ananab|rev").unwrap();
		assert_eq!(argvs(&plan), vec![vec!["echo", "ananab"], vec!["rev"]]);
	}

	#[test]
	fn redirections() {
		let plan = parse("grep hello < test.txt > out.txt").unwrap();
		assert_eq!(argvs(&plan), vec![vec!["grep", "hello"]]);
		assert_eq!(plan.input(), Some(&PathBuf::from("test.txt")));
		assert_eq!(plan.output(), Some(&PathBuf::from("out.txt")));

		let plan = parse("<in.txt cat | sort >./out.txt").unwrap();
		assert_eq!(argvs(&plan), vec![vec!["cat"], vec!["sort"]]);
		assert_eq!(plan.stages[0].input, Some(PathBuf::from("in.txt")));
		assert_eq!(plan.stages[1].output, Some(PathBuf::from("./out.txt")));
	}

	#[test]
	fn redirection_mid_pipeline() {
		assert_eq!(parse("cat | sort < x").unwrap_err(), ParseError::MisplacedRedirect('<', "first"));
		assert_eq!(parse("cat > x | sort").unwrap_err(), ParseError::MisplacedRedirect('>', "last"));
	}

	#[test]
	fn bad_redirection_targets() {
		assert_eq!(parse("cat <").unwrap_err(), ParseError::MissingRedirectTarget('<'));
		assert_eq!(parse("echo > | wc").unwrap_err(), ParseError::MissingRedirectTarget('>'));
		assert_eq!(parse("echo > a > b").unwrap_err(), ParseError::DuplicateRedirect('>'));
	}

	#[test]
	fn background_marker() {
		let plan = parse("sleep 3 &").unwrap();
		assert!(plan.is_background);
		assert_eq!(argvs(&plan), vec![vec!["sleep", "3"]]);
		assert!(parse("sleep 3&\n").unwrap().is_background);
		assert_eq!(parse("sleep 3 & echo").unwrap_err(), ParseError::TrailingBackground);
		assert_eq!(parse("sleep 3 & &").unwrap_err(), ParseError::TrailingBackground);
	}

	#[test]
	fn empty_stages() {
		assert_eq!(parse("| wc").unwrap_err(), ParseError::EmptyStage);
		assert_eq!(parse("echo |").unwrap_err(), ParseError::EmptyStage);
		assert_eq!(parse("echo | | wc").unwrap_err(), ParseError::EmptyStage);
		assert_eq!(parse("&").unwrap_err(), ParseError::EmptyStage);
		assert_eq!(parse("< in.txt").unwrap_err(), ParseError::EmptyStage);
	}

	#[test]
	fn arithmetic_substitution() {
		assert_eq!(argvs(&parse("echo $((3+4))").unwrap()), vec![vec!["echo", "7"]]);
		assert_eq!(argvs(&parse("echo $(( 5 + 4 )) x$((1+1))").unwrap()), vec![vec!["echo", "9", "x2"]]);
		assert!(matches!(parse("echo $((3+"), Err(ParseError::Arithmetic(_))));
		assert!(matches!(parse("echo $((a))"), Err(ParseError::Arithmetic(_))));
	}

	#[test]
	fn non_ascii_words() {
		let plan = parse("echo héllo | grep é").unwrap();
		assert_eq!(argvs(&plan), vec![vec!["echo", "héllo"], vec!["grep", "é"]]);
	}

	#[test]
	fn words_keep_raw_bytes() {
		use std::os::unix::ffi::OsStrExt;

		let plan = parse(&b"cat caf\xe9 > \xff.txt"[..]).unwrap();
		assert_eq!(plan.stages[0].argv[1].as_bytes(), b"caf\xe9");
		assert_eq!(plan.output().unwrap().as_os_str().as_bytes(), b"\xff.txt");
	}
}
