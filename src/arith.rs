//! `$((expr))` substitution.
//!
//! The grammar is deliberately small: integer literals, binary `+` and `-`,
//! unary minus and parentheses. A multiplicative tier would slot in between
//! `parse_sum` and `parse_unary`.

use crate::error::ParseError;

pub const OPEN: &str = "$((";
pub const CLOSE: &str = "))";

type ArithResult<T> = Result<T, ParseError>;

fn err<T>(msg: impl Into<String>) -> ArithResult<T> {
	Err(ParseError::Arithmetic(msg.into()))
}

struct Arith<'a> {
	expr: &'a [u8],
	i: usize,
}

impl<'a> Arith<'a> {
	fn peek(&mut self) -> Option<u8> {
		while let Some(&c) = self.expr.get(self.i) {
			if c != b' ' && c != b'\t' { break; }
			self.i += 1;
		}
		self.expr.get(self.i).copied()
	}

	fn parse_sum(&mut self) -> ArithResult<i64> {
		let mut acc = self.parse_unary()?;
		loop {
			let op = match self.peek() {
				Some(c @ b'+') | Some(c @ b'-') => c,
				_ => return Ok(acc),
			};
			self.i += 1;
			let rhs = self.parse_unary()?;
			let r = if op == b'+' { acc.checked_add(rhs) } else { acc.checked_sub(rhs) };
			acc = match r {
				Some(v) => v,
				None => return err("integer overflow"),
			};
		}
	}

	fn parse_unary(&mut self) -> ArithResult<i64> {
		match self.peek() {
			Some(b'-') => {
				self.i += 1;
				match self.parse_unary()?.checked_neg() {
					Some(v) => Ok(v),
					None => err("integer overflow"),
				}
			},
			Some(b'+') => {
				self.i += 1;
				self.parse_unary()
			},
			_ => self.parse_primary(),
		}
	}

	fn parse_primary(&mut self) -> ArithResult<i64> {
		match self.peek() {
			Some(b'(') => {
				self.i += 1;
				let v = self.parse_sum()?;
				if self.peek() != Some(b')') {
					return err("expected ')'");
				}
				self.i += 1;
				Ok(v)
			},
			Some(c) if c.is_ascii_digit() => {
				let orig = self.i;
				while self.expr.get(self.i).map_or(false, u8::is_ascii_digit) {
					self.i += 1;
				}
				let digits = String::from_utf8_lossy(&self.expr[orig .. self.i]);
				match digits.parse() {
					Ok(v) => Ok(v),
					Err(_) => err(format!("number out of range: {}", digits)),
				}
			},
			Some(c) => err(format!("unexpected '{}'", c as char)),
			None => err("unexpected end of expression"),
		}
	}
}

/// Evaluates the text between `$((` and `))`.
pub fn eval(expr: &str) -> ArithResult<i64> {
	let mut a = Arith { expr: expr.as_bytes(), i: 0 };
	let v = a.parse_sum()?;
	if let Some(c) = a.peek() {
		return err(format!("unexpected '{}'", c as char));
	}
	Ok(v)
}

/// Returns the length of the `$((...))` construct starting at `s[0]`, or
/// `None` when it is never closed. Parentheses inside must balance.
pub fn span(s: &[u8]) -> Option<usize> {
	debug_assert!(s.starts_with(OPEN.as_bytes()));
	let mut depth = 0usize;
	let mut i = OPEN.len();
	while let Some(&c) = s.get(i) {
		match c {
			b'(' => depth += 1,
			b')' if depth > 0 => depth -= 1,
			b')' => return if s.get(i + 1) == Some(&b')') { Some(i + CLOSE.len()) } else { None },
			_ => {},
		}
		i += 1;
	}
	None
}

fn find_open(s: &[u8]) -> Option<usize> {
	s.windows(OPEN.len()).position(|w| w == OPEN.as_bytes())
}

/// Replaces every `$((expr))` in `word` with its value. Bytes outside the
/// expressions are copied as they are.
pub fn expand(word: &[u8]) -> ArithResult<Vec<u8>> {
	let mut out = Vec::with_capacity(word.len());
	let mut rest = word;
	while let Some(start) = find_open(rest) {
		out.extend_from_slice(&rest[.. start]);
		let tail = &rest[start ..];
		let len = match span(tail) {
			Some(len) => len,
			None => return err("unterminated $(("),
		};
		let expr = match std::str::from_utf8(&tail[OPEN.len() .. len - CLOSE.len()]) {
			Ok(expr) => expr,
			Err(_) => return err("expression is not valid UTF-8"),
		};
		out.extend_from_slice(eval(expr)?.to_string().as_bytes());
		rest = &tail[len ..];
	}
	out.extend_from_slice(rest);
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn addition() {
		assert_eq!(eval("3+4"), Ok(7));
		assert_eq!(eval(" 5 + 4 "), Ok(9));
		assert_eq!(eval("1+2+3-10"), Ok(-4));
	}

	#[test]
	fn unary_and_parens() {
		assert_eq!(eval("-(2+3)"), Ok(-5));
		assert_eq!(eval("10-(4-1)"), Ok(7));
		assert_eq!(eval("--1"), Ok(1));
	}

	#[test]
	fn malformed() {
		assert!(eval("").is_err());
		assert!(eval("3+").is_err());
		assert!(eval("(1+2").is_err());
		assert!(eval("3*4").is_err());
		assert!(eval("9223372036854775807+1").is_err());
	}

	#[test]
	fn expand_in_place() {
		assert_eq!(expand(b"$((3+4))").unwrap(), b"7");
		assert_eq!(expand(b"a$((1+1))b$((2+2))c").unwrap(), b"a2b4c");
		assert_eq!(expand(b"$(((1+2)+3))").unwrap(), b"6");
		assert_eq!(expand(b"plain").unwrap(), b"plain");
		assert_eq!(expand(b"\xff$((1+1))\xfe").unwrap(), b"\xff2\xfe");
		assert!(expand(b"$((1+2)").is_err());
		assert!(expand(b"$((1+\xff))").is_err());
	}

	#[test]
	fn span_balances_parens() {
		assert_eq!(span(b"$((1+(2)))x"), Some(10));
		assert_eq!(span(b"$((1+2) )"), None);
	}
}
