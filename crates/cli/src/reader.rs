//! A reader for the s-expression surface syntax
//!
//! Atoms are integers, `nil`, `t`, strings, or symbols; `'x` expands to
//! `(quote x)`; `;` comments run to the end of the line.

use sable_runtime::Value;
use std::fmt;

/// An error produced while reading a form
#[derive(Debug, PartialEq)]
pub enum ReadError {
    /// The input ended inside a form; more lines may complete it
    Incomplete,
    /// The input can't be completed into a valid form
    Syntax(String),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "unexpected end of input"),
            Self::Syntax(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ReadError {}

/// Reads the first complete form from the input
///
/// `Ok(None)` means the input contains nothing but whitespace and comments.
pub fn read_one(source: &str) -> Result<Option<Value>, ReadError> {
    Reader::new(source).read_form()
}

/// Reads every form in the input
pub fn read_all(source: &str) -> Result<Vec<Value>, ReadError> {
    let mut reader = Reader::new(source);
    let mut forms = Vec::new();
    while let Some(form) = reader.read_form()? {
        forms.push(form);
    }
    Ok(forms)
}

struct Reader<'a> {
    source: &'a str,
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    fn read_form(&mut self) -> Result<Option<Value>, ReadError> {
        self.skip_whitespace_and_comments();
        let Some(byte) = self.peek() else {
            return Ok(None);
        };
        match byte {
            b'(' => {
                self.position += 1;
                self.read_list().map(Some)
            }
            b')' => Err(ReadError::Syntax("unexpected ')'".into())),
            b'\'' => {
                self.position += 1;
                let quoted = self.require_form()?;
                Ok(Some(Value::list(vec![Value::symbol("quote"), quoted])))
            }
            b'"' => self.read_string().map(Some),
            _ => self.read_atom().map(Some),
        }
    }

    fn require_form(&mut self) -> Result<Value, ReadError> {
        self.read_form()?.ok_or(ReadError::Incomplete)
    }

    fn read_list(&mut self) -> Result<Value, ReadError> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None => return Err(ReadError::Incomplete),
                Some(b')') => {
                    self.position += 1;
                    return Ok(Value::list(items));
                }
                Some(_) => items.push(self.require_form()?),
            }
        }
    }

    fn read_string(&mut self) -> Result<Value, ReadError> {
        self.position += 1;
        let mut contents = String::new();
        loop {
            match self.next_byte() {
                None => return Err(ReadError::Incomplete),
                Some(b'"') => return Ok(Value::string(&contents)),
                Some(b'\\') => match self.next_byte() {
                    None => return Err(ReadError::Incomplete),
                    Some(b'n') => contents.push('\n'),
                    Some(b't') => contents.push('\t'),
                    Some(escaped @ (b'"' | b'\\')) => contents.push(escaped as char),
                    Some(other) => {
                        return Err(ReadError::Syntax(format!(
                            "unknown string escape '\\{}'",
                            other as char
                        )));
                    }
                },
                Some(_) => {
                    // Multi-byte characters pass through untouched; only the
                    // ascii delimiters above are special.
                    let start = self.position - 1;
                    let end = self.end_of_char(start);
                    contents.push_str(&self.source[start..end]);
                    self.position = end;
                }
            }
        }
    }

    fn read_atom(&mut self) -> Result<Value, ReadError> {
        let start = self.position;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() || matches!(byte, b'(' | b')' | b'\'' | b'"' | b';') {
                break;
            }
            self.position += 1;
        }
        let text = &self.source[start..self.position];
        if let Ok(number) = text.parse::<i64>() {
            return Ok(Value::Int(number));
        }
        Ok(match text {
            "nil" => Value::Nil,
            "t" => Value::Bool(true),
            _ => Value::symbol(text),
        })
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() {
                self.position += 1;
            } else if byte == b';' {
                while let Some(byte) = self.peek() {
                    self.position += 1;
                    if byte == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.position).copied()
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.position += 1;
        Some(byte)
    }

    fn end_of_char(&self, start: usize) -> usize {
        let mut end = start + 1;
        while end < self.source.len() && !self.source.is_char_boundary(end) {
            end += 1;
        }
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Value {
        Value::symbol(name)
    }

    #[test]
    fn atoms() {
        assert_eq!(read_one("42").unwrap(), Some(Value::Int(42)));
        assert_eq!(read_one("-7").unwrap(), Some(Value::Int(-7)));
        assert_eq!(read_one("nil").unwrap(), Some(Value::Nil));
        assert_eq!(read_one("t").unwrap(), Some(Value::Bool(true)));
        assert_eq!(read_one("foo-bar").unwrap(), Some(sym("foo-bar")));
        assert_eq!(
            read_one("\"a \\\"b\\\"\"").unwrap(),
            Some(Value::string("a \"b\""))
        );
    }

    #[test]
    fn nested_lists() {
        let form = read_one("(block exit (+ 1 2))").unwrap().unwrap();
        assert_eq!(
            form,
            Value::list(vec![
                sym("block"),
                sym("exit"),
                Value::list(vec![sym("+"), Value::Int(1), Value::Int(2)]),
            ])
        );
    }

    #[test]
    fn quote_expands() {
        assert_eq!(
            read_one("'done").unwrap(),
            Some(Value::list(vec![sym("quote"), sym("done")]))
        );
    }

    #[test]
    fn comments_and_whitespace_only_input_is_empty() {
        assert_eq!(read_one("  ; nothing here\n").unwrap(), None);
    }

    #[test]
    fn unterminated_forms_are_incomplete() {
        assert_eq!(read_one("(catch 'k").unwrap_err(), ReadError::Incomplete);
        assert_eq!(read_one("\"open").unwrap_err(), ReadError::Incomplete);
        assert_eq!(read_one("'").unwrap_err(), ReadError::Incomplete);
    }

    #[test]
    fn stray_close_paren_is_a_syntax_error() {
        assert!(matches!(read_one(")"), Err(ReadError::Syntax(_))));
    }

    #[test]
    fn read_all_returns_every_form() {
        let forms = read_all("1 2 (list 3)").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[0], Value::Int(1));
    }
}
