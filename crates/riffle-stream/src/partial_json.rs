//! Repair of truncated JSON documents.
//!
//! [`repair_json`] scans the input once, left to right, keeping a stack of
//! parser states and the byte offset through which the text is a valid JSON
//! prefix that can be closed. When the scan ends (input exhausted or a
//! grammar violation) the text is cut back to that offset and every open
//! structure is closed innermost first.

use serde_json::Value;

const LITERALS: [&str; 3] = ["true", "false", "null"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectPhase {
    KeyOrEnd,
    Key,
    CommaOrEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayPhase {
    ValueOrEnd,
    Value,
    CommaOrEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberPhase {
    Sign,
    Zero,
    Integer,
    Dot,
    Fraction,
    Exponent,
    ExponentSign,
    ExponentDigits,
}

impl NumberPhase {
    fn is_complete(self) -> bool {
        matches!(
            self,
            Self::Zero | Self::Integer | Self::Fraction | Self::ExponentDigits
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ValueExpected,
    InString,
    InObjectKey,
    InStringEscape,
    /// `low` is set while reading the second half of a surrogate pair.
    InUnicodeEscape { digits: u8, value: u32, low: bool },
    /// A high surrogate was read; its low half must follow as `\uXXXX`.
    PendingLowSurrogate { backslash: bool },
    InNumber(NumberPhase),
    InLiteral { start: usize },
    InObject(ObjectPhase),
    AfterObjectKey,
    InArray(ArrayPhase),
}

enum Step {
    Consumed,
    Reprocess,
    Halt,
}

struct Scanner<'a> {
    input: &'a str,
    stack: Vec<State>,
    valid_end: usize,
}

/// Closes a possibly truncated JSON document so that it parses.
///
/// Complete documents are returned unchanged. Input that is not JSON at all
/// yields the repair of its longest valid prefix, which may be empty.
pub fn repair_json(input: &str) -> String {
    let mut scanner = Scanner {
        input,
        stack: vec![State::ValueExpected],
        valid_end: 0,
    };
    if scanner.scan() {
        return input.to_string();
    }
    scanner.close()
}

/// Parses `text` as JSON, falling back to its repaired form.
pub fn parse_partial_json(text: &str) -> Option<Value> {
    serde_json::from_str(text)
        .ok()
        .or_else(|| serde_json::from_str(&repair_json(text)).ok())
}

fn is_json_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r')
}

impl Scanner<'_> {
    /// Returns `true` when the whole input is one complete document.
    fn scan(&mut self) -> bool {
        let mut chars = self.input.char_indices().peekable();
        while let Some(&(index, ch)) = chars.peek() {
            match self.step(index, ch) {
                Step::Consumed => {
                    chars.next();
                }
                Step::Reprocess => {}
                Step::Halt => return false,
            }
        }
        self.stack.is_empty()
    }

    fn step(&mut self, index: usize, ch: char) -> Step {
        let end = index + ch.len_utf8();
        let Some(state) = self.stack.last().copied() else {
            return if is_json_whitespace(ch) {
                Step::Consumed
            } else {
                Step::Halt
            };
        };

        match state {
            State::ValueExpected => self.begin_value(index, end, ch),
            State::InString | State::InObjectKey => match ch {
                '"' => {
                    self.stack.pop();
                    if state == State::InString {
                        self.valid_end = end;
                        self.complete_value();
                    } else {
                        self.stack.push(State::AfterObjectKey);
                    }
                    Step::Consumed
                }
                '\\' => {
                    self.stack.push(State::InStringEscape);
                    Step::Consumed
                }
                c if (c as u32) < 0x20 => Step::Halt,
                _ => {
                    if state == State::InString {
                        self.valid_end = end;
                    }
                    Step::Consumed
                }
            },
            State::InStringEscape => match ch {
                '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' => {
                    self.stack.pop();
                    self.extend_string(end);
                    Step::Consumed
                }
                'u' => {
                    self.replace_top(State::InUnicodeEscape {
                        digits: 0,
                        value: 0,
                        low: false,
                    });
                    Step::Consumed
                }
                _ => Step::Halt,
            },
            State::InUnicodeEscape { digits, value, low } => {
                let Some(digit) = ch.to_digit(16) else {
                    return Step::Halt;
                };
                let value = (value << 4) | digit;
                if digits < 3 {
                    self.replace_top(State::InUnicodeEscape {
                        digits: digits + 1,
                        value,
                        low,
                    });
                    return Step::Consumed;
                }
                let is_low_surrogate = (0xDC00..=0xDFFF).contains(&value);
                if low != is_low_surrogate {
                    return Step::Halt;
                }
                if (0xD800..=0xDBFF).contains(&value) {
                    self.replace_top(State::PendingLowSurrogate { backslash: false });
                } else {
                    self.stack.pop();
                    self.extend_string(end);
                }
                Step::Consumed
            }
            State::PendingLowSurrogate { backslash } => match (backslash, ch) {
                (false, '\\') => {
                    self.replace_top(State::PendingLowSurrogate { backslash: true });
                    Step::Consumed
                }
                (true, 'u') => {
                    self.replace_top(State::InUnicodeEscape {
                        digits: 0,
                        value: 0,
                        low: true,
                    });
                    Step::Consumed
                }
                _ => Step::Halt,
            },
            State::InNumber(phase) => self.continue_number(phase, end, ch),
            State::InLiteral { start } => {
                let candidate = &self.input[start..end];
                if LITERALS.iter().any(|literal| literal.starts_with(candidate)) {
                    self.valid_end = end;
                    return Step::Consumed;
                }
                if LITERALS.contains(&&self.input[start..index]) {
                    self.stack.pop();
                    self.complete_value();
                    return Step::Reprocess;
                }
                Step::Halt
            }
            State::InObject(phase) => match ch {
                c if is_json_whitespace(c) => Step::Consumed,
                '"' if matches!(phase, ObjectPhase::KeyOrEnd | ObjectPhase::Key) => {
                    self.stack.push(State::InObjectKey);
                    Step::Consumed
                }
                '}' if matches!(phase, ObjectPhase::KeyOrEnd | ObjectPhase::CommaOrEnd) => {
                    self.stack.pop();
                    self.valid_end = end;
                    self.complete_value();
                    Step::Consumed
                }
                ',' if phase == ObjectPhase::CommaOrEnd => {
                    self.replace_top(State::InObject(ObjectPhase::Key));
                    Step::Consumed
                }
                _ => Step::Halt,
            },
            State::AfterObjectKey => match ch {
                c if is_json_whitespace(c) => Step::Consumed,
                ':' => {
                    self.replace_top(State::ValueExpected);
                    Step::Consumed
                }
                _ => Step::Halt,
            },
            State::InArray(phase) => match ch {
                c if is_json_whitespace(c) => Step::Consumed,
                ']' if matches!(phase, ArrayPhase::ValueOrEnd | ArrayPhase::CommaOrEnd) => {
                    self.stack.pop();
                    self.valid_end = end;
                    self.complete_value();
                    Step::Consumed
                }
                ',' if phase == ArrayPhase::CommaOrEnd => {
                    self.replace_top(State::InArray(ArrayPhase::Value));
                    Step::Consumed
                }
                _ if matches!(phase, ArrayPhase::ValueOrEnd | ArrayPhase::Value) => {
                    self.stack.push(State::ValueExpected);
                    Step::Reprocess
                }
                _ => Step::Halt,
            },
        }
    }

    fn begin_value(&mut self, index: usize, end: usize, ch: char) -> Step {
        let next = match ch {
            c if is_json_whitespace(c) => return Step::Consumed,
            '"' => State::InString,
            '{' => State::InObject(ObjectPhase::KeyOrEnd),
            '[' => State::InArray(ArrayPhase::ValueOrEnd),
            '-' => {
                self.replace_top(State::InNumber(NumberPhase::Sign));
                return Step::Consumed;
            }
            '0' => State::InNumber(NumberPhase::Zero),
            '1'..='9' => State::InNumber(NumberPhase::Integer),
            't' | 'f' | 'n' => State::InLiteral { start: index },
            _ => return Step::Halt,
        };
        self.replace_top(next);
        self.valid_end = end;
        Step::Consumed
    }

    fn continue_number(&mut self, phase: NumberPhase, end: usize, ch: char) -> Step {
        let next = match (phase, ch) {
            (NumberPhase::Sign, '0') => NumberPhase::Zero,
            (NumberPhase::Sign, '1'..='9') | (NumberPhase::Integer, '0'..='9') => {
                NumberPhase::Integer
            }
            (NumberPhase::Dot | NumberPhase::Fraction, '0'..='9') => NumberPhase::Fraction,
            (
                NumberPhase::Exponent | NumberPhase::ExponentSign | NumberPhase::ExponentDigits,
                '0'..='9',
            ) => NumberPhase::ExponentDigits,
            (NumberPhase::Zero | NumberPhase::Integer, '.') => NumberPhase::Dot,
            (
                NumberPhase::Zero | NumberPhase::Integer | NumberPhase::Fraction,
                'e' | 'E',
            ) => NumberPhase::Exponent,
            (NumberPhase::Exponent, '+' | '-') => NumberPhase::ExponentSign,
            _ if phase.is_complete() => {
                self.stack.pop();
                self.complete_value();
                return Step::Reprocess;
            }
            _ => return Step::Halt,
        };
        if next.is_complete() {
            self.valid_end = end;
        }
        self.replace_top(State::InNumber(next));
        Step::Consumed
    }

    fn replace_top(&mut self, state: State) {
        if let Some(top) = self.stack.last_mut() {
            *top = state;
        }
    }

    fn extend_string(&mut self, end: usize) {
        if self.stack.last() == Some(&State::InString) {
            self.valid_end = end;
        }
    }

    fn complete_value(&mut self) {
        match self.stack.last_mut() {
            Some(State::InObject(phase)) => *phase = ObjectPhase::CommaOrEnd,
            Some(State::InArray(phase)) => *phase = ArrayPhase::CommaOrEnd,
            _ => {}
        }
    }

    fn close(self) -> String {
        let mut output = self.input[..self.valid_end].to_string();
        for state in self.stack.iter().rev() {
            match state {
                State::InString => output.push('"'),
                State::InObject(_) => output.push('}'),
                State::InArray(_) => output.push(']'),
                State::InLiteral { start } => {
                    let partial = &self.input[*start..self.valid_end];
                    if let Some(literal) = LITERALS
                        .iter()
                        .find(|literal| literal.starts_with(partial))
                    {
                        output.push_str(&literal[partial.len()..]);
                    }
                }
                _ => {}
            }
        }
        output
    }
}
