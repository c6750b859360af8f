//! Structural validation of generated code.

use thiserror::Error;

/// A structural problem found in generated code (1-based positions)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxIssue {
    #[error("line {line}, column {column}: unexpected '{found}'")]
    Unexpected { found: char, line: usize, column: usize },

    #[error("line {line}, column {column}: expected '{expected}' but found '{found}'")]
    Mismatched {
        expected: char,
        found: char,
        line: usize,
        column: usize,
    },

    #[error("line {line}, column {column}: '{open}' is never closed")]
    Unclosed { open: char, line: usize, column: usize },

    #[error("line {line}, column {column}: unterminated string literal")]
    UnterminatedString { line: usize, column: usize },
}

/// Validation boundary for generated artifacts
pub trait SyntaxCheck: Send + Sync {
    fn check(&self, code: &str) -> Result<(), SyntaxIssue>;
}

/// Checks that `()`, `[]` and `{}` nest and close correctly.
///
/// String literals (single, double and triple quoted) and `#` comments are
/// skipped. Single-line strings may not run past the end of their line.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterBalance;

#[derive(Clone, Copy)]
struct Open {
    delimiter: char,
    line: usize,
    column: usize,
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

impl SyntaxCheck for DelimiterBalance {
    fn check(&self, code: &str) -> Result<(), SyntaxIssue> {
        let chars: Vec<char> = code.chars().collect();
        let mut stack: Vec<Open> = Vec::new();
        let (mut line, mut column) = (1usize, 0usize);
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            column += 1;

            match c {
                '\n' => {
                    line += 1;
                    column = 0;
                }
                '#' => {
                    while i + 1 < chars.len() && chars[i + 1] != '\n' {
                        i += 1;
                    }
                }
                '\'' | '"' => {
                    let (start_line, start_column) = (line, column);
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    if triple {
                        i += 2;
                        column += 2;
                    }

                    let mut closed = false;
                    while i + 1 < chars.len() {
                        i += 1;
                        column += 1;
                        let s = chars[i];

                        if s == '\\' {
                            if chars.get(i + 1) == Some(&'\n') {
                                line += 1;
                                column = 0;
                            } else {
                                column += 1;
                            }
                            i += 1;
                            continue;
                        }
                        if s == '\n' {
                            if !triple {
                                return Err(SyntaxIssue::UnterminatedString {
                                    line: start_line,
                                    column: start_column,
                                });
                            }
                            line += 1;
                            column = 0;
                            continue;
                        }
                        if s == c {
                            if !triple {
                                closed = true;
                                break;
                            }
                            if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                                i += 2;
                                column += 2;
                                closed = true;
                                break;
                            }
                        }
                    }

                    if !closed {
                        return Err(SyntaxIssue::UnterminatedString {
                            line: start_line,
                            column: start_column,
                        });
                    }
                }
                '(' | '[' | '{' => stack.push(Open {
                    delimiter: c,
                    line,
                    column,
                }),
                ')' | ']' | '}' => match stack.pop() {
                    None => {
                        return Err(SyntaxIssue::Unexpected {
                            found: c,
                            line,
                            column,
                        })
                    }
                    Some(open) if closer_for(open.delimiter) != c => {
                        return Err(SyntaxIssue::Mismatched {
                            expected: closer_for(open.delimiter),
                            found: c,
                            line,
                            column,
                        })
                    }
                    Some(_) => {}
                },
                _ => {}
            }

            i += 1;
        }

        match stack.pop() {
            Some(open) => Err(SyntaxIssue::Unclosed {
                open: open.delimiter,
                line: open.line,
                column: open.column,
            }),
            None => Ok(()),
        }
    }
}
