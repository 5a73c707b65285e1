//! Parser for the Shellflow text form.
//!
//! Grammar (informal): `Seq := Block (';' Block)*` and
//! `Block := Command | '{' Command ('&' Command)* '}'`.
//!
//! Command text is taken verbatim: quotes protect separators, `&&` stays
//! part of the command, and `{` only opens a parallel block at the start of
//! a block position. Malformed input fails with a parse error carrying the
//! offending fragment.

use shellflow_core::error::{FlowError, Result};

use crate::ast::Step;

pub fn parse(input: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    let mut current = String::new();
    // Some while inside a `{...}` block; holds the commands seen so far.
    let mut block: Option<Vec<String>> = None;
    let mut block_start = 0;
    let mut quote: Option<char> = None;
    let mut expect_separator = false;

    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }

        if expect_separator {
            if c.is_whitespace() {
                continue;
            }
            if c == ';' {
                expect_separator = false;
                continue;
            }
            return Err(FlowError::parse(
                fragment_at(input, i),
                "expected ';' after parallel block",
            ));
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '{' if block.is_none() && current.trim().is_empty() => {
                block = Some(Vec::new());
                block_start = i;
                current.clear();
            }
            '}' => match block.take() {
                Some(mut commands) => {
                    push_command(&mut commands, &mut current);
                    if !commands.is_empty() {
                        steps.push(Step::Parallel(
                            commands.into_iter().map(Step::Command).collect(),
                        ));
                    }
                    expect_separator = true;
                }
                None => {
                    return Err(FlowError::parse(
                        fragment_at(input, i),
                        "unbalanced '}'",
                    ));
                }
            },
            '&' if block.is_some() => {
                if matches!(chars.peek(), Some((_, '&'))) {
                    chars.next();
                    current.push_str("&&");
                } else if let Some(commands) = block.as_mut() {
                    push_command(commands, &mut current);
                }
            }
            ';' => match block {
                Some(_) => {
                    return Err(FlowError::parse(
                        fragment_at(input, i),
                        "';' is not a separator inside a parallel block",
                    ));
                }
                None => {
                    if let Some(command) = take_command(&mut current) {
                        steps.push(Step::Command(command));
                    }
                }
            },
            _ => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(FlowError::parse(current.trim(), "unterminated quote"));
    }
    if block.is_some() {
        return Err(FlowError::parse(
            fragment_at(input, block_start),
            "unbalanced '{'",
        ));
    }
    if let Some(command) = take_command(&mut current) {
        steps.push(Step::Command(command));
    }

    Ok(steps)
}

fn take_command(current: &mut String) -> Option<String> {
    let command = current.trim().to_string();
    current.clear();
    if command.is_empty() {
        None
    } else {
        Some(command)
    }
}

fn push_command(commands: &mut Vec<String>, current: &mut String) {
    if let Some(command) = take_command(current) {
        commands.push(command);
    }
}

/// A short, char-boundary-safe excerpt starting at byte offset `i`.
fn fragment_at(input: &str, i: usize) -> String {
    input[i..].chars().take(24).collect()
}
