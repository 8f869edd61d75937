//! Blocking operator prompts.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

/// Source of operator input lines.
pub trait Prompt {
    /// Show `message` and read one trimmed line. `None` means end of input.
    fn read_line(&mut self, message: &str) -> io::Result<Option<String>>;
}

/// Prompts on stdout and reads from stdin.
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn read_line(&mut self, message: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", message)?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

/// Replays a fixed list of answers. Used by tests and scripted runs.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    /// Prompts shown so far
    pub asked: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }
}

impl Prompt for ScriptedPrompt {
    fn read_line(&mut self, message: &str) -> io::Result<Option<String>> {
        self.asked.push(message.to_string());
        Ok(self.answers.pop_front().map(|a| a.trim().to_string()))
    }
}

fn end_of_input() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "operator input closed")
}

/// Ask until the answer parses as `T`.
pub fn ask_parsed<T, P>(prompt: &mut P, message: &str) -> io::Result<T>
where
    T: FromStr,
    P: Prompt + ?Sized,
{
    loop {
        let line = prompt.read_line(message)?.ok_or_else(end_of_input)?;
        match line.parse::<T>() {
            Ok(value) => return Ok(value),
            Err(_) => println!("Invalid value '{}', try again.", line),
        }
    }
}

/// Ask for a non-empty string.
pub fn ask_string<P>(prompt: &mut P, message: &str) -> io::Result<String>
where
    P: Prompt + ?Sized,
{
    loop {
        let line = prompt.read_line(message)?.ok_or_else(end_of_input)?;
        if !line.is_empty() {
            return Ok(line);
        }
    }
}

/// Ask a yes/no question. Accepts true/false, yes/no, y/n and 1/0.
pub fn ask_bool<P>(prompt: &mut P, message: &str) -> io::Result<bool>
where
    P: Prompt + ?Sized,
{
    loop {
        let line = prompt.read_line(message)?.ok_or_else(end_of_input)?;
        match parse_bool(&line) {
            Some(value) => return Ok(value),
            None => println!("Please answer true or false."),
        }
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
