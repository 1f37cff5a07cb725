use anyhow::Result;
use std::fmt::Write as _;

use crate::interrupt::{InterruptController, Irq};
use crate::isa::{INPUT_PORT, OUTPUT_PORT};
use crate::memory::Memory;

/// One scheduled input: at `tick`, raise the input IRQ and place
/// `token` in the input port cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub tick: u64,
    pub token: u32,
}

/// Parses a token-mode schedule: a literal tuple list such as
/// `[(10, 'A'), (12, 66)]`. Char tokens accept `\n \t \\ \' \0`.
pub fn parse_token_schedule(text: &str) -> Result<Vec<ScheduleEntry>> {
    fn skip_ws(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
    }

    let mut chars = text.chars().peekable();
    let mut entries = Vec::new();

    skip_ws(&mut chars);
    anyhow::ensure!(chars.next() == Some('['), "token schedule must start with '['");
    loop {
        skip_ws(&mut chars);
        match chars.peek() {
            Some(']') => {
                chars.next();
                break;
            }
            Some('(') => {
                chars.next();
            }
            other => anyhow::bail!("expected '(' or ']' in token schedule, got {other:?}"),
        }

        skip_ws(&mut chars);
        let mut tick_digits = String::new();
        while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            tick_digits.push(chars.next().unwrap());
        }
        anyhow::ensure!(!tick_digits.is_empty(), "missing tick in token schedule");
        let tick: u64 = tick_digits.parse()?;

        skip_ws(&mut chars);
        anyhow::ensure!(chars.next() == Some(','), "expected ',' after tick");
        skip_ws(&mut chars);

        let token = match chars.peek() {
            Some('\'') => {
                chars.next();
                let c = match chars.next() {
                    Some('\\') => match chars.next() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('\\') => '\\',
                        Some('\'') => '\'',
                        Some('0') => '\0',
                        other => anyhow::bail!("unsupported escape \\{other:?} in token"),
                    },
                    Some(c) => c,
                    None => anyhow::bail!("unterminated char token"),
                };
                anyhow::ensure!(chars.next() == Some('\''), "unterminated char token");
                c as u32
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                    digits.push(chars.next().unwrap());
                }
                digits.parse::<u32>()?
            }
            other => anyhow::bail!("expected char or number token, got {other:?}"),
        };

        skip_ws(&mut chars);
        anyhow::ensure!(chars.next() == Some(')'), "expected ')' after token");
        entries.push(ScheduleEntry { tick, token });

        skip_ws(&mut chars);
        if chars.peek() == Some(&',') {
            chars.next();
        }
    }

    Ok(entries)
}

/// Stream-mode schedule: every character of the text (newlines
/// included), paced from `start` with `offset` ticks between characters.
pub fn stream_schedule(text: &str, start: u64, offset: u64) -> Vec<ScheduleEntry> {
    text.chars()
        .enumerate()
        .map(|(i, c)| ScheduleEntry {
            tick: start + i as u64 * offset,
            token: c as u32,
        })
        .collect()
}

/// Scheduled character input plus the memory-mapped output port.
pub struct IoSimulator {
    schedule: Vec<ScheduleEntry>,
    output_schedule: Vec<(u64, char)>,
    output: Vec<u8>,
}

impl IoSimulator {
    pub fn new(schedule: Vec<ScheduleEntry>) -> IoSimulator {
        IoSimulator {
            schedule,
            output_schedule: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Start-of-tick input feed.
    pub fn feed(&mut self, tick: u64, int: &mut InterruptController, mem: &mut Memory) -> Result<()> {
        for entry in &self.schedule {
            if entry.tick == tick {
                int.raise(Irq::Input);
                mem.write(INPUT_PORT, entry.token)?;
            }
        }
        Ok(())
    }

    /// End-of-tick output drain: a non-zero output port emits its low
    /// byte and is cleared.
    pub fn drain(&mut self, tick: u64, mem: &mut Memory) -> Result<Option<u8>> {
        let word = mem.read(OUTPUT_PORT)?;
        if word == 0 {
            return Ok(None);
        }
        let byte = (word & 0xFF) as u8;
        self.output_schedule.push((tick, byte as char));
        self.output.push(byte);
        mem.write(OUTPUT_PORT, 0)?;
        Ok(Some(byte))
    }

    pub fn output_bytes(&self) -> &[u8] {
        &self.output
    }

    pub fn output_tokens(&self) -> &[(u64, char)] {
        &self.output_schedule
    }

    /// `[(12, 'H'), (14, '\n')]` rendering for the log trailer.
    pub fn render_output_tokens(&self) -> String {
        let mut out = String::from("[");
        for (i, (tick, ch)) in self.output_schedule.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let printable = match ch {
                '\n' => "\\n".to_string(),
                '\t' => "\\t".to_string(),
                c => c.to_string(),
            };
            let _ = write!(out, "({tick}, '{printable}')");
        }
        out.push(']');
        out
    }
}
