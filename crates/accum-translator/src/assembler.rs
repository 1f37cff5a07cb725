//! Two-pass assembler: pass 1 lays out sections and records label
//! offsets, pass 2 resolves operands and materializes the binary image.

use anyhow::{anyhow, Result};
use std::collections::HashMap;

use accum_rs::image::Image;
use accum_rs::isa::{self, Opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Text,
    Data,
}

#[derive(Debug, Clone)]
enum DataAtom {
    Num(u32),
    Label(String),
}

#[derive(Debug, Clone)]
enum DataItem {
    Atoms(Vec<DataAtom>),
    Zero(u32),
}

impl DataItem {
    fn len(&self) -> u32 {
        match self {
            DataItem::Atoms(atoms) => atoms.len() as u32,
            DataItem::Zero(count) => *count,
        }
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn is_number(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_hexdigit());
    }
    if let Some(rest) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        return !rest.is_empty() && rest.chars().all(|c| c == '0' || c == '1');
    }
    let body = text.strip_prefix('-').unwrap_or(text);
    !body.is_empty() && body.chars().all(|c| c.is_ascii_digit())
}

fn parse_number(text: &str) -> Result<u32> {
    let value: i64 = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)?
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2)?
    } else {
        text.parse::<i64>()?
    };
    Ok(value as u32)
}

fn unescape_string(body: &str, lineno: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            bytes.push(c as u8);
            continue;
        }
        match chars.next() {
            Some('0') => bytes.push(b'\0'),
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('\\') => bytes.push(b'\\'),
            Some('"') => bytes.push(b'"'),
            other => {
                return Err(anyhow!(
                    "line {lineno}: unsupported escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                ))
            }
        }
    }
    Ok(bytes)
}

fn parse_data_value(value: &str, lineno: usize) -> Result<DataItem> {
    if let Some(body) = value.strip_prefix('"') {
        let body = body
            .strip_suffix('"')
            .ok_or_else(|| anyhow!("line {lineno}: unterminated string literal"))?;
        let atoms = unescape_string(body, lineno)?
            .into_iter()
            .map(|b| DataAtom::Num(b as u32))
            .collect();
        return Ok(DataItem::Atoms(atoms));
    }
    if let Some(count) = value.strip_prefix(".zero") {
        let count = count.trim();
        let count: i64 = count
            .parse()
            .map_err(|_| anyhow!("line {lineno}: invalid .zero count: {count}"))?;
        anyhow::ensure!(count > 0, "line {lineno}: invalid .zero count: {count}");
        return Ok(DataItem::Zero(count as u32));
    }
    if value.contains(',') {
        let atoms = value
            .split(',')
            .map(|part| {
                let part = part.trim();
                if is_number(part) {
                    parse_number(part).map(DataAtom::Num)
                } else if !part.is_empty() {
                    Ok(DataAtom::Label(part.to_string()))
                } else {
                    Err(anyhow!("line {lineno}: empty value in list"))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(DataItem::Atoms(atoms));
    }
    if is_number(value) {
        return Ok(DataItem::Atoms(vec![DataAtom::Num(parse_number(value)?)]));
    }
    Ok(DataItem::Atoms(vec![DataAtom::Label(value.to_string())]))
}

#[derive(Debug, Default)]
struct Layout {
    text_start: u32,
    text_size: u32,
    data_size: u32,
    text_labels: HashMap<String, u32>,
    data_labels: HashMap<String, u32>,
}

impl Layout {
    fn data_start(&self) -> u32 {
        self.text_start + self.text_size
    }

    fn resolve(&self, operand: &str, lineno: usize) -> Result<u32> {
        if is_number(operand) {
            return parse_number(operand);
        }
        if let Some(off) = self.text_labels.get(operand) {
            return Ok(self.text_start + off);
        }
        if let Some(off) = self.data_labels.get(operand) {
            return Ok(self.data_start() + off);
        }
        Err(anyhow!("line {lineno}: unknown operand label: {operand}"))
    }
}

/// A `.data` line noted during the scan. Data offsets depend on
/// `dataStart = textStart + textSize`, which is only known once the
/// whole text section has been sized, so they resolve afterwards.
enum DataEvent {
    Org(u32),
    Label(String),
    Entry { label: String, len: u32 },
}

/// Pass 1: section layout and label offsets.
fn layout(source: &str) -> Result<Layout> {
    let mut layout = Layout {
        text_start: 1,
        ..Layout::default()
    };
    let mut section = Section::None;
    let mut seen_text = false;
    let mut seen_data = false;
    let mut text_cursor = 0u32;
    let mut data_events: Vec<(usize, DataEvent)> = Vec::new();

    for (i, raw) in source.lines().enumerate() {
        let lineno = i + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if line == ".text" {
            anyhow::ensure!(!seen_text, "line {lineno}: duplicate .text directive");
            seen_text = true;
            section = Section::Text;
            continue;
        }
        if line == ".data" {
            anyhow::ensure!(!seen_data, "line {lineno}: duplicate .data directive");
            seen_data = true;
            section = Section::Data;
            continue;
        }
        if let Some(addr) = line.strip_prefix(".org") {
            let addr = addr.trim();
            anyhow::ensure!(is_number(addr), "line {lineno}: .org must have numeric address: {addr}");
            let addr = parse_number(addr)?;
            match section {
                Section::Text => {
                    if text_cursor == 0 && layout.text_size == 0 {
                        layout.text_start = addr;
                    } else {
                        anyhow::ensure!(
                            addr >= layout.text_start,
                            "line {lineno}: .org before section start"
                        );
                        text_cursor = addr - layout.text_start;
                    }
                }
                Section::Data => {
                    data_events.push((lineno, DataEvent::Org(addr)));
                }
                Section::None => {
                    return Err(anyhow!("line {lineno}: .org outside a section"));
                }
            }
            continue;
        }

        if let Some(label) = line.strip_suffix(':') {
            let label = label.trim().to_string();
            match section {
                Section::Text => {
                    anyhow::ensure!(
                        layout.text_labels.insert(label.clone(), text_cursor).is_none(),
                        "line {lineno}: duplicate label: {label}"
                    );
                }
                Section::Data => data_events.push((lineno, DataEvent::Label(label))),
                Section::None => return Err(anyhow!("line {lineno}: label outside a section")),
            }
            continue;
        }

        match section {
            Section::Text => {
                text_cursor += 1;
                layout.text_size = layout.text_size.max(text_cursor);
            }
            Section::Data => {
                if let Some((label, value)) = line.split_once(':') {
                    let label = label.trim().to_string();
                    let item = parse_data_value(value.trim(), lineno)?;
                    data_events.push((
                        lineno,
                        DataEvent::Entry {
                            label,
                            len: item.len(),
                        },
                    ));
                } else {
                    return Err(anyhow!("line {lineno}: invalid data entry: {line}"));
                }
            }
            Section::None => {
                return Err(anyhow!("line {lineno}: content outside a section: {line}"));
            }
        }
    }

    // dataStart = textStart + textSize, always; a `.org` inside .data
    // only moves the cursor, compensated so values land at their
    // absolute addresses.
    let data_start = layout.data_start();
    let mut data_cursor = 0u32;
    for (lineno, event) in data_events {
        match event {
            DataEvent::Org(addr) => {
                anyhow::ensure!(
                    addr >= data_start,
                    "line {lineno}: .org below the data start"
                );
                data_cursor = addr - data_start;
            }
            DataEvent::Label(label) => {
                anyhow::ensure!(
                    layout.data_labels.insert(label.clone(), data_cursor).is_none(),
                    "line {lineno}: duplicate label: {label}"
                );
            }
            DataEvent::Entry { label, len } => {
                anyhow::ensure!(
                    layout.data_labels.insert(label.clone(), data_cursor).is_none(),
                    "line {lineno}: duplicate label: {label}"
                );
                data_cursor += len;
                layout.data_size = layout.data_size.max(data_cursor);
            }
        }
    }

    Ok(layout)
}

/// Assembles a program text into a binary image. The reset vector at
/// word 0 is a synthesized `jmp _start`.
pub fn assemble(source: &str) -> Result<Image> {
    let layout = layout(source)?;
    let data_start = layout.data_start();
    let code_size = data_start;
    let total = (code_size + layout.data_size) as usize;
    let mut words = vec![0u32; total];

    let mut section = Section::None;
    let mut text_cursor = 0u32;
    let mut data_cursor = 0u32;

    for (i, raw) in source.lines().enumerate() {
        let lineno = i + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() || line == ".text" || line == ".data" || line.ends_with(':') {
            match line {
                ".text" => section = Section::Text,
                ".data" => section = Section::Data,
                _ => {}
            }
            continue;
        }
        if let Some(addr) = line.strip_prefix(".org") {
            let addr = parse_number(addr.trim())?;
            match section {
                Section::Text => {
                    text_cursor = addr.saturating_sub(layout.text_start);
                }
                Section::Data => {
                    data_cursor = addr.saturating_sub(data_start);
                }
                Section::None => {}
            }
            continue;
        }

        match section {
            Section::Text => {
                let mut parts = line.split_whitespace();
                let mnemonic = parts.next().unwrap_or_default().to_lowercase();
                let operand_text = parts.collect::<Vec<_>>().join(" ");
                let op = Opcode::from_mnemonic(&mnemonic)
                    .ok_or_else(|| anyhow!("line {lineno}: unknown opcode: {mnemonic}"))?;
                let operand = if operand_text.is_empty() {
                    0
                } else {
                    layout.resolve(operand_text.trim(), lineno)?
                };
                let addr = layout.text_start + text_cursor;
                words[addr as usize] = isa::encode(op, operand);
                text_cursor += 1;
            }
            Section::Data => {
                let (_, value) = line
                    .split_once(':')
                    .ok_or_else(|| anyhow!("line {lineno}: invalid data entry: {line}"))?;
                match parse_data_value(value.trim(), lineno)? {
                    DataItem::Zero(count) => data_cursor += count,
                    DataItem::Atoms(atoms) => {
                        for atom in atoms {
                            let word = match atom {
                                DataAtom::Num(n) => n,
                                DataAtom::Label(name) => layout.resolve(&name, lineno)?,
                            };
                            words[(data_start + data_cursor) as usize] = word;
                            data_cursor += 1;
                        }
                    }
                }
            }
            Section::None => {}
        }
    }

    let start = *layout
        .text_labels
        .get("_start")
        .ok_or_else(|| anyhow!("missing _start label"))?;
    words[0] = isa::encode(Opcode::Jmp, layout.text_start + start);

    Ok(Image {
        code_size,
        data_size: layout.data_size,
        words,
    })
}
