use anyhow::Result;
use std::fmt::Write as _;
use std::path::Path;

use crate::isa::{self, Opcode};

/// A program image as produced by the assembler: an 8-byte big-endian
/// header (code size, data size, in words) followed by the word payload.
/// Word `i` of the payload loads to memory address `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub code_size: u32,
    pub data_size: u32,
    pub words: Vec<u32>,
}

impl Image {
    pub fn from_bytes(bytes: &[u8]) -> Result<Image> {
        anyhow::ensure!(bytes.len() >= 8, "image shorter than its header");
        anyhow::ensure!(bytes.len() % 4 == 0, "image is not word-aligned");

        let code_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let data_size = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let expected = (code_size as usize + data_size as usize) * 4;
        anyhow::ensure!(
            bytes.len() - 8 == expected,
            "image payload is {} bytes, header promises {}",
            bytes.len() - 8,
            expected
        );

        let words = bytes[8..]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Image {
            code_size,
            data_size,
            words,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.words.len() * 4);
        out.extend_from_slice(&self.code_size.to_be_bytes());
        out.extend_from_slice(&self.data_size.to_be_bytes());
        for word in &self.words {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out
    }

    pub fn load(path: &Path) -> Result<Image> {
        let bytes = std::fs::read(path)?;
        Image::from_bytes(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Human-readable rendering of the image: one line per word with
    /// address, raw value, and a decoded mnemonic where the word decodes
    /// as an instruction.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "code {} words, data {} words", self.code_size, self.data_size);
        for (addr, &word) in self.words.iter().enumerate() {
            let (byte, operand) = isa::split(word);
            match Opcode::from_byte(byte) {
                Some(op) if (addr as u32) < self.code_size => {
                    if op.has_operand() {
                        let _ = writeln!(out, "{addr:06x}: {word:08x}  {} {operand:#x}", op.mnemonic());
                    } else {
                        let _ = writeln!(out, "{addr:06x}: {word:08x}  {}", op.mnemonic());
                    }
                }
                _ => {
                    let _ = writeln!(out, "{addr:06x}: {word:08x}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::encode;

    #[test]
    fn bytes_round_trip() {
        let img = Image {
            code_size: 2,
            data_size: 1,
            words: vec![encode(Opcode::Jmp, 1), encode(Opcode::Halt, 0), 42],
        };
        let restored = Image::from_bytes(&img.to_bytes()).unwrap();
        assert_eq!(restored, img);
    }

    #[test]
    fn header_mismatch_is_rejected() {
        let mut bytes = Image {
            code_size: 5,
            data_size: 0,
            words: vec![0],
        }
        .to_bytes();
        assert!(Image::from_bytes(&bytes).is_err());
        bytes.pop();
        assert!(Image::from_bytes(&bytes).is_err());
    }

    #[test]
    fn dump_decodes_code_words() {
        let img = Image {
            code_size: 1,
            data_size: 1,
            words: vec![encode(Opcode::Ldi, 7), 0xDEAD],
        };
        let text = img.dump();
        assert!(text.contains("ldi 0x7"));
        assert!(text.contains("0000dead"));
    }
}
