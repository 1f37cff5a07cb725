use anyhow::Result;

use crate::isa::MEM_SIZE;

/// Flat word-addressed memory. Every access is bounds-checked; the
/// machine treats an out-of-range address as a program bug, not a trap
/// to recover from.
pub struct Memory {
    data: Vec<u32>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory {
            data: vec![0; MEM_SIZE],
        }
    }

    pub fn read(&self, addr: u32) -> Result<u32> {
        self.data
            .get(addr as usize)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("memory read out of bounds at {addr:#08x}"))
    }

    pub fn write(&mut self, addr: u32, value: u32) -> Result<()> {
        match self.data.get_mut(addr as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => anyhow::bail!("memory write out of bounds at {addr:#08x}"),
        }
    }

    pub fn load_words(&mut self, words: &[u32]) -> Result<()> {
        anyhow::ensure!(words.len() <= MEM_SIZE, "program larger than memory");
        self.data[..words.len()].copy_from_slice(words);
        self.data[words.len()..].fill(0);
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Memory {
        Memory::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_in_range() {
        let mut mem = Memory::new();
        mem.write(0x10, 0xAB).unwrap();
        assert_eq!(mem.read(0x10).unwrap(), 0xAB);
    }

    #[test]
    fn out_of_range_fails() {
        let mut mem = Memory::new();
        assert!(mem.read(MEM_SIZE as u32).is_err());
        assert!(mem.write(MEM_SIZE as u32, 1).is_err());
    }
}
