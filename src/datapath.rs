use anyhow::Result;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::alu::{Alu, Flags};
use crate::isa::SP_RESET;
use crate::memory::Memory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reg {
    Acc,
    Ir,
    Ar,
    Dr,
    Ip,
    Sp,
    Spc,
}

pub const REG_COUNT: usize = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFile {
    regs: [u32; REG_COUNT],
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        let mut file = RegisterFile {
            regs: [0; REG_COUNT],
        };
        file.reset();
        file
    }

    pub fn reset(&mut self) {
        self.regs = [0; REG_COUNT];
        self.regs[Reg::Sp as usize] = SP_RESET;
    }

    pub fn get(&self, reg: Reg) -> u32 {
        self.regs[reg as usize]
    }

    pub fn set(&mut self, reg: Reg, value: u32) {
        self.regs[reg as usize] = value;
    }
}

impl Default for RegisterFile {
    fn default() -> RegisterFile {
        RegisterFile::new()
    }
}

/// A word location on the bus. The reference design models latches as
/// live references into registers and memory; here every endpoint is a
/// tag resolved against the owned state at propagation time, which
/// keeps the "gated copy between two locations" semantics without
/// aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    Reg(Reg),
    /// Memory cell addressed by the current AR value.
    MemAtAr,
    /// The ALU result word.
    AluOut,
    /// The control unit's operand word (MUX1 input 2).
    Operand,
    /// The interrupt vector staged for the VEC->IP latch.
    Vector,
    /// Constant zero source.
    Zero,
}

/// All word-level machine state: registers, memory, flags, the ALU
/// result, and the two staged words (operand, vector). Everything the
/// tick loop mutates lives here.
pub struct Datapath {
    pub regs: RegisterFile,
    pub mem: Memory,
    pub flags: Flags,
    pub alu: Alu,
    pub operand: u32,
    pub vector: u32,
}

impl Datapath {
    pub fn new() -> Datapath {
        Datapath {
            regs: RegisterFile::new(),
            mem: Memory::new(),
            flags: Flags::default(),
            alu: Alu::default(),
            operand: 0,
            vector: 0,
        }
    }

    pub fn read(&self, loc: Loc) -> Result<u32> {
        Ok(match loc {
            Loc::Reg(reg) => self.regs.get(reg),
            Loc::MemAtAr => self.mem.read(self.regs.get(Reg::Ar))?,
            Loc::AluOut => self.alu.result(),
            Loc::Operand => self.operand,
            Loc::Vector => self.vector,
            Loc::Zero => 0,
        })
    }

    pub fn write(&mut self, loc: Loc, value: u32) -> Result<()> {
        match loc {
            Loc::Reg(reg) => self.regs.set(reg, value),
            Loc::MemAtAr => self.mem.write(self.regs.get(Reg::Ar), value)?,
            Loc::Operand => self.operand = value,
            Loc::Vector => self.vector = value,
            Loc::AluOut | Loc::Zero => {
                anyhow::bail!("latch target {loc:?} is not writable")
            }
        }
        Ok(())
    }
}

impl Default for Datapath {
    fn default() -> Datapath {
        Datapath::new()
    }
}

/// Ordered input list with a selected index; exposes the selected word.
/// A MUX with no selection drives zero onto its bus.
pub struct Mux {
    inputs: Vec<Loc>,
    selected: Option<usize>,
}

impl Mux {
    pub fn new(inputs: Vec<Loc>) -> Mux {
        Mux {
            inputs,
            selected: None,
        }
    }

    pub fn select(&mut self, index: Option<usize>) -> Result<()> {
        if let Some(i) = index {
            anyhow::ensure!(i < self.inputs.len(), "mux select {i} out of range");
        }
        self.selected = index;
        Ok(())
    }

    pub fn read(&self, dp: &Datapath) -> Result<u32> {
        match self.selected {
            Some(i) => dp.read(self.inputs[i]),
            None => Ok(0),
        }
    }
}

/// A gated one-way copy between two locations.
pub struct Latch {
    source: Loc,
    target: Loc,
    enabled: bool,
}

impl Latch {
    pub fn new(source: Loc, target: Loc) -> Latch {
        Latch {
            source,
            target,
            enabled: false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn propagate(&self, dp: &mut Datapath) -> Result<()> {
        if self.enabled {
            let value = dp.read(self.source)?;
            dp.write(self.target, value)?;
        }
        Ok(())
    }
}

bitflags! {
/// Enable mask for the ALU fan-out latch router, in router order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchMask: u8 {
const ACC = 1 << 0;
const AR  = 1 << 1;
const DR  = 1 << 2;
const IP  = 1 << 3;
const SP  = 1 << 4;
const SPC = 1 << 5;
}
}

/// The ALU result fan-out: one latch per writable register, driven by a
/// per-microstep enable mask and propagated in order.
pub struct LatchRouter {
    latches: Vec<(LatchMask, Latch)>,
}

impl LatchRouter {
    pub fn alu_fanout() -> LatchRouter {
        let route = |bit, reg| (bit, Latch::new(Loc::AluOut, Loc::Reg(reg)));
        LatchRouter {
            latches: vec![
                route(LatchMask::ACC, Reg::Acc),
                route(LatchMask::AR, Reg::Ar),
                route(LatchMask::DR, Reg::Dr),
                route(LatchMask::IP, Reg::Ip),
                route(LatchMask::SP, Reg::Sp),
                route(LatchMask::SPC, Reg::Spc),
            ],
        }
    }

    pub fn set_mask(&mut self, mask: LatchMask) {
        for (bit, latch) in &mut self.latches {
            latch.set_enabled(mask.contains(*bit));
        }
    }

    pub fn propagate(&self, dp: &mut Datapath) -> Result<()> {
        for (_, latch) in &self.latches {
            latch.propagate(dp)?;
        }
        Ok(())
    }
}

/// The fixed bus topology: the two MUXes feeding the ALU, the ALU
/// fan-out router, the memory-bus latches, and the interrupt latches.
pub struct Buses {
    pub mux1: Mux,
    pub mux2: Mux,
    pub alu_fanout: LatchRouter,
    pub mem_to_ir: Latch,
    pub mem_to_dr: Latch,
    pub dr_to_mem: Latch,
    pub spc_to_ip: Latch,
    pub vec_to_ip: Latch,
}

impl Buses {
    pub fn new() -> Buses {
        Buses {
            mux1: Mux::new(vec![
                Loc::Reg(Reg::Acc),
                Loc::Reg(Reg::Ar),
                Loc::Operand,
                Loc::MemAtAr,
            ]),
            mux2: Mux::new(vec![
                Loc::Reg(Reg::Acc),
                Loc::Reg(Reg::Dr),
                Loc::Reg(Reg::Ip),
                Loc::Reg(Reg::Sp),
                Loc::Zero,
            ]),
            alu_fanout: LatchRouter::alu_fanout(),
            mem_to_ir: Latch::new(Loc::MemAtAr, Loc::Reg(Reg::Ir)),
            mem_to_dr: Latch::new(Loc::MemAtAr, Loc::Reg(Reg::Dr)),
            dr_to_mem: Latch::new(Loc::Reg(Reg::Dr), Loc::MemAtAr),
            spc_to_ip: Latch::new(Loc::Reg(Reg::Spc), Loc::Reg(Reg::Ip)),
            vec_to_ip: Latch::new(Loc::Vector, Loc::Reg(Reg::Ip)),
        }
    }
}

impl Default for Buses {
    fn default() -> Buses {
        Buses::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_reset_with_sp_at_top() {
        let regs = RegisterFile::new();
        assert_eq!(regs.get(Reg::Sp), SP_RESET);
        assert_eq!(regs.get(Reg::Acc), 0);
    }

    #[test]
    fn deselected_mux_drives_zero() {
        let dp = Datapath::new();
        let mut mux = Mux::new(vec![Loc::Reg(Reg::Sp)]);
        assert_eq!(mux.read(&dp).unwrap(), 0);
        mux.select(Some(0)).unwrap();
        assert_eq!(mux.read(&dp).unwrap(), SP_RESET);
        assert!(mux.select(Some(1)).is_err());
    }

    #[test]
    fn latch_copies_only_when_enabled() {
        let mut dp = Datapath::new();
        dp.regs.set(Reg::Acc, 7);
        let mut latch = Latch::new(Loc::Reg(Reg::Acc), Loc::Reg(Reg::Dr));
        latch.propagate(&mut dp).unwrap();
        assert_eq!(dp.regs.get(Reg::Dr), 0);
        latch.set_enabled(true);
        latch.propagate(&mut dp).unwrap();
        assert_eq!(dp.regs.get(Reg::Dr), 7);
    }

    #[test]
    fn router_mask_selects_targets() {
        let mut dp = Datapath::new();
        let mut router = LatchRouter::alu_fanout();
        dp.alu.perform(
            crate::alu::AluOp::Nop,
            0,
            9,
            false,
            &mut Flags::default(),
        );
        router.set_mask(LatchMask::ACC | LatchMask::AR);
        router.propagate(&mut dp).unwrap();
        assert_eq!(dp.regs.get(Reg::Acc), 9);
        assert_eq!(dp.regs.get(Reg::Ar), 9);
        assert_eq!(dp.regs.get(Reg::Dr), 0);
        assert_eq!(dp.regs.get(Reg::Sp), SP_RESET);
    }

    #[test]
    fn mem_at_ar_reads_through_address_register() {
        let mut dp = Datapath::new();
        dp.mem.write(0x42, 0xABCD).unwrap();
        dp.regs.set(Reg::Ar, 0x42);
        assert_eq!(dp.read(Loc::MemAtAr).unwrap(), 0xABCD);
    }
}
