use crate::datapath::{Buses, Datapath, Latch, Reg};
use crate::interrupt::InterruptController;
use crate::isa::{self, Opcode};
use crate::machine::Trap;
use crate::micro::{self, Effect, MemSignal, MicroStep, StepEnd};

/// Control unit states. Every instruction walks FetchAR -> FetchIR ->
/// Decode (1..n microsteps) -> IncrementIP, except the jumps that write
/// IP themselves and `halt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuState {
    FetchAr,
    FetchIr,
    Decode,
    IncrementIp,
    Halt,
}

impl CuState {
    pub fn name(self) -> &'static str {
        match self {
            CuState::FetchAr => "FetchAR",
            CuState::FetchIr => "FetchIR",
            CuState::Decode => "Decode",
            CuState::IncrementIp => "IncrementIP",
            CuState::Halt => "Halt",
        }
    }
}

/// What a single CU tick did, for the execution trace.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    pub state: CuState,
    pub opcode: Option<Opcode>,
    pub microstep: usize,
}

pub struct ControlUnit {
    state: CuState,
    microstep: usize,
    opcode: Option<Opcode>,
}

/// Applies one microstep's control signals to the datapath: MUX
/// selects, ALU operation, fan-out latch mask, and memory-bus pulse.
/// Shared with the interrupt controller's entry step.
pub(crate) fn exec_micro(step: &MicroStep, dp: &mut Datapath, buses: &mut Buses) -> anyhow::Result<()> {
    buses.mux1.select(step.mux1.map(|i| i as usize))?;
    buses.mux2.select(Some(step.mux2 as usize))?;

    let left = buses.mux1.read(dp)?;
    let right = buses.mux2.read(dp)?;
    dp.alu.perform(step.alu, left, right, step.write_flags, &mut dp.flags);

    buses.alu_fanout.set_mask(step.latch);
    buses.alu_fanout.propagate(dp)?;

    match step.mem {
        MemSignal::None => {}
        MemSignal::MemToIr => pulse(&mut buses.mem_to_ir, dp)?,
        MemSignal::MemToDr => pulse(&mut buses.mem_to_dr, dp)?,
        MemSignal::DrToMem => pulse(&mut buses.dr_to_mem, dp)?,
    }
    Ok(())
}

pub(crate) fn pulse(latch: &mut Latch, dp: &mut Datapath) -> anyhow::Result<()> {
    latch.set_enabled(true);
    let result = latch.propagate(dp);
    latch.set_enabled(false);
    result
}

impl ControlUnit {
    pub fn new() -> ControlUnit {
        ControlUnit {
            state: CuState::FetchAr,
            microstep: 0,
            opcode: None,
        }
    }

    pub fn halted(&self) -> bool {
        self.state == CuState::Halt
    }

    /// True between instructions, when interrupt entry may preempt the
    /// next fetch.
    pub fn at_boundary(&self) -> bool {
        self.state == CuState::FetchAr
    }

    /// Advances the machine by one microstep.
    pub fn step(
        &mut self,
        dp: &mut Datapath,
        buses: &mut Buses,
        int: &mut InterruptController,
    ) -> Result<StepInfo, Trap> {
        let mut info = StepInfo {
            state: self.state,
            opcode: self.opcode,
            microstep: self.microstep,
        };

        match self.state {
            CuState::FetchAr => {
                self.run(&micro::FETCH_AR, dp, buses)?;
                self.state = CuState::FetchIr;
            }
            CuState::FetchIr => {
                self.run(&micro::FETCH_IR, dp, buses)?;
                // The IR split is combinational; the operand lands on
                // MUX1 input 2 for the decode steps.
                let (code, operand) = isa::split(dp.regs.get(Reg::Ir));
                let op = Opcode::from_byte(code).ok_or(Trap::UnknownOpcode {
                    code,
                    ip: dp.regs.get(Reg::Ip),
                })?;
                self.opcode = Some(op);
                dp.operand = operand;
                self.state = CuState::Decode;
                self.microstep = 0;
                info.opcode = Some(op);
            }
            CuState::Decode => {
                let op = self.opcode.expect("decode without a fetched opcode");
                let seq = micro::sequence(op, dp.flags);
                let step = seq[self.microstep];
                self.run(&step, dp, buses)?;

                match step.effect {
                    Effect::None => {}
                    Effect::InterruptsOn => int.set_enabled(true),
                    Effect::InterruptsOff => int.set_enabled(false),
                    Effect::ReturnFromInterrupt => {
                        pulse(&mut buses.spc_to_ip, dp).map_err(Trap::bus)?;
                        int.finish_handler();
                    }
                }

                self.microstep += 1;
                if self.microstep == seq.len() {
                    match step.end {
                        StepEnd::Next => {
                            self.state = CuState::IncrementIp;
                        }
                        StepEnd::NoIncrement => {
                            self.finish_instruction(dp);
                        }
                        StepEnd::Halt => {
                            self.state = CuState::Halt;
                        }
                    }
                }
            }
            CuState::IncrementIp => {
                self.run(&micro::INCREMENT_IP, dp, buses)?;
                self.finish_instruction(dp);
            }
            CuState::Halt => {}
        }

        Ok(info)
    }

    fn run(&mut self, step: &MicroStep, dp: &mut Datapath, buses: &mut Buses) -> Result<(), Trap> {
        exec_micro(step, dp, buses).map_err(Trap::bus)
    }

    fn finish_instruction(&mut self, dp: &mut Datapath) {
        // The operand word is stale once its instruction retires.
        dp.operand = 0;
        self.state = CuState::FetchAr;
        self.microstep = 0;
    }
}

impl Default for ControlUnit {
    fn default() -> ControlUnit {
        ControlUnit::new()
    }
}
