//! Per-opcode microstep sequences. Each microstep is one tick's worth
//! of control signals: MUX selects, ALU operation, flag-write request,
//! latch-enable mask, memory-bus signal, and a side effect for the
//! handful of opcodes that touch control state directly.

use crate::alu::AluOp;
use crate::alu::Flags;
use crate::datapath::LatchMask;
use crate::isa::Opcode;

pub const MUX1_ACC: u8 = 0;
pub const MUX1_AR: u8 = 1;
pub const MUX1_OPERAND: u8 = 2;
pub const MUX1_MEM: u8 = 3;

pub const MUX2_ACC: u8 = 0;
pub const MUX2_DR: u8 = 1;
pub const MUX2_IP: u8 = 2;
pub const MUX2_SP: u8 = 3;
pub const MUX2_ZERO: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemSignal {
    None,
    MemToIr,
    MemToDr,
    DrToMem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    InterruptsOn,
    InterruptsOff,
    /// Latch SPC back into IP and clear the in-progress flag.
    ReturnFromInterrupt,
}

/// How the instruction continues after its final decode microstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEnd {
    /// Proceed to the IncrementIP state.
    Next,
    /// The sequence wrote IP itself; the instruction is done.
    NoIncrement,
    /// Transition to the Halt state.
    Halt,
}

#[derive(Debug, Clone, Copy)]
pub struct MicroStep {
    pub mux1: Option<u8>,
    pub mux2: u8,
    pub alu: AluOp,
    pub write_flags: bool,
    pub latch: LatchMask,
    pub mem: MemSignal,
    pub effect: Effect,
    pub end: StepEnd,
}

const fn alu_step(mux1: Option<u8>, mux2: u8, alu: AluOp, write_flags: bool, latch: LatchMask) -> MicroStep {
    MicroStep {
        mux1,
        mux2,
        alu,
        write_flags,
        latch,
        mem: MemSignal::None,
        effect: Effect::None,
        end: StepEnd::Next,
    }
}

const fn mem_step(mem: MemSignal) -> MicroStep {
    MicroStep {
        mux1: None,
        mux2: MUX2_ZERO,
        alu: AluOp::Nop,
        write_flags: false,
        latch: LatchMask::empty(),
        mem,
        effect: Effect::None,
        end: StepEnd::Next,
    }
}

const fn effect_step(effect: Effect, end: StepEnd) -> MicroStep {
    MicroStep {
        mux1: None,
        mux2: MUX2_ZERO,
        alu: AluOp::Nop,
        write_flags: false,
        latch: LatchMask::empty(),
        mem: MemSignal::None,
        effect,
        end,
    }
}

const fn with_end(step: MicroStep, end: StepEnd) -> MicroStep {
    MicroStep {
        mux1: step.mux1,
        mux2: step.mux2,
        alu: step.alu,
        write_flags: step.write_flags,
        latch: step.latch,
        mem: step.mem,
        effect: step.effect,
        end,
    }
}

/// Fixed fetch sub-sequence. MUX1 is left undriven (reads 0), so the
/// NOP (left + right) computes IP + 0 and INC computes 0 + IP + 1.
pub const FETCH_AR: MicroStep = alu_step(None, MUX2_IP, AluOp::Nop, false, LatchMask::AR);
pub const FETCH_IR: MicroStep = mem_step(MemSignal::MemToIr);
pub const INCREMENT_IP: MicroStep = alu_step(None, MUX2_IP, AluOp::Inc, false, LatchMask::IP);

/// Interrupt entry, driven by the controller in place of a CU step:
/// SPC captures IP through the ALU fan-out while VEC->IP loads the
/// handler address.
pub const IRQ_ENTER: MicroStep = alu_step(None, MUX2_IP, AluOp::Nop, false, LatchMask::SPC);

const AR_FROM_OPERAND: MicroStep = alu_step(Some(MUX1_OPERAND), MUX2_ZERO, AluOp::Nop, false, LatchMask::AR);
const AR_FROM_SP: MicroStep = alu_step(None, MUX2_SP, AluOp::Nop, false, LatchMask::AR);
const DR_FROM_ACC: MicroStep = alu_step(Some(MUX1_ACC), MUX2_ZERO, AluOp::Nop, false, LatchMask::DR);
const SP_DOWN: MicroStep = alu_step(None, MUX2_SP, AluOp::Dec, false, LatchMask::SP);
const SP_UP: MicroStep = alu_step(None, MUX2_SP, AluOp::Inc, false, LatchMask::SP);
const JUMP_TO_OPERAND: MicroStep = with_end(
    alu_step(Some(MUX1_OPERAND), MUX2_ZERO, AluOp::Nop, false, LatchMask::IP),
    StepEnd::NoIncrement,
);
const IDLE: MicroStep = alu_step(None, MUX2_ZERO, AluOp::Nop, false, LatchMask::empty());

const fn arith(op: AluOp, latch: LatchMask) -> [MicroStep; 3] {
    [
        AR_FROM_OPERAND,
        mem_step(MemSignal::MemToDr),
        alu_step(Some(MUX1_ACC), MUX2_DR, op, true, latch),
    ]
}

const fn acc_unary(op: AluOp) -> [MicroStep; 1] {
    [alu_step(Some(MUX1_ACC), MUX2_ZERO, op, true, LatchMask::ACC)]
}

static ADD: [MicroStep; 3] = arith(AluOp::Add, LatchMask::ACC);
static SUB: [MicroStep; 3] = arith(AluOp::Sub, LatchMask::ACC);
static DIV: [MicroStep; 3] = arith(AluOp::Div, LatchMask::ACC);
static MUL: [MicroStep; 3] = arith(AluOp::Mul, LatchMask::ACC);
static REM: [MicroStep; 3] = arith(AluOp::Rem, LatchMask::ACC);
// CMP updates the flags but leaves the ACC latch closed.
static CMP: [MicroStep; 3] = arith(AluOp::Sub, LatchMask::empty());

static INC: [MicroStep; 1] = acc_unary(AluOp::Inc);
static DEC: [MicroStep; 1] = acc_unary(AluOp::Dec);
static NOT: [MicroStep; 1] = acc_unary(AluOp::Not);
static CLA: [MicroStep; 1] = [alu_step(None, MUX2_ZERO, AluOp::Nop, true, LatchMask::ACC)];

static LDI: [MicroStep; 1] = [alu_step(Some(MUX1_OPERAND), MUX2_ZERO, AluOp::Nop, true, LatchMask::ACC)];
static LD: [MicroStep; 3] = [
    AR_FROM_OPERAND,
    mem_step(MemSignal::MemToDr),
    alu_step(None, MUX2_DR, AluOp::Nop, true, LatchMask::ACC),
];
static LDA: [MicroStep; 5] = [
    AR_FROM_OPERAND,
    mem_step(MemSignal::MemToDr),
    alu_step(None, MUX2_DR, AluOp::Nop, false, LatchMask::AR),
    mem_step(MemSignal::MemToDr),
    alu_step(None, MUX2_DR, AluOp::Nop, true, LatchMask::ACC),
];
static ST: [MicroStep; 3] = [AR_FROM_OPERAND, DR_FROM_ACC, mem_step(MemSignal::DrToMem)];
static STA: [MicroStep; 5] = [
    AR_FROM_OPERAND,
    mem_step(MemSignal::MemToDr),
    alu_step(None, MUX2_DR, AluOp::Nop, false, LatchMask::AR),
    DR_FROM_ACC,
    mem_step(MemSignal::DrToMem),
];

// The stack is addressed through AR like all memory traffic, hence the
// explicit AR <- SP steps.
static PUSH: [MicroStep; 4] = [AR_FROM_SP, DR_FROM_ACC, mem_step(MemSignal::DrToMem), SP_DOWN];
static POP: [MicroStep; 4] = [
    SP_UP,
    AR_FROM_SP,
    mem_step(MemSignal::MemToDr),
    alu_step(None, MUX2_DR, AluOp::Nop, true, LatchMask::ACC),
];

static JMP: [MicroStep; 1] = [JUMP_TO_OPERAND];
static JCC_NOT_TAKEN: [MicroStep; 1] = [IDLE];

static CALL: [MicroStep; 5] = [
    // Return address is the word after the CALL itself; IP still points
    // at the CALL during decode.
    alu_step(None, MUX2_IP, AluOp::Inc, false, LatchMask::DR),
    AR_FROM_SP,
    mem_step(MemSignal::DrToMem),
    SP_DOWN,
    JUMP_TO_OPERAND,
];
static RET: [MicroStep; 4] = [
    SP_UP,
    AR_FROM_SP,
    mem_step(MemSignal::MemToDr),
    with_end(
        alu_step(None, MUX2_DR, AluOp::Nop, false, LatchMask::IP),
        StepEnd::NoIncrement,
    ),
];

static EI: [MicroStep; 1] = [effect_step(Effect::InterruptsOn, StepEnd::Next)];
static DI: [MicroStep; 1] = [effect_step(Effect::InterruptsOff, StepEnd::Next)];
static IRET: [MicroStep; 1] = [effect_step(Effect::ReturnFromInterrupt, StepEnd::NoIncrement)];
static HALT: [MicroStep; 1] = [effect_step(Effect::None, StepEnd::Halt)];

/// Decode-phase sequence for an opcode. Conditional jumps resolve
/// against the current flags: taken behaves as `jmp`, not-taken burns
/// one idle microstep and falls through to IncrementIP.
pub fn sequence(op: Opcode, flags: Flags) -> &'static [MicroStep] {
    if op.is_conditional_jump() {
        return if branch_taken(op, flags) {
            &JMP
        } else {
            &JCC_NOT_TAKEN
        };
    }
    match op {
        Opcode::Add => &ADD,
        Opcode::Sub => &SUB,
        Opcode::Div => &DIV,
        Opcode::Mul => &MUL,
        Opcode::Rem => &REM,
        Opcode::Cmp => &CMP,
        Opcode::Inc => &INC,
        Opcode::Dec => &DEC,
        Opcode::Not => &NOT,
        Opcode::Cla => &CLA,
        Opcode::Ldi => &LDI,
        Opcode::Ld => &LD,
        Opcode::Lda => &LDA,
        Opcode::St => &ST,
        Opcode::Sta => &STA,
        Opcode::Push => &PUSH,
        Opcode::Pop => &POP,
        Opcode::Jmp => &JMP,
        Opcode::Call => &CALL,
        Opcode::Ret => &RET,
        Opcode::Ei => &EI,
        Opcode::Di => &DI,
        Opcode::Iret => &IRET,
        Opcode::Halt => &HALT,
        // Conditional jumps are handled above.
        _ => &JCC_NOT_TAKEN,
    }
}

/// Branch predicates: signed comparisons use N/V/Z, unsigned use C/Z.
pub fn branch_taken(op: Opcode, flags: Flags) -> bool {
    let n = flags.contains(Flags::N);
    let z = flags.contains(Flags::Z);
    let v = flags.contains(Flags::V);
    let c = flags.contains(Flags::C);
    match op {
        Opcode::Jmp => true,
        Opcode::Jz => z,
        Opcode::Jnz => !z,
        Opcode::Jg => !z && (n == v),
        Opcode::Jge => n == v,
        Opcode::Jl => n != v,
        Opcode::Jle => z || (n != v),
        Opcode::Ja => c && !z,
        Opcode::Jae => c,
        Opcode::Jb => !c,
        Opcode::Jbe => !c || z,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_lengths_fix_tick_counts() {
        let flags = Flags::default();
        assert_eq!(sequence(Opcode::Ldi, flags).len(), 1);
        assert_eq!(sequence(Opcode::Add, flags).len(), 3);
        assert_eq!(sequence(Opcode::Ld, flags).len(), 3);
        assert_eq!(sequence(Opcode::Lda, flags).len(), 5);
        assert_eq!(sequence(Opcode::Sta, flags).len(), 5);
        assert_eq!(sequence(Opcode::Push, flags).len(), 4);
        assert_eq!(sequence(Opcode::Call, flags).len(), 5);
        assert_eq!(sequence(Opcode::Ret, flags).len(), 4);
    }

    #[test]
    fn cmp_keeps_the_acc_latch_closed() {
        for step in sequence(Opcode::Cmp, Flags::default()) {
            assert!(!step.latch.contains(LatchMask::ACC));
        }
        assert!(sequence(Opcode::Cmp, Flags::default())[2].write_flags);
    }

    #[test]
    fn jumps_suppress_increment_ip() {
        assert_eq!(sequence(Opcode::Jmp, Flags::default())[0].end, StepEnd::NoIncrement);
        let taken = sequence(Opcode::Jz, Flags::Z);
        assert_eq!(taken[0].end, StepEnd::NoIncrement);
        let not_taken = sequence(Opcode::Jz, Flags::default());
        assert_eq!(not_taken[0].end, StepEnd::Next);
    }

    #[test]
    fn signed_predicates() {
        // After cmp with equal operands: Z and C set.
        let eq = Flags::Z | Flags::C;
        assert!(branch_taken(Opcode::Jge, eq));
        assert!(branch_taken(Opcode::Jle, eq));
        assert!(!branch_taken(Opcode::Jg, eq));
        assert!(!branch_taken(Opcode::Jl, eq));

        // 0 cmp -1: N clear, V clear, C clear (borrow).
        let gt_negative = Flags::empty();
        assert!(branch_taken(Opcode::Jg, gt_negative));

        // -1 cmp 0: N set, V clear.
        let lt = Flags::N | Flags::C;
        assert!(branch_taken(Opcode::Jl, lt));
        assert!(!branch_taken(Opcode::Jge, lt));
    }

    #[test]
    fn unsigned_predicates() {
        // 5 cmp 3: C set (no borrow), Z clear.
        let above = Flags::C;
        assert!(branch_taken(Opcode::Ja, above));
        assert!(branch_taken(Opcode::Jae, above));
        assert!(!branch_taken(Opcode::Jb, above));
        assert!(!branch_taken(Opcode::Jbe, above));

        // 3 cmp 5: C clear.
        let below = Flags::N;
        assert!(branch_taken(Opcode::Jb, below));
        assert!(branch_taken(Opcode::Jbe, below));
        assert!(!branch_taken(Opcode::Ja, below));
    }
}
