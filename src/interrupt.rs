use anyhow::Result;

use crate::control::{exec_micro, pulse};
use crate::datapath::{Buses, Datapath};
use crate::isa::{DEFAULT_VECTOR, MEM_SIZE};
use crate::micro;

/// The machine's single interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Irq {
    Input,
}

/// Edge-triggered, non-nesting interrupt controller. Entry happens only
/// at instruction boundaries; an IRQ raised while a handler is running
/// is dropped at raise time.
pub struct InterruptController {
    enabled: bool,
    in_progress: bool,
    pending: Option<Irq>,
    default_vector: u32,
    input_vector: u32,
    entries: u64,
}

impl InterruptController {
    pub fn new() -> InterruptController {
        InterruptController {
            enabled: false,
            in_progress: false,
            pending: None,
            default_vector: DEFAULT_VECTOR,
            input_vector: DEFAULT_VECTOR,
            entries: 0,
        }
    }

    pub fn set_vectors(&mut self, default_vector: u32, input_vector: u32) -> Result<()> {
        anyhow::ensure!(
            (default_vector as usize) < MEM_SIZE && (input_vector as usize) < MEM_SIZE,
            "interrupt vector outside memory"
        );
        self.default_vector = default_vector;
        self.input_vector = input_vector;
        Ok(())
    }

    pub fn raise(&mut self, irq: Irq) {
        if !self.in_progress {
            self.pending = Some(irq);
        }
    }

    pub fn should_interrupt(&self) -> bool {
        self.enabled && self.pending.is_some() && !self.in_progress
    }

    /// The entry tick, run in place of a CU microstep: IP is saved to
    /// SPC through the ALU fan-out and the handler address is latched
    /// into IP from the vector word.
    pub fn enter(&mut self, dp: &mut Datapath, buses: &mut Buses) -> Result<()> {
        let irq = match self.pending.take() {
            Some(irq) => irq,
            None => anyhow::bail!("interrupt entry without a pending request"),
        };
        dp.vector = match irq {
            Irq::Input => self.input_vector,
        };

        exec_micro(&micro::IRQ_ENTER, dp, buses)?;
        pulse(&mut buses.vec_to_ip, dp)?;

        self.in_progress = true;
        self.entries += 1;
        tracing::debug!(vector = dp.vector, "interrupt entry");
        Ok(())
    }

    pub fn finish_handler(&mut self) {
        self.in_progress = false;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }
}

impl Default for InterruptController {
    fn default() -> InterruptController {
        InterruptController::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_dropped_while_in_progress() {
        let mut int = InterruptController::new();
        int.set_enabled(true);
        let mut dp = Datapath::new();
        let mut buses = Buses::new();

        int.raise(Irq::Input);
        assert!(int.should_interrupt());
        int.enter(&mut dp, &mut buses).unwrap();
        assert!(int.in_progress());

        int.raise(Irq::Input);
        assert!(!int.should_interrupt());
        int.finish_handler();
        assert!(!int.should_interrupt());
    }

    #[test]
    fn masked_controller_never_enters() {
        let mut int = InterruptController::new();
        int.raise(Irq::Input);
        assert!(!int.should_interrupt());
        int.set_enabled(true);
        assert!(int.should_interrupt());
    }

    #[test]
    fn entry_saves_ip_and_loads_vector() {
        use crate::datapath::Reg;
        let mut int = InterruptController::new();
        int.set_enabled(true);
        int.set_vectors(0x20, 0x20).unwrap();
        let mut dp = Datapath::new();
        let mut buses = Buses::new();
        dp.regs.set(Reg::Ip, 0x99);

        int.raise(Irq::Input);
        int.enter(&mut dp, &mut buses).unwrap();
        assert_eq!(dp.regs.get(Reg::Spc), 0x99);
        assert_eq!(dp.regs.get(Reg::Ip), 0x20);
        assert_eq!(int.entries(), 1);
    }

    #[test]
    fn vector_outside_memory_is_rejected() {
        let mut int = InterruptController::new();
        assert!(int.set_vectors(0x20, 1 << 24).is_err());
    }
}
