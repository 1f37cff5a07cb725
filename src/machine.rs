use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::{InputMode, MachineConfig};
use crate::control::{ControlUnit, StepInfo};
use crate::datapath::{Buses, Datapath, Reg};
use crate::hash::Fnv1a;
use crate::image::Image;
use crate::interrupt::InterruptController;
use crate::io::{self, IoSimulator, ScheduleEntry};

/// Fatal simulator faults. Anything raised inside the tick loop ends
/// the run; a malformed instruction is a program bug, not a trap the
/// program can catch.
#[derive(thiserror::Error, Debug)]
pub enum Trap {
    #[error("unknown opcode {code:#04x} at ip {ip:#08x}")]
    UnknownOpcode { code: u8, ip: u32 },
    #[error("bus fault: {0}")]
    Bus(#[source] anyhow::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tick limit {0} exceeded")]
    TickLimit(u64),
    #[error("no binary loaded")]
    NotLoaded,
}

impl Trap {
    pub(crate) fn bus(source: anyhow::Error) -> Trap {
        Trap::Bus(source)
    }
}

/// What a tick executed, for the trace.
enum TickEvent {
    Cu(StepInfo),
    IrqEnter,
}

/// Ceiling on the tick loop; a program that runs this long without
/// halting is treated as divergent.
pub const MAX_TICKS: u64 = 50_000_000;

/// The assembled processor: datapath, buses, control unit, interrupt
/// controller, and scheduled I/O, advanced tick by tick until halt.
pub struct Machine {
    cfg: MachineConfig,
    dp: Datapath,
    buses: Buses,
    cu: ControlUnit,
    int: InterruptController,
    io: IoSimulator,
    tick: u64,
    data_start: u32,
    loaded: bool,
    hasher: Fnv1a,
    log_writer: Option<BufWriter<File>>,
    out_writer: Option<BufWriter<File>>,
}

impl Machine {
    /// Builds a machine from a run configuration, reading the input
    /// schedule and opening the configured output files.
    pub fn from_config(cfg: MachineConfig) -> Result<Machine> {
        let schedule = match (cfg.input_mode, &cfg.input_file) {
            (InputMode::None, _) | (_, None) => Vec::new(),
            (InputMode::Token, Some(path)) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to open input file {}", path.display()))?;
                io::parse_token_schedule(&text)?
            }
            (InputMode::Stream, Some(path)) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to open input file {}", path.display()))?;
                let start = cfg
                    .schedule_start
                    .context("stream input requires schedule_start")?;
                let offset = cfg
                    .schedule_offset
                    .context("stream input requires schedule_offset")?;
                io::stream_schedule(&text, start, offset)
            }
        };

        let log_writer = cfg
            .log_file
            .as_ref()
            .map(|p| File::create(p).map(BufWriter::new))
            .transpose()
            .context("failed to create log file")?;
        let out_writer = cfg
            .output_file
            .as_ref()
            .map(|p| File::create(p).map(BufWriter::new))
            .transpose()
            .context("failed to create output file")?;

        Ok(Machine {
            cfg,
            dp: Datapath::new(),
            buses: Buses::new(),
            cu: ControlUnit::new(),
            int: InterruptController::new(),
            io: IoSimulator::new(schedule),
            tick: 0,
            data_start: 0,
            loaded: false,
            hasher: Fnv1a::new(),
            log_writer,
            out_writer,
        })
    }

    /// A machine with no files attached, fed directly with a schedule.
    pub fn with_input(schedule: Vec<ScheduleEntry>) -> Machine {
        let mut machine =
            Machine::from_config(MachineConfig::default()).expect("default config cannot fail");
        machine.io = IoSimulator::new(schedule);
        machine
    }

    pub fn new() -> Machine {
        Machine::with_input(Vec::new())
    }

    pub fn load_image(&mut self, image: &Image) -> Result<()> {
        self.dp.mem.load_words(&image.words)?;
        self.dp.regs.reset();
        self.data_start = image.code_size;
        self.loaded = true;

        if let Some(path) = &self.cfg.binary_repr_file {
            std::fs::write(path, image.dump())
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        tracing::debug!(
            code = image.code_size,
            data = image.data_size,
            "binary image loaded"
        );
        Ok(())
    }

    pub fn load_binary(&mut self, path: &Path) -> Result<()> {
        let image = Image::load(path)
            .with_context(|| format!("failed to load binary {}", path.display()))?;
        self.load_image(&image)
    }

    /// Runs to halt, then writes the log trailer and the hash file.
    pub fn run(&mut self) -> Result<(), Trap> {
        if !self.loaded {
            return Err(Trap::NotLoaded);
        }
        while !self.cu.halted() {
            if self.tick >= MAX_TICKS {
                return Err(Trap::TickLimit(MAX_TICKS));
            }
            self.tick_once()?;
        }
        self.finalize()?;
        Ok(())
    }

    /// One tick: scheduled input, one control step (interrupt entry
    /// preempts the CU at instruction boundaries), output drain, trace.
    fn tick_once(&mut self) -> Result<(), Trap> {
        self.io
            .feed(self.tick, &mut self.int, &mut self.dp.mem)
            .map_err(Trap::bus)?;

        let event = if self.cu.at_boundary() && self.int.should_interrupt() {
            self.int
                .enter(&mut self.dp, &mut self.buses)
                .map_err(Trap::bus)?;
            TickEvent::IrqEnter
        } else {
            let info = self.cu.step(&mut self.dp, &mut self.buses, &mut self.int)?;
            TickEvent::Cu(info)
        };

        if let Some(byte) = self
            .io
            .drain(self.tick, &mut self.dp.mem)
            .map_err(Trap::bus)?
        {
            if let Some(writer) = &mut self.out_writer {
                writer.write_all(&[byte])?;
            }
        }

        let line = self.trace_line(&event);
        self.append_log(&line)?;
        self.tick += 1;
        Ok(())
    }

    fn trace_line(&self, event: &TickEvent) -> String {
        let (unit, op, microstep) = match event {
            TickEvent::Cu(info) => (
                info.state.name(),
                info.opcode.map(|o| o.mnemonic()).unwrap_or("---"),
                info.microstep,
            ),
            TickEvent::IrqEnter => ("IrqEnter", "---", 0),
        };
        let regs = &self.dp.regs;
        format!(
            "tick {:>6} | {:<11} | op={:<4} mstep={} | acc={:08x} ir={:08x} ar={:06x} dr={:08x} ip={:06x} sp={:06x} spc={:06x} | nzvc={} ie={} ipc={}\n",
            self.tick,
            unit,
            op,
            microstep,
            regs.get(Reg::Acc),
            regs.get(Reg::Ir),
            regs.get(Reg::Ar),
            regs.get(Reg::Dr),
            regs.get(Reg::Ip),
            regs.get(Reg::Sp),
            regs.get(Reg::Spc),
            self.dp.flags.trace_bits(),
            self.int.enabled() as u8,
            self.int.in_progress() as u8,
        )
    }

    fn append_log(&mut self, line: &str) -> Result<(), Trap> {
        self.hasher.update(line.as_bytes());
        if let Some(writer) = &mut self.log_writer {
            writer.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), Trap> {
        let trailer = format!(
            "halted at tick {}\noutput tokens: {}\n",
            self.tick,
            self.io.render_output_tokens()
        );
        self.append_log(&trailer)?;

        if let Some(writer) = &mut self.log_writer {
            writer.flush()?;
        }
        if let Some(writer) = &mut self.out_writer {
            writer.flush()?;
        }
        if let Some(path) = &self.cfg.log_hash_file {
            std::fs::write(path, self.hasher.hex())?;
        }
        Ok(())
    }

    // Observers, mainly for tests and embedding.

    pub fn acc(&self) -> u32 {
        self.dp.regs.get(Reg::Acc)
    }

    pub fn reg(&self, reg: Reg) -> u32 {
        self.dp.regs.get(reg)
    }

    pub fn flags(&self) -> crate::alu::Flags {
        self.dp.flags
    }

    pub fn mem_read(&self, addr: u32) -> Result<u32> {
        self.dp.mem.read(addr)
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn data_start(&self) -> u32 {
        self.data_start
    }

    pub fn halted(&self) -> bool {
        self.cu.halted()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(self.io.output_bytes()).into_owned()
    }

    pub fn output_tokens(&self) -> &[(u64, char)] {
        self.io.output_tokens()
    }

    pub fn interrupt_entries(&self) -> u64 {
        self.int.entries()
    }

    pub fn interrupt_in_progress(&self) -> bool {
        self.int.in_progress()
    }

    pub fn log_hash(&self) -> u64 {
        self.hasher.value()
    }

    pub fn log_hash_hex(&self) -> String {
        self.hasher.hex()
    }
}

impl Default for Machine {
    fn default() -> Machine {
        Machine::new()
    }
}
