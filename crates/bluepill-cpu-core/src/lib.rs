//! Cortex-M3 execution core: Thumb/Thumb-2 fetch-decode-execute, flag
//! computation, and exception entry/exit.
//!
//! The core owns only architectural state. Memory and the interrupt
//! controller are passed into [`CpuCore::step`] by the caller, so tests can
//! drive the core against a flat test bus and the machine can drive it
//! against the real system bus.

mod alu;
mod decode;
mod exceptions;
mod exec;
pub mod mem;
pub mod state;

use thiserror::Error;

pub use bluepill_interrupts::InterruptController;
pub use exceptions::EXC_RETURN_THREAD_MSP;
pub use mem::{CpuBus, FlatTestBus};
pub use state::CpuState;

use state::reg;

/// Why an instruction could not be retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("bus fault at {addr:#010x}")]
    InvalidAddress { addr: u32 },
    #[error("undefined instruction {opcode:#06x} at {pc:#010x}")]
    InvalidInstruction { pc: u32, opcode: u32 },
    #[error("interworking branch to non-Thumb target {target:#010x} at {pc:#010x}")]
    InterworkingFault { pc: u32, target: u32 },
    #[error("exception return {value:#010x} outside an exception handler")]
    SpuriousExceptionReturn { value: u32 },
}

pub struct CpuCore {
    pub state: CpuState,
    /// Set when a handler writes the PC; suppresses the normal advance.
    pc_written: bool,
    /// Latched EXC_RETURN value; the frame is unstacked once the
    /// instruction that loaded it has finished.
    exc_return: Option<u32>,
}

impl CpuCore {
    pub fn new() -> Self {
        Self {
            state: CpuState::new(),
            pc_written: false,
            exc_return: None,
        }
    }

    /// Architectural reset: clear state, then load the initial stack
    /// pointer and reset vector from the bottom of the vector table.
    pub fn reset<B: CpuBus>(&mut self, bus: &mut B) -> Result<(), Fault> {
        self.state = CpuState::new();
        self.pc_written = false;
        self.exc_return = None;
        self.state.set_sp(bus.read_u32(0x0000_0000)?);
        self.state.set_pc(bus.read_u32(0x0000_0004)?);
        Ok(())
    }

    /// Execute one instruction. On return the PC names the next instruction
    /// to execute and `state.cycles` has advanced by one. Any bus fault or
    /// undefined encoding terminates the step with the state as it was when
    /// the fault occurred.
    pub fn step<B: CpuBus, C: InterruptController>(
        &mut self,
        bus: &mut B,
        nvic: &mut C,
    ) -> Result<(), Fault> {
        self.step_inner(bus, nvic)
    }

    /// Enter the most urgent pending exception, if the controller reports
    /// one that may preempt. Stacks the eight-word frame, loads the handler
    /// address from the vector table, and acknowledges the line. Returns
    /// whether an exception was entered.
    pub fn take_pending_exception<B: CpuBus, C: InterruptController>(
        &mut self,
        bus: &mut B,
        nvic: &mut C,
    ) -> Result<bool, Fault> {
        if !self.state.interruptible {
            return Ok(false);
        }
        let Some(irq) = nvic.pending_interrupt() else {
            return Ok(false);
        };
        exceptions::enter(self, bus, nvic, irq)?;
        Ok(true)
    }

    fn step_inner(
        &mut self,
        bus: &mut dyn CpuBus,
        nvic: &mut dyn InterruptController,
    ) -> Result<(), Fault> {
        let pc = self.state.pc();
        let hw1 = bus.read_u16(pc)?;
        self.pc_written = false;
        self.exc_return = None;

        let width = if decode::is_wide(hw1) {
            let hw2 = bus.read_u16(pc.wrapping_add(2))?;
            exec::execute32(self, bus, hw1, hw2)?;
            4
        } else {
            let handler = decode::lookup16(hw1).ok_or(Fault::InvalidInstruction {
                pc,
                opcode: u32::from(hw1),
            })?;
            handler(self, bus, hw1)?;
            2
        };

        if !self.pc_written {
            self.state.r[reg::PC] = pc.wrapping_add(width);
        }
        if let Some(value) = self.exc_return.take() {
            exceptions::exit(self, bus, nvic, value)?;
        }
        self.state.cycles += 1;
        Ok(())
    }

    /// Direct branch: bit 0 of the target is discarded, the step's normal
    /// PC advance is suppressed.
    pub(crate) fn branch_to(&mut self, target: u32) {
        self.state.set_pc(target);
        self.pc_written = true;
    }

    /// PC write with interworking rules, shared by BX and POP {..., PC}.
    /// An EXC_RETURN value is latched for unstacking; a target without the
    /// Thumb bit is a fault (the Cortex-M3 never leaves Thumb state).
    pub(crate) fn write_pc_interworking(&mut self, pc: u32, target: u32) -> Result<(), Fault> {
        if target & exceptions::EXC_RETURN_MASK == exceptions::EXC_RETURN_MASK {
            self.exc_return = Some(target);
            self.pc_written = true;
            Ok(())
        } else if target & 1 == 0 {
            Err(Fault::InterworkingFault { pc, target })
        } else {
            self.branch_to(target);
            Ok(())
        }
    }
}

impl Default for CpuCore {
    fn default() -> Self {
        Self::new()
    }
}
