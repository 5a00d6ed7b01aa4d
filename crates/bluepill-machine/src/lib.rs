//! The assembled STM32F103C8T6 system: CPU core, NVIC, bus, memories, and
//! peripherals wired together and driven one simulation step at a time.

mod breakpoints;
mod machine;

pub use breakpoints::{BreakpointError, Breakpoints, MAX_BREAKPOINTS};
pub use machine::{map, Machine, MachineError, Peripheral, StopReason};

pub use bluepill_cpu_core::{CpuState, Fault};
pub use bluepill_mem::{AccessSize, BusError};
