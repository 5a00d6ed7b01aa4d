//! Guest memory for the STM32F103C8T6 system: the on-chip Flash and SRAM
//! containers and the bus that routes CPU accesses to them and to the
//! memory-mapped peripherals.
//!
//! Everything is little-endian and accessed in 1/2/4-byte units, matching
//! what the Cortex-M3 core issues.

mod bus;
mod ram;

pub use bus::{AccessSize, BusDevice, BusError, SystemBus, MAX_REGIONS};
pub use ram::{Flash, ImageError, Sram, FLASH_SIZE, SRAM_SIZE};
