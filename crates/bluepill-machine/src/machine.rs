use std::cell::RefCell;
use std::io::Write as _;
use std::path::Path;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info};

use bluepill_cpu_core::{CpuBus, CpuCore, Fault};
use bluepill_devices::{Tim2, Usart1, TIM2_IRQ, USART1_IRQ};
use bluepill_interrupts::{InterruptSink, Nvic};
use bluepill_mem::{AccessSize, BusDevice, BusError, Flash, ImageError, Sram, SystemBus};

use crate::breakpoints::{BreakpointError, Breakpoints};

/// Guest physical memory map.
pub mod map {
    /// Flash alias the core fetches the vector table through.
    pub const FLASH_ALIAS_BASE: u32 = 0x0000_0000;
    pub const FLASH_BASE: u32 = 0x0800_0000;
    pub const FLASH_REGION_SIZE: u32 = 0x1_0000;
    pub const SRAM_BASE: u32 = 0x2000_0000;
    pub const SRAM_REGION_SIZE: u32 = 0x5000;
    pub const TIM2_BASE: u32 = 0x4000_0000;
    pub const USART1_BASE: u32 = 0x4001_3800;
    pub const PERIPHERAL_REGION_SIZE: u32 = 0x400;
}

/// Why the machine stopped stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StopReason {
    #[error("breakpoint hit")]
    Breakpoint,
    #[error("machine is halted")]
    Halted,
    #[error(transparent)]
    Fault(#[from] Fault),
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("firmware image: {0}")]
    Image(#[from] ImageError),
    #[error(transparent)]
    Fault(#[from] Fault),
}

/// A device the machine ticks once per step and resets with the system.
/// Both operations are optional; a pure bus device can leave the defaults.
pub trait Peripheral: BusDevice {
    fn tick(&mut self, _irq: &mut dyn InterruptSink) {}
    fn reset(&mut self) {}
}

impl Peripheral for Tim2 {
    fn tick(&mut self, irq: &mut dyn InterruptSink) {
        Tim2::tick(self, irq);
    }

    fn reset(&mut self) {
        Tim2::reset(self);
    }
}

impl Peripheral for Usart1 {
    fn tick(&mut self, irq: &mut dyn InterruptSink) {
        Usart1::tick(self, irq);
    }

    fn reset(&mut self) {
        Usart1::reset(self);
    }
}

/// Adapter giving the core its typed little-endian view of the system bus.
struct CoreBus<'a> {
    bus: &'a SystemBus,
}

impl CoreBus<'_> {
    fn read(&self, addr: u32, size: AccessSize) -> Result<u32, Fault> {
        self.bus
            .read(addr, size)
            .map_err(|_| Fault::InvalidAddress { addr })
    }

    fn write(&self, addr: u32, value: u32, size: AccessSize) -> Result<(), Fault> {
        self.bus
            .write(addr, value, size)
            .map_err(|_| Fault::InvalidAddress { addr })
    }
}

impl CpuBus for CoreBus<'_> {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Fault> {
        Ok(self.read(addr, AccessSize::Byte)? as u8)
    }

    fn read_u16(&mut self, addr: u32) -> Result<u16, Fault> {
        Ok(self.read(addr, AccessSize::Half)? as u16)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32, Fault> {
        self.read(addr, AccessSize::Word)
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        self.write(addr, value.into(), AccessSize::Byte)
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<(), Fault> {
        self.write(addr, value.into(), AccessSize::Half)
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        self.write(addr, value, AccessSize::Word)
    }
}

/// The whole emulated system. Owns every subsystem; the only shared
/// handles are the `Rc`s that let a device sit on the bus and in the tick
/// list at the same time.
pub struct Machine {
    cpu: CpuCore,
    nvic: Nvic,
    bus: SystemBus,
    flash: Rc<RefCell<Flash>>,
    sram: Rc<RefCell<Sram>>,
    usart1: Rc<RefCell<Usart1>>,
    peripherals: Vec<Rc<RefCell<dyn Peripheral>>>,
    breakpoints: Breakpoints,
    halted: bool,
    running: bool,
}

impl Machine {
    pub fn new() -> Self {
        let flash = Rc::new(RefCell::new(Flash::new()));
        let sram = Rc::new(RefCell::new(Sram::new()));
        let tim2 = Rc::new(RefCell::new(Tim2::new(TIM2_IRQ)));
        let usart1 = Rc::new(RefCell::new(Usart1::new(USART1_IRQ)));
        usart1.borrow_mut().set_output(|byte| {
            let mut out = std::io::stdout();
            let _ = out.write_all(&[byte]);
            let _ = out.flush();
        });

        let mut bus = SystemBus::new();
        // The map is made of disjoint constant regions; registration only
        // fails if someone breaks `map` itself.
        let regions: [(u32, u32, Rc<RefCell<dyn BusDevice>>); 5] = [
            (map::FLASH_ALIAS_BASE, map::FLASH_REGION_SIZE, flash.clone()),
            (map::FLASH_BASE, map::FLASH_REGION_SIZE, flash.clone()),
            (map::SRAM_BASE, map::SRAM_REGION_SIZE, sram.clone()),
            (map::TIM2_BASE, map::PERIPHERAL_REGION_SIZE, tim2.clone()),
            (map::USART1_BASE, map::PERIPHERAL_REGION_SIZE, usart1.clone()),
        ];
        for (base, size, dev) in regions {
            bus.map(base, size, dev).expect("memory map regions are disjoint");
        }

        let peripherals: Vec<Rc<RefCell<dyn Peripheral>>> = vec![tim2, usart1.clone()];
        let mut machine = Self {
            cpu: CpuCore::new(),
            nvic: Nvic::new(),
            bus,
            flash,
            sram,
            usart1,
            peripherals,
            breakpoints: Breakpoints::new(),
            halted: false,
            running: false,
        };
        // Flash is still blank; this just puts the core in a defined state.
        let _ = machine.reset();
        machine
    }

    /// Load a raw firmware image from disk and reset into it.
    pub fn load_firmware(&mut self, path: &Path) -> Result<usize, MachineError> {
        let loaded = self.flash.borrow_mut().load_file(path)?;
        info!(bytes = loaded, path = %path.display(), "firmware loaded");
        self.reset()?;
        Ok(loaded)
    }

    /// Load a firmware image already in memory and reset into it.
    pub fn load_image(&mut self, image: &[u8]) -> Result<usize, MachineError> {
        let loaded = self.flash.borrow_mut().load_image(image);
        self.reset()?;
        Ok(loaded)
    }

    /// System reset: peripherals, NVIC, SRAM, and core. Flash contents are
    /// preserved.
    pub fn reset(&mut self) -> Result<(), Fault> {
        for p in &self.peripherals {
            p.borrow_mut().reset();
        }
        self.nvic.reset();
        self.sram.borrow_mut().reset();
        let mut core_bus = CoreBus { bus: &self.bus };
        self.cpu.reset(&mut core_bus)?;
        self.halted = false;
        self.running = false;
        debug!(
            sp = format_args!("{:#010x}", self.cpu.state.sp()),
            pc = format_args!("{:#010x}", self.cpu.state.pc()),
            "machine reset"
        );
        Ok(())
    }

    /// One simulation step.
    ///
    /// Interrupt entry is decided first, at the step boundary, so a line
    /// pended by this step's peripheral ticks is taken at the start of the
    /// next step; entering an exception consumes the step. Otherwise the
    /// peripherals tick and the core retires one instruction, and the
    /// breakpoint table is checked against the resulting PC.
    pub fn step(&mut self) -> Result<(), StopReason> {
        if self.halted {
            return Err(StopReason::Halted);
        }

        let mut core_bus = CoreBus { bus: &self.bus };
        let entered = match self.cpu.take_pending_exception(&mut core_bus, &mut self.nvic) {
            Ok(entered) => entered,
            Err(fault) => return Err(self.fail(fault)),
        };

        for p in &self.peripherals {
            p.borrow_mut().tick(&mut self.nvic);
        }

        if !entered {
            let mut core_bus = CoreBus { bus: &self.bus };
            if let Err(fault) = self.cpu.step(&mut core_bus, &mut self.nvic) {
                return Err(self.fail(fault));
            }
        }

        if self.breakpoints.hit(self.cpu.state.pc()) {
            self.halted = true;
            return Err(StopReason::Breakpoint);
        }
        Ok(())
    }

    fn fail(&mut self, fault: Fault) -> StopReason {
        self.halted = true;
        debug!(%fault, pc = format_args!("{:#010x}", self.cpu.state.pc()), "core fault");
        StopReason::Fault(fault)
    }

    /// Step up to `n` times, stopping early on the first non-Ok outcome.
    pub fn step_n(&mut self, n: u64) -> Result<(), StopReason> {
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    /// Resume from a halt and run until something stops the machine.
    pub fn run(&mut self) -> StopReason {
        self.halted = false;
        self.running = true;
        let reason = loop {
            if let Err(reason) = self.step() {
                break reason;
            }
        };
        self.running = false;
        reason
    }

    pub fn halt(&mut self) {
        self.halted = true;
        self.running = false;
    }

    /// Clear a sticky halt without touching any other state.
    pub fn resume(&mut self) {
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn cpu(&self) -> &CpuCore {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut CpuCore {
        &mut self.cpu
    }

    pub fn nvic(&self) -> &Nvic {
        &self.nvic
    }

    pub fn nvic_mut(&mut self) -> &mut Nvic {
        &mut self.nvic
    }

    /// Debug-side bus read; unbacked addresses read as zero.
    pub fn bus_read(&self, addr: u32, size: AccessSize) -> u32 {
        self.bus.read(addr, size).unwrap_or(0)
    }

    pub fn bus_write(&mut self, addr: u32, value: u32, size: AccessSize) -> Result<(), BusError> {
        self.bus.write(addr, value, size)
    }

    /// Register an extra peripheral: mapped onto the bus when `size` is
    /// non-zero, and always appended to the tick list.
    pub fn add_peripheral<P: Peripheral + 'static>(
        &mut self,
        dev: Rc<RefCell<P>>,
        base: u32,
        size: u32,
    ) -> Result<(), BusError> {
        if size != 0 {
            self.bus.map(base, size, dev.clone())?;
        }
        self.peripherals.push(dev);
        Ok(())
    }

    pub fn add_breakpoint(&mut self, addr: u32) -> Result<(), BreakpointError> {
        self.breakpoints.add(addr)
    }

    pub fn remove_breakpoint(&mut self, addr: u32) -> Result<(), BreakpointError> {
        self.breakpoints.remove(addr)
    }

    pub fn breakpoints(&self) -> &[u32] {
        self.breakpoints.as_slice()
    }

    /// A byte arrived on the serial line.
    pub fn uart_input(&mut self, byte: u8) {
        self.usart1.borrow_mut().incoming_char(byte, &mut self.nvic);
    }

    /// Replace where transmitted serial bytes go (stdout by default). The
    /// callback must not drive the machine re-entrantly.
    pub fn set_uart_output<F: FnMut(u8) + 'static>(&mut self, output: F) {
        self.usart1.borrow_mut().set_output(output);
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
