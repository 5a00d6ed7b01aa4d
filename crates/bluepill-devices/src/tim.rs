use bitflags::bitflags;
use tracing::trace;

use bluepill_interrupts::InterruptSink;
use bluepill_mem::{AccessSize, BusDevice, BusError};

/// NVIC line of the TIM2 global interrupt.
pub const TIM2_IRQ: u16 = 28;

const CR1: u32 = 0x00;
const DIER: u32 = 0x0C;
const SR: u32 = 0x10;
const CNT: u32 = 0x24;
const PSC: u32 = 0x28;
const ARR: u32 = 0x2C;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Cr1: u32 {
        const CEN = 1 << 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Dier: u32 {
        const UIE = 1 << 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Sr: u32 {
        const UIF = 1 << 0;
    }
}

/// TIM2 up-counter: a prescaler feeding an auto-reload counter whose
/// overflow sets `SR.UIF` and, when `DIER.UIE` is set, pends the update
/// interrupt.
pub struct Tim2 {
    cr1: u32,
    dier: u32,
    sr: u32,
    cnt: u32,
    psc: u32,
    arr: u32,
    /// Input ticks consumed since the counter last advanced.
    prescaler_ticks: u32,
    irq: u16,
}

impl Tim2 {
    pub fn new(irq: u16) -> Self {
        Self {
            cr1: 0,
            dier: 0,
            sr: 0,
            cnt: 0,
            psc: 0,
            arr: 0xFFFF_FFFF,
            prescaler_ticks: 0,
            irq,
        }
    }

    /// Everything returns to its power-on value; the auto-reload register
    /// comes back as all-ones so an enabled-but-unconfigured timer counts
    /// the full 32-bit range.
    pub fn reset(&mut self) {
        *self = Self::new(self.irq);
    }

    /// Advance the timebase by one input tick. Disabled timers ignore the
    /// tick entirely.
    pub fn tick(&mut self, irq: &mut dyn InterruptSink) {
        if !Cr1::from_bits_retain(self.cr1).contains(Cr1::CEN) {
            return;
        }

        self.prescaler_ticks += 1;
        if self.prescaler_ticks <= self.psc {
            return;
        }
        self.prescaler_ticks = 0;

        self.cnt = self.cnt.wrapping_add(1);
        if self.arr > 0 && self.cnt >= self.arr {
            self.cnt = 0;
            self.sr |= Sr::UIF.bits();
            trace!(irq = self.irq, "timer update event");
            if Dier::from_bits_retain(self.dier).contains(Dier::UIE) {
                irq.raise(self.irq);
            }
        }
    }

    pub fn counter(&self) -> u32 {
        self.cnt
    }

    pub fn status(&self) -> u32 {
        self.sr
    }
}

impl BusDevice for Tim2 {
    fn read(&mut self, offset: u32, _size: AccessSize) -> Result<u32, BusError> {
        let value = match offset {
            CR1 => self.cr1,
            DIER => self.dier,
            SR => self.sr,
            CNT => self.cnt,
            PSC => self.psc,
            ARR => self.arr,
            _ => {
                trace!(offset, "read of unimplemented timer register");
                0
            }
        };
        Ok(value)
    }

    fn write(&mut self, offset: u32, value: u32, size: AccessSize) -> Result<(), BusError> {
        let value = value & size.mask();
        match offset {
            CR1 => self.cr1 = value,
            DIER => self.dier = value,
            // Status bits are write-zero-to-clear: writing one preserves.
            SR => self.sr &= value,
            CNT => self.cnt = value,
            PSC => self.psc = value,
            ARR => self.arr = value,
            _ => trace!(offset, "write to unimplemented timer register"),
        }
        Ok(())
    }
}
