use bitflags::bitflags;
use tracing::{trace, warn};

use bluepill_interrupts::InterruptSink;
use bluepill_mem::{AccessSize, BusDevice, BusError};

/// NVIC line of the USART1 global interrupt.
pub const USART1_IRQ: u16 = 37;

const SR: u32 = 0x00;
const DR: u32 = 0x04;
const BRR: u32 = 0x08;
const CR1: u32 = 0x0C;

const RX_FIFO_DEPTH: usize = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SrFlags: u32 {
        const TXE = 1 << 7;
        const TC = 1 << 6;
        const RXNE = 1 << 5;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Cr1Flags: u32 {
        const UE = 1 << 13;
        const TXEIE = 1 << 7;
        const TCIE = 1 << 6;
        const RXNEIE = 1 << 5;
        const TE = 1 << 3;
        const RE = 1 << 2;
    }
}

struct RxFifo {
    buf: [u8; RX_FIFO_DEPTH],
    head: usize,
    len: usize,
}

impl RxFifo {
    fn new() -> Self {
        Self {
            buf: [0; RX_FIFO_DEPTH],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) -> bool {
        if self.len == RX_FIFO_DEPTH {
            return false;
        }
        self.buf[(self.head + self.len) % RX_FIFO_DEPTH] = byte;
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % RX_FIFO_DEPTH;
        self.len -= 1;
        Some(byte)
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// USART1 with a callback-driven transmitter and a 16-byte receive FIFO.
///
/// A write to `DR` latches one byte; the next `tick` delivers it through
/// the output callback and raises `TXE|TC` again, so transmission takes
/// one simulation step. Received bytes are injected with
/// [`Usart1::incoming_char`] and drained by guest reads of `DR`.
pub struct Usart1 {
    sr: u32,
    brr: u32,
    cr1: u32,
    tx_pending: Option<u8>,
    rx: RxFifo,
    output: Option<Box<dyn FnMut(u8)>>,
    dropped_rx: u64,
    irq: u16,
}

impl Usart1 {
    pub fn new(irq: u16) -> Self {
        Self {
            sr: (SrFlags::TXE | SrFlags::TC).bits(),
            brr: 0,
            cr1: 0,
            tx_pending: None,
            rx: RxFifo::new(),
            output: None,
            dropped_rx: 0,
            irq,
        }
    }

    /// Back to the power-on register state. The output callback survives,
    /// like the wiring it stands in for.
    pub fn reset(&mut self) {
        self.sr = (SrFlags::TXE | SrFlags::TC).bits();
        self.brr = 0;
        self.cr1 = 0;
        self.tx_pending = None;
        self.rx = RxFifo::new();
        self.dropped_rx = 0;
    }

    /// Replace where transmitted bytes go.
    pub fn set_output<F: FnMut(u8) + 'static>(&mut self, output: F) {
        self.output = Some(Box::new(output));
    }

    fn cr1_flags(&self) -> Cr1Flags {
        Cr1Flags::from_bits_retain(self.cr1)
    }

    /// A byte arrived on the wire. Overflowing the FIFO drops the byte;
    /// either way the receiver is marked non-empty and, when enabled for
    /// it, the interrupt line is pended.
    pub fn incoming_char(&mut self, byte: u8, irq: &mut dyn InterruptSink) {
        if !self.rx.push(byte) {
            self.dropped_rx += 1;
            warn!(byte, dropped = self.dropped_rx, "rx fifo overflow, byte dropped");
        }
        self.sr |= SrFlags::RXNE.bits();
        let cr1 = self.cr1_flags();
        if cr1.contains(Cr1Flags::UE) && cr1.contains(Cr1Flags::RXNEIE) {
            irq.raise(self.irq);
        }
    }

    /// Complete an in-flight transmission: deliver the latched byte to the
    /// output callback and flag the transmitter empty again.
    pub fn tick(&mut self, irq: &mut dyn InterruptSink) {
        let Some(byte) = self.tx_pending.take() else {
            return;
        };
        if let Some(output) = &mut self.output {
            output(byte);
        }
        self.sr |= (SrFlags::TXE | SrFlags::TC).bits();
        let cr1 = self.cr1_flags();
        if cr1.contains(Cr1Flags::UE) && cr1.contains(Cr1Flags::TXEIE) {
            irq.raise(self.irq);
        }
    }

    pub fn status(&self) -> u32 {
        self.sr
    }

    pub fn dropped_rx(&self) -> u64 {
        self.dropped_rx
    }
}

impl BusDevice for Usart1 {
    fn read(&mut self, offset: u32, _size: AccessSize) -> Result<u32, BusError> {
        let value = match offset {
            SR => self.sr,
            DR => {
                let byte = self.rx.pop().unwrap_or(0);
                if self.rx.is_empty() {
                    self.sr &= !SrFlags::RXNE.bits();
                }
                byte.into()
            }
            BRR => self.brr,
            CR1 => self.cr1,
            _ => {
                trace!(offset, "read of unimplemented uart register");
                0
            }
        };
        Ok(value)
    }

    fn write(&mut self, offset: u32, value: u32, size: AccessSize) -> Result<(), BusError> {
        let value = value & size.mask();
        match offset {
            SR => self.sr &= value,
            DR => {
                if self.cr1_flags().contains(Cr1Flags::UE) {
                    self.tx_pending = Some(value as u8);
                    self.sr &= !(SrFlags::TXE | SrFlags::TC).bits();
                } else {
                    trace!("data write while uart disabled, ignored");
                }
            }
            BRR => self.brr = value,
            CR1 => self.cr1 = value,
            _ => trace!(offset, "write to unimplemented uart register"),
        }
        Ok(())
    }
}
