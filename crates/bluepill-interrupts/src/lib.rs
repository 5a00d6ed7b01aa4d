//! Nested Vectored Interrupt Controller model and the two small traits the
//! rest of the system uses to talk to it: peripherals raise lines through
//! [`InterruptSink`], the CPU core selects and retires exceptions through
//! [`InterruptController`].

use tracing::trace;

/// Number of external interrupt lines on the STM32F103 (IRQ0..IRQ42).
pub const IRQ_LINES: usize = 43;

/// `current_priority` value while no interrupt is active. Every real
/// priority compares below it.
pub const PRIORITY_NONE: u8 = 0xFF;

/// Something that accepts a pending-interrupt request. Peripherals hold no
/// reference to the controller; the machine passes the sink into `tick`.
pub trait InterruptSink {
    fn raise(&mut self, irq: u16);
}

/// The CPU core's view of the interrupt controller.
///
/// `pending_interrupt` must only return a line whose priority is more urgent
/// than every currently active one, so a caller that enters an exception for
/// whatever it returns gets preemption semantics for free.
pub trait InterruptController {
    fn pending_interrupt(&self) -> Option<u16>;
    fn acknowledge(&mut self, irq: u16);
    fn complete(&mut self, irq: u16);
}

/// Per-line state plus the priority of the most urgent active interrupt.
///
/// Lower priority values are more urgent. `current_priority` is
/// [`PRIORITY_NONE`] when no line is active and otherwise the minimum
/// priority across active lines.
pub struct Nvic {
    pending: [bool; IRQ_LINES],
    active: [bool; IRQ_LINES],
    enabled: [bool; IRQ_LINES],
    priority: [u8; IRQ_LINES],
    current_priority: u8,
}

impl Nvic {
    pub fn new() -> Self {
        Self {
            pending: [false; IRQ_LINES],
            active: [false; IRQ_LINES],
            enabled: [false; IRQ_LINES],
            priority: [0; IRQ_LINES],
            current_priority: PRIORITY_NONE,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn set_pending(&mut self, irq: u16) {
        if let Some(p) = self.pending.get_mut(irq as usize) {
            *p = true;
        }
    }

    pub fn clear_pending(&mut self, irq: u16) {
        if let Some(p) = self.pending.get_mut(irq as usize) {
            *p = false;
        }
    }

    pub fn enable_irq(&mut self, irq: u16) {
        if let Some(e) = self.enabled.get_mut(irq as usize) {
            *e = true;
        }
    }

    pub fn disable_irq(&mut self, irq: u16) {
        if let Some(e) = self.enabled.get_mut(irq as usize) {
            *e = false;
        }
    }

    pub fn set_priority(&mut self, irq: u16, priority: u8) {
        if let Some(p) = self.priority.get_mut(irq as usize) {
            *p = priority;
        }
    }

    pub fn is_pending(&self, irq: u16) -> bool {
        self.pending.get(irq as usize).copied().unwrap_or(false)
    }

    pub fn is_active(&self, irq: u16) -> bool {
        self.active.get(irq as usize).copied().unwrap_or(false)
    }

    pub fn is_enabled(&self, irq: u16) -> bool {
        self.enabled.get(irq as usize).copied().unwrap_or(false)
    }

    pub fn priority(&self, irq: u16) -> u8 {
        self.priority.get(irq as usize).copied().unwrap_or(0)
    }

    pub fn current_priority(&self) -> u8 {
        self.current_priority
    }

    /// Select the interrupt to take next: pending, enabled, and more urgent
    /// than the current execution priority. Ties go to the lowest line
    /// number.
    pub fn pending_irq(&self) -> Option<u16> {
        let mut best: Option<u16> = None;
        for irq in 0..IRQ_LINES {
            if !(self.pending[irq] && self.enabled[irq]) {
                continue;
            }
            if self.priority[irq] >= self.current_priority {
                continue;
            }
            match best {
                Some(b) if self.priority[b as usize] <= self.priority[irq] => {}
                _ => best = Some(irq as u16),
            }
        }
        best
    }

    /// The core took `irq`: it is no longer pending, becomes active, and its
    /// priority becomes the execution priority.
    pub fn acknowledge_irq(&mut self, irq: u16) {
        let Some(i) = self.checked_line(irq) else {
            return;
        };
        self.pending[i] = false;
        self.active[i] = true;
        self.current_priority = self.priority[i];
        trace!(irq, priority = self.current_priority, "interrupt acknowledged");
    }

    /// The handler for `irq` returned. Only this ever clears `active`.
    pub fn complete_irq(&mut self, irq: u16) {
        let Some(i) = self.checked_line(irq) else {
            return;
        };
        self.active[i] = false;
        self.current_priority = (0..IRQ_LINES)
            .filter(|&j| self.active[j])
            .map(|j| self.priority[j])
            .min()
            .unwrap_or(PRIORITY_NONE);
        trace!(irq, priority = self.current_priority, "interrupt completed");
    }

    fn checked_line(&self, irq: u16) -> Option<usize> {
        let i = irq as usize;
        (i < IRQ_LINES).then_some(i)
    }
}

impl Default for Nvic {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptSink for Nvic {
    fn raise(&mut self, irq: u16) {
        self.set_pending(irq);
    }
}

impl InterruptController for Nvic {
    fn pending_interrupt(&self) -> Option<u16> {
        self.pending_irq()
    }

    fn acknowledge(&mut self, irq: u16) {
        self.acknowledge_irq(irq);
    }

    fn complete(&mut self, irq: u16) {
        self.complete_irq(irq);
    }
}
