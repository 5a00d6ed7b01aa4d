//! Exception entry and return.
//!
//! Entry stacks the eight-word Cortex-M frame and vectors through the
//! table at the bottom of the address space. Return is not an opcode: any
//! PC load whose value matches the EXC_RETURN pattern (top 28 bits set)
//! unstacks the frame instead of branching.

use tracing::trace;

use bluepill_interrupts::InterruptController;

use crate::mem::CpuBus;
use crate::state::reg;
use crate::{CpuCore, Fault};

/// A PC value with these bits all set is an exception return, not an
/// address.
pub(crate) const EXC_RETURN_MASK: u32 = 0xFFFF_FFF0;

/// Return to Thread mode using the main stack.
pub const EXC_RETURN_THREAD_MSP: u32 = 0xFFFF_FFF9;

/// External interrupt lines vector after the sixteen system exceptions.
const IRQ0_VECTOR: u32 = 16;

pub(crate) fn enter(
    cpu: &mut CpuCore,
    bus: &mut dyn CpuBus,
    nvic: &mut dyn InterruptController,
    irq: u16,
) -> Result<(), Fault> {
    let frame = [
        cpu.state.r[0],
        cpu.state.r[1],
        cpu.state.r[2],
        cpu.state.r[3],
        cpu.state.r[12],
        cpu.state.lr(),
        cpu.state.pc(),
        cpu.state.xpsr,
    ];
    let sp = cpu.state.sp().wrapping_sub(32);
    for (i, word) in frame.iter().enumerate() {
        bus.write_u32(sp.wrapping_add(4 * i as u32), *word)?;
    }
    cpu.state.set_sp(sp);
    cpu.state.set_lr(EXC_RETURN_THREAD_MSP);

    let handler = bus.read_u32((IRQ0_VECTOR + u32::from(irq)) * 4)?;
    cpu.state.set_pc(handler);

    nvic.acknowledge(irq);
    cpu.state.current_irq = Some(irq);
    trace!(
        irq,
        handler = format_args!("{:#010x}", handler & !1),
        "exception entry"
    );
    Ok(())
}

pub(crate) fn exit(
    cpu: &mut CpuCore,
    bus: &mut dyn CpuBus,
    nvic: &mut dyn InterruptController,
    value: u32,
) -> Result<(), Fault> {
    let Some(irq) = cpu.state.current_irq else {
        return Err(Fault::SpuriousExceptionReturn { value });
    };

    let sp = cpu.state.sp();
    let mut frame = [0u32; 8];
    for (i, word) in frame.iter_mut().enumerate() {
        *word = bus.read_u32(sp.wrapping_add(4 * i as u32))?;
    }

    cpu.state.r[0] = frame[0];
    cpu.state.r[1] = frame[1];
    cpu.state.r[2] = frame[2];
    cpu.state.r[3] = frame[3];
    cpu.state.r[12] = frame[4];
    cpu.state.set_lr(frame[5]);
    cpu.state.r[reg::PC] = frame[6] & !1;
    cpu.state.xpsr = frame[7];
    cpu.state.set_sp(sp.wrapping_add(32));

    nvic.complete(irq);
    cpu.state.current_irq = None;
    trace!(irq, pc = format_args!("{:#010x}", cpu.state.pc()), "exception return");
    Ok(())
}
