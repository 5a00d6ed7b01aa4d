use bluepill_devices::{Tim2, TIM2_IRQ};
use bluepill_interrupts::InterruptSink;
use bluepill_mem::{AccessSize, BusDevice};

const CR1: u32 = 0x00;
const DIER: u32 = 0x0C;
const SR: u32 = 0x10;
const CNT: u32 = 0x24;
const PSC: u32 = 0x28;
const ARR: u32 = 0x2C;

#[derive(Default)]
struct IrqRecorder {
    raised: Vec<u16>,
}

impl InterruptSink for IrqRecorder {
    fn raise(&mut self, irq: u16) {
        self.raised.push(irq);
    }
}

fn write(tim: &mut Tim2, offset: u32, value: u32) {
    tim.write(offset, value, AccessSize::Word).unwrap();
}

fn read(tim: &mut Tim2, offset: u32) -> u32 {
    tim.read(offset, AccessSize::Word).unwrap()
}

#[test]
fn disabled_timer_ignores_ticks() {
    let mut tim = Tim2::new(TIM2_IRQ);
    let mut sink = IrqRecorder::default();
    write(&mut tim, ARR, 4);

    for _ in 0..100 {
        tim.tick(&mut sink);
    }
    assert_eq!(tim.counter(), 0);
    assert!(sink.raised.is_empty());
}

#[test]
fn overflow_after_exactly_prescaled_arr_ticks() {
    let mut tim = Tim2::new(TIM2_IRQ);
    let mut sink = IrqRecorder::default();
    let (p, n) = (3u32, 5u32);
    write(&mut tim, PSC, p);
    write(&mut tim, ARR, n);
    write(&mut tim, DIER, 1);
    write(&mut tim, CR1, 1);

    let period = (p + 1) * n;
    for _ in 0..period - 1 {
        tim.tick(&mut sink);
    }
    assert_eq!(read(&mut tim, SR) & 1, 0);
    assert!(sink.raised.is_empty());

    tim.tick(&mut sink);
    assert_eq!(tim.counter(), 0);
    assert_eq!(read(&mut tim, SR) & 1, 1);
    assert_eq!(sink.raised, vec![TIM2_IRQ]);
}

#[test]
fn update_interrupt_requires_uie() {
    let mut tim = Tim2::new(TIM2_IRQ);
    let mut sink = IrqRecorder::default();
    write(&mut tim, ARR, 2);
    write(&mut tim, CR1, 1);

    for _ in 0..2 {
        tim.tick(&mut sink);
    }
    assert_eq!(read(&mut tim, SR) & 1, 1, "overflow flag sets regardless");
    assert!(sink.raised.is_empty(), "no interrupt without DIER.UIE");
}

#[test]
fn status_register_is_write_zero_to_clear() {
    let mut tim = Tim2::new(TIM2_IRQ);
    let mut sink = IrqRecorder::default();
    write(&mut tim, ARR, 1);
    write(&mut tim, CR1, 1);
    tim.tick(&mut sink);
    assert_eq!(read(&mut tim, SR) & 1, 1);

    // Writing all-ones preserves, writing zero clears.
    write(&mut tim, SR, 0xFFFF_FFFF);
    assert_eq!(read(&mut tim, SR) & 1, 1);
    write(&mut tim, SR, 0);
    assert_eq!(read(&mut tim, SR), 0);
}

#[test]
fn counter_keeps_running_after_overflow() {
    let mut tim = Tim2::new(TIM2_IRQ);
    let mut sink = IrqRecorder::default();
    write(&mut tim, ARR, 3);
    write(&mut tim, CR1, 1);

    for _ in 0..7 {
        tim.tick(&mut sink);
    }
    // 3 ticks to the first overflow, then 4 more: CNT wrapped once more at
    // tick 6 and advanced to 1.
    assert_eq!(tim.counter(), 1);
}

#[test]
fn zero_arr_never_overflows() {
    let mut tim = Tim2::new(TIM2_IRQ);
    let mut sink = IrqRecorder::default();
    write(&mut tim, ARR, 0);
    write(&mut tim, DIER, 1);
    write(&mut tim, CR1, 1);

    for _ in 0..10 {
        tim.tick(&mut sink);
    }
    assert_eq!(tim.counter(), 10);
    assert_eq!(read(&mut tim, SR), 0);
    assert!(sink.raised.is_empty());
}

#[test]
fn registers_read_back_and_unknown_offsets_are_inert() {
    let mut tim = Tim2::new(TIM2_IRQ);
    write(&mut tim, PSC, 0x1234);
    write(&mut tim, CNT, 7);
    assert_eq!(read(&mut tim, PSC), 0x1234);
    assert_eq!(read(&mut tim, CNT), 7);
    assert_eq!(read(&mut tim, 0x18), 0);
    write(&mut tim, 0x18, 0xFFFF);
    assert_eq!(read(&mut tim, 0x18), 0);
}

#[test]
fn reset_restores_power_on_state_but_keeps_the_line() {
    let mut tim = Tim2::new(TIM2_IRQ);
    let mut sink = IrqRecorder::default();
    write(&mut tim, ARR, 1);
    write(&mut tim, DIER, 1);
    write(&mut tim, CR1, 1);
    tim.tick(&mut sink);

    tim.reset();
    assert_eq!(read(&mut tim, CR1), 0);
    assert_eq!(read(&mut tim, SR), 0);
    assert_eq!(read(&mut tim, ARR), 0xFFFF_FFFF);

    // The interrupt line number survives reset.
    write(&mut tim, ARR, 1);
    write(&mut tim, DIER, 1);
    write(&mut tim, CR1, 1);
    sink.raised.clear();
    tim.tick(&mut sink);
    assert_eq!(sink.raised, vec![TIM2_IRQ]);
}
