mod helpers;

use std::cell::RefCell;
use std::rc::Rc;

use bluepill_machine::{map, AccessSize};
use helpers::with_vectors;

const RESET: u32 = map::FLASH_BASE + 0x80;

const UART_SR: u32 = map::USART1_BASE;
const UART_DR: u32 = map::USART1_BASE + 0x04;
const UART_CR1: u32 = map::USART1_BASE + 0x0C;

const CR1_UE_TE: u32 = (1 << 13) | (1 << 3);

#[test]
fn one_step_delivers_a_latched_byte_exactly_once() {
    let image = with_vectors(RESET).halfwords(0x80, &[0xE7FE]);
    let mut machine = helpers::boot(&image);

    let out = Rc::new(RefCell::new(Vec::new()));
    let sink = out.clone();
    machine.set_uart_output(move |byte| sink.borrow_mut().push(byte));

    machine.bus_write(UART_CR1, CR1_UE_TE, AccessSize::Word).unwrap();
    machine.bus_write(UART_DR, u32::from(b'Q'), AccessSize::Word).unwrap();

    machine.step().unwrap();
    assert_eq!(out.borrow().as_slice(), b"Q");

    machine.step_n(5).unwrap();
    assert_eq!(out.borrow().as_slice(), b"Q", "no duplicate delivery");
    assert_eq!(
        machine.bus_read(UART_SR, AccessSize::Word) & 0xC0,
        0xC0,
        "TXE|TC set after transmission"
    );
}

#[test]
fn firmware_echo_loop_transmits_received_bytes() {
    // Poll SR.RXNE, read DR, write it back to DR, repeat:
    //   0x80: LDR R3, =USART1        (literal at 0x94)
    //   0x82: LDR R0, [R3, #0]       ; SR
    //   0x84: MOVS R1, #0x20         ; RXNE
    //   0x86: TST R0, R1
    //   0x88: BEQ 0x82
    //   0x8A: LDR R2, [R3, #4]       ; DR read drains the fifo
    //   0x8C: STR R2, [R3, #4]       ; transmit it
    //   0x8E: B 0x82
    let image = with_vectors(RESET)
        .halfwords(
            0x80,
            &[
                0x4B04, // LDR R3, [PC, #16] -> 0x94
                0x6818, // LDR R0, [R3, #0]
                0x2120, // MOVS R1, #0x20
                0x4208, // TST R0, R1
                0xD0FB, // BEQ -10 -> 0x82
                0x685A, // LDR R2, [R3, #4]
                0x605A, // STR R2, [R3, #4]
                0xE7F8, // B -16 -> 0x82
            ],
        )
        .word(0x94, map::USART1_BASE);
    let mut machine = helpers::boot(&image);

    let out = Rc::new(RefCell::new(Vec::new()));
    let sink = out.clone();
    machine.set_uart_output(move |byte| sink.borrow_mut().push(byte));
    machine.bus_write(UART_CR1, CR1_UE_TE, AccessSize::Word).unwrap();

    machine.uart_input(b'h');
    machine.uart_input(b'i');
    machine.step_n(64).unwrap();

    assert_eq!(out.borrow().as_slice(), b"hi");
}
