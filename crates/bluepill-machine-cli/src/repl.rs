//! Line-oriented interactive driver.

use std::io::{self, BufRead, Write};
use std::path::Path;

use bluepill_machine::{AccessSize, Machine, StopReason};

const DEFAULT_MEM_DUMP: u32 = 64;
const MAX_MEM_DUMP: u32 = 1024;

pub fn run(machine: &mut Machine) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("stm32> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();

        match command {
            "help" => help(),
            "load" => load(machine, &args),
            "run" => run_until_stop(machine),
            "stop" => {
                machine.halt();
                println!("halted at {:#010x}", machine.cpu().state.pc());
            }
            "step" => step(machine, &args),
            "reset" => match machine.reset() {
                Ok(()) => println!("reset; pc={:#010x}", machine.cpu().state.pc()),
                Err(fault) => report_fault(machine, &StopReason::Fault(fault)),
            },
            "reg" => registers(machine),
            "mem" => mem_dump(machine, &args),
            "break" => breakpoints(machine, &args),
            "delete" => delete_breakpoint(machine, &args),
            "uart" => uart_input(machine, &args),
            "quit" => return Ok(()),
            other => eprintln!("unknown command `{other}`; try `help`"),
        }
    }
}

fn help() {
    println!(
        "\
commands:
  load <path>        load a firmware image and reset
  run                execute until a breakpoint or error
  stop               halt the machine
  step [N]           execute N instructions (default 1)
  reset              system reset (flash preserved)
  reg                dump the register file
  mem <addr> [count] hex dump memory (default 64 bytes, max 1024)
  break [addr]       set a breakpoint, or list them
  delete <addr>      remove a breakpoint
  uart <char>        feed one byte into the UART receiver
  quit               leave the emulator"
    );
}

/// Decimal or 0x-prefixed hex.
fn parse_num(text: &str) -> Option<u32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn report_fault(machine: &Machine, reason: &StopReason) {
    eprintln!("error: {reason} (pc={:#010x})", machine.cpu().state.pc());
}

fn load(machine: &mut Machine, args: &[&str]) {
    let Some(path) = args.first() else {
        eprintln!("usage: load <path>");
        return;
    };
    match machine.load_firmware(Path::new(path)) {
        Ok(bytes) => println!("loaded {bytes} bytes; pc={:#010x}", machine.cpu().state.pc()),
        Err(err) => eprintln!("load failed: {err}"),
    }
}

fn run_until_stop(machine: &mut Machine) {
    match machine.run() {
        StopReason::Breakpoint => {
            println!("breakpoint hit at {:#010x}", machine.cpu().state.pc());
        }
        StopReason::Halted => println!("halted"),
        reason => report_fault(machine, &reason),
    }
}

fn step(machine: &mut Machine, args: &[&str]) {
    let count = match args.first() {
        Some(text) => match parse_num(text) {
            Some(n) => u64::from(n),
            None => {
                eprintln!("step: bad count `{text}`");
                return;
            }
        },
        None => 1,
    };

    machine.resume();
    match machine.step_n(count) {
        Ok(()) => println!(
            "pc={:#010x} cycles={}",
            machine.cpu().state.pc(),
            machine.cpu().state.cycles
        ),
        Err(StopReason::Breakpoint) => {
            println!("breakpoint hit at {:#010x}", machine.cpu().state.pc());
        }
        Err(reason) => report_fault(machine, &reason),
    }
}

fn registers(machine: &Machine) {
    let state = &machine.cpu().state;
    for (i, chunk) in state.r[..12].chunks(4).enumerate() {
        let row: Vec<String> = chunk
            .iter()
            .enumerate()
            .map(|(j, v)| format!("r{:<2}={v:#010x}", i * 4 + j))
            .collect();
        println!("  {}", row.join("  "));
    }
    println!(
        "  r12={:#010x}  sp ={:#010x}  lr ={:#010x}  pc ={:#010x}",
        state.r[12],
        state.sp(),
        state.lr(),
        state.pc()
    );
    println!(
        "  xpsr={:#010x} [{}{}{}{}]  cycles={}",
        state.xpsr,
        if state.n() { 'N' } else { '-' },
        if state.z() { 'Z' } else { '-' },
        if state.c() { 'C' } else { '-' },
        if state.v() { 'V' } else { '-' },
        state.cycles
    );
}

fn mem_dump(machine: &Machine, args: &[&str]) {
    let Some(addr) = args.first().and_then(|a| parse_num(a)) else {
        eprintln!("usage: mem <addr> [count]");
        return;
    };
    let count = args
        .get(1)
        .and_then(|a| parse_num(a))
        .unwrap_or(DEFAULT_MEM_DUMP)
        .min(MAX_MEM_DUMP);

    for row_start in (0..count).step_by(16) {
        let row_len = 16.min(count - row_start);
        let bytes: Vec<u8> = (0..row_len)
            .map(|i| machine.bus_read(addr.wrapping_add(row_start + i), AccessSize::Byte) as u8)
            .collect();
        let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = bytes
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    '.'
                }
            })
            .collect();
        println!(
            "  {:#010x}: {:<47}  |{ascii}|",
            addr.wrapping_add(row_start),
            hex.join(" ")
        );
    }
}

fn breakpoints(machine: &mut Machine, args: &[&str]) {
    match args.first() {
        None => {
            if machine.breakpoints().is_empty() {
                println!("no breakpoints");
            }
            for addr in machine.breakpoints() {
                println!("  {addr:#010x}");
            }
        }
        Some(text) => match parse_num(text) {
            Some(addr) => match machine.add_breakpoint(addr) {
                Ok(()) => println!("breakpoint at {addr:#010x}"),
                Err(err) => eprintln!("break: {err}"),
            },
            None => eprintln!("break: bad address `{text}`"),
        },
    }
}

fn delete_breakpoint(machine: &mut Machine, args: &[&str]) {
    let Some(addr) = args.first().and_then(|a| parse_num(a)) else {
        eprintln!("usage: delete <addr>");
        return;
    };
    match machine.remove_breakpoint(addr) {
        Ok(()) => println!("deleted {addr:#010x}"),
        Err(err) => eprintln!("delete: {err}"),
    }
}

fn uart_input(machine: &mut Machine, args: &[&str]) {
    let Some(text) = args.first() else {
        eprintln!("usage: uart <char>");
        return;
    };
    let byte = if text.starts_with("0x") || text.starts_with("0X") {
        match parse_num(text) {
            Some(value) if value <= 0xFF => value as u8,
            _ => {
                eprintln!("uart: bad byte `{text}`");
                return;
            }
        }
    } else {
        match text.bytes().next() {
            Some(byte) => byte,
            None => return,
        }
    };
    machine.uart_input(byte);
}
