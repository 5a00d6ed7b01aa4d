use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info, warn};

use bluepill_machine::{AccessSize, Machine};

use crate::protocol;

pub const DEFAULT_PORT: u16 = 3333;

/// `m`/`M` transfers are capped at this many bytes per packet.
const MAX_MEMORY_TRANSFER: u32 = 1024;

/// Cortex-M register description served through qXfer. Register numbers
/// match the order of the `g` packet: r0..r12, sp, lr, pc, xpsr.
const TARGET_XML: &str = r#"<?xml version="1.0"?>
<!DOCTYPE target SYSTEM "gdb-target.dtd">
<target version="1.0">
  <architecture>arm</architecture>
  <feature name="org.gnu.gdb.arm.m-profile">
    <reg name="r0" bitsize="32" regnum="0"/>
    <reg name="r1" bitsize="32" regnum="1"/>
    <reg name="r2" bitsize="32" regnum="2"/>
    <reg name="r3" bitsize="32" regnum="3"/>
    <reg name="r4" bitsize="32" regnum="4"/>
    <reg name="r5" bitsize="32" regnum="5"/>
    <reg name="r6" bitsize="32" regnum="6"/>
    <reg name="r7" bitsize="32" regnum="7"/>
    <reg name="r8" bitsize="32" regnum="8"/>
    <reg name="r9" bitsize="32" regnum="9"/>
    <reg name="r10" bitsize="32" regnum="10"/>
    <reg name="r11" bitsize="32" regnum="11"/>
    <reg name="r12" bitsize="32" regnum="12"/>
    <reg name="sp" bitsize="32" type="data_ptr" regnum="13"/>
    <reg name="lr" bitsize="32" regnum="14"/>
    <reg name="pc" bitsize="32" type="code_ptr" regnum="15"/>
    <reg name="xpsr" bitsize="32" regnum="16"/>
  </feature>
</target>
"#;

/// Blocking RSP server: accepts one debugger at a time and keeps
/// accepting reconnects until the listener itself fails.
pub struct GdbServer {
    listener: TcpListener,
}

impl GdbServer {
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(&self, machine: &mut Machine) -> io::Result<()> {
        loop {
            self.serve_one(machine)?;
        }
    }

    /// Accept a single client and run its session to completion. Client
    /// I/O failures end the session but are not fatal to the server.
    pub fn serve_one(&self, machine: &mut Machine) -> io::Result<()> {
        let (stream, peer) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        info!(%peer, "debugger attached");
        let mut session = Session { stream, machine };
        if let Err(error) = session.run() {
            warn!(%peer, %error, "session ended with an error");
        }
        info!(%peer, "debugger detached");
        Ok(())
    }
}

enum Event {
    Packet(Vec<u8>),
    Interrupt,
    Disconnected,
}

enum Flow {
    Continue,
    EndSession,
}

struct Session<'a> {
    stream: TcpStream,
    machine: &'a mut Machine,
}

impl Session<'_> {
    fn run(&mut self) -> io::Result<()> {
        loop {
            match self.read_event()? {
                Event::Disconnected => return Ok(()),
                Event::Interrupt => {
                    self.machine.halt();
                    self.reply(b"S05")?;
                }
                Event::Packet(payload) => {
                    if let Flow::EndSession = self.dispatch(&payload)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(error) => Err(error),
        }
    }

    fn read_event(&mut self) -> io::Result<Event> {
        loop {
            let Some(byte) = self.read_byte()? else {
                return Ok(Event::Disconnected);
            };
            match byte {
                b'+' | b'-' => {}
                0x03 => return Ok(Event::Interrupt),
                b'$' => {
                    let mut payload = Vec::new();
                    loop {
                        let Some(b) = self.read_byte()? else {
                            return Ok(Event::Disconnected);
                        };
                        if b == b'#' {
                            break;
                        }
                        payload.push(b);
                    }
                    let (Some(hi), Some(lo)) = (self.read_byte()?, self.read_byte()?) else {
                        return Ok(Event::Disconnected);
                    };
                    if protocol::parse_hex_byte(hi, lo) == Some(protocol::checksum(&payload)) {
                        self.stream.write_all(b"+")?;
                        return Ok(Event::Packet(payload));
                    }
                    warn!("packet failed its checksum");
                    self.stream.write_all(b"-")?;
                }
                _ => {}
            }
        }
    }

    fn reply(&mut self, payload: &[u8]) -> io::Result<()> {
        self.stream.write_all(&protocol::encode_packet(payload))
    }

    fn dispatch(&mut self, payload: &[u8]) -> io::Result<Flow> {
        let Ok(text) = std::str::from_utf8(payload) else {
            self.reply(b"")?;
            return Ok(Flow::Continue);
        };
        debug!(packet = text, "rsp command");

        match text {
            "?" => self.reply(b"S05")?,
            "g" => {
                let mut hex = String::with_capacity(17 * 8);
                for n in 0..17 {
                    hex.push_str(&protocol::u32_to_le_hex(self.read_register(n)));
                }
                self.reply(hex.as_bytes())?;
            }
            "qAttached" => self.reply(b"1")?,
            "qC" => self.reply(b"QC0")?,
            "qfThreadInfo" => self.reply(b"m0")?,
            "qsThreadInfo" => self.reply(b"l")?,
            "D" => {
                self.reply(b"OK")?;
                return Ok(Flow::EndSession);
            }
            "k" => return Ok(Flow::EndSession),
            _ => return self.dispatch_prefixed(text),
        }
        Ok(Flow::Continue)
    }

    fn dispatch_prefixed(&mut self, text: &str) -> io::Result<Flow> {
        if let Some(hex) = text.strip_prefix('G') {
            self.write_all_registers(hex)?;
        } else if let Some(arg) = text.strip_prefix('p') {
            match protocol::parse_hex_u32(arg).map(|n| n as usize) {
                Some(n) if n < 17 => {
                    let hex = protocol::u32_to_le_hex(self.read_register(n));
                    self.reply(hex.as_bytes())?;
                }
                _ => self.reply(b"E00")?,
            }
        } else if let Some(arg) = text.strip_prefix('P') {
            self.write_one_register(arg)?;
        } else if let Some(arg) = text.strip_prefix('m') {
            self.read_memory(arg)?;
        } else if let Some(arg) = text.strip_prefix('M') {
            self.write_memory(arg)?;
        } else if let Some(arg) = text.strip_prefix('c') {
            self.set_optional_pc(arg);
            self.continue_until_stop()?;
        } else if let Some(arg) = text.strip_prefix('s') {
            self.set_optional_pc(arg);
            self.machine.resume();
            let outcome = self.machine.step();
            debug!(?outcome, "single step");
            self.reply(b"S05")?;
        } else if let Some(arg) = text.strip_prefix("Z0,") {
            self.insert_breakpoint(arg)?;
        } else if let Some(arg) = text.strip_prefix("z0,") {
            self.remove_breakpoint(arg)?;
        } else if text.starts_with('H') || text.starts_with('T') {
            self.reply(b"OK")?;
        } else if text.starts_with("qSupported") {
            self.reply(b"PacketSize=1000;qXfer:features:read+")?;
        } else if let Some(hex) = text.strip_prefix("qRcmd,") {
            self.monitor_command(hex)?;
        } else if let Some(arg) = text.strip_prefix("qXfer:features:read:target.xml:") {
            self.read_target_xml(arg)?;
        } else {
            // Unknown packets get the empty response the protocol reserves
            // for "not supported".
            self.reply(b"")?;
        }
        Ok(Flow::Continue)
    }

    fn read_register(&self, n: usize) -> u32 {
        let state = &self.machine.cpu().state;
        match n {
            0..=15 => state.r[n],
            _ => state.xpsr,
        }
    }

    fn write_register(&mut self, n: usize, value: u32) {
        let state = &mut self.machine.cpu_mut().state;
        match n {
            15 => state.set_pc(value),
            0..=14 => state.r[n] = value,
            _ => state.xpsr = value,
        }
    }

    fn write_all_registers(&mut self, hex: &str) -> io::Result<()> {
        if hex.len() != 17 * 8 {
            return self.reply(b"E00");
        }
        let mut values = [0u32; 17];
        for (n, slot) in values.iter_mut().enumerate() {
            match protocol::u32_from_le_hex(&hex[n * 8..n * 8 + 8]) {
                Some(value) => *slot = value,
                None => return self.reply(b"E00"),
            }
        }
        for (n, value) in values.iter().enumerate() {
            self.write_register(n, *value);
        }
        self.reply(b"OK")
    }

    fn write_one_register(&mut self, arg: &str) -> io::Result<()> {
        let parsed = arg.split_once('=').and_then(|(reg, value)| {
            Some((
                protocol::parse_hex_u32(reg)? as usize,
                protocol::u32_from_le_hex(value)?,
            ))
        });
        match parsed {
            Some((n, value)) if n < 17 => {
                self.write_register(n, value);
                self.reply(b"OK")
            }
            _ => self.reply(b"E00"),
        }
    }

    fn read_memory(&mut self, arg: &str) -> io::Result<()> {
        let Some((addr, len)) = parse_addr_len(arg) else {
            return self.reply(b"E01");
        };
        let len = len.min(MAX_MEMORY_TRANSFER);
        let mut bytes = Vec::with_capacity(len as usize);
        for i in 0..len {
            bytes.push(self.machine.bus_read(addr.wrapping_add(i), AccessSize::Byte) as u8);
        }
        self.reply(protocol::hex_encode(&bytes).as_bytes())
    }

    fn write_memory(&mut self, arg: &str) -> io::Result<()> {
        let parsed = arg.split_once(':').and_then(|(range, data)| {
            let (addr, len) = parse_addr_len(range)?;
            let bytes = protocol::hex_decode(data)?;
            (bytes.len() == len as usize && len <= MAX_MEMORY_TRANSFER).then_some((addr, bytes))
        });
        let Some((addr, bytes)) = parsed else {
            return self.reply(b"E01");
        };
        for (i, byte) in bytes.iter().enumerate() {
            let at = addr.wrapping_add(i as u32);
            if self
                .machine
                .bus_write(at, u32::from(*byte), AccessSize::Byte)
                .is_err()
            {
                return self.reply(b"E03");
            }
        }
        self.reply(b"OK")
    }

    fn set_optional_pc(&mut self, arg: &str) {
        if arg.is_empty() {
            return;
        }
        if let Some(addr) = protocol::parse_hex_u32(arg) {
            self.machine.cpu_mut().state.set_pc(addr);
        }
    }

    /// Run the machine, polling the socket between steps so a `0x03` from
    /// the debugger can interrupt the guest.
    fn continue_until_stop(&mut self) -> io::Result<()> {
        self.machine.resume();
        self.stream.set_nonblocking(true)?;
        let result = self.continue_loop();
        self.stream.set_nonblocking(false)?;
        result?;
        self.reply(b"S05")
    }

    fn continue_loop(&mut self) -> io::Result<()> {
        loop {
            if self.poll_interrupt()? {
                self.machine.halt();
                debug!("guest interrupted by client");
                return Ok(());
            }
            if let Err(reason) = self.machine.step() {
                debug!(%reason, "continue stopped");
                return Ok(());
            }
        }
    }

    fn poll_interrupt(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(io::ErrorKind::ConnectionAborted.into()),
            Ok(_) => Ok(buf[0] == 0x03),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(error) => Err(error),
        }
    }

    fn insert_breakpoint(&mut self, arg: &str) -> io::Result<()> {
        match parse_breakpoint(arg) {
            Some(addr) if self.machine.add_breakpoint(addr).is_ok() => self.reply(b"OK"),
            _ => self.reply(b"E01"),
        }
    }

    fn remove_breakpoint(&mut self, arg: &str) -> io::Result<()> {
        match parse_breakpoint(arg) {
            Some(addr) if self.machine.remove_breakpoint(addr).is_ok() => self.reply(b"OK"),
            _ => self.reply(b"E01"),
        }
    }

    fn monitor_command(&mut self, hex: &str) -> io::Result<()> {
        let command = protocol::hex_decode(hex)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default();
        debug!(command = %command, "monitor command");
        match command.trim() {
            "halt" => self.machine.halt(),
            "reset" => {
                if let Err(fault) = self.machine.reset() {
                    warn!(%fault, "reset failed");
                }
            }
            "reset halt" => {
                if let Err(fault) = self.machine.reset() {
                    warn!(%fault, "reset failed");
                }
                self.machine.halt();
            }
            _ => return self.reply(b""),
        }
        self.reply(b"OK")
    }

    fn read_target_xml(&mut self, arg: &str) -> io::Result<()> {
        let Some((offset, length)) = parse_addr_len(arg) else {
            return self.reply(b"E01");
        };
        let xml = TARGET_XML.as_bytes();
        let offset = offset as usize;
        if offset >= xml.len() {
            return self.reply(b"l");
        }
        let end = (offset + length as usize).min(xml.len());
        let marker = if end == xml.len() { b'l' } else { b'm' };
        let mut payload = vec![marker];
        payload.extend_from_slice(&xml[offset..end]);
        self.reply(&payload)
    }
}

/// `<addr>,<len>` with both fields in plain hex.
fn parse_addr_len(text: &str) -> Option<(u32, u32)> {
    let (addr, len) = text.split_once(',')?;
    Some((protocol::parse_hex_u32(addr)?, protocol::parse_hex_u32(len)?))
}

/// `<addr>,<kind>` from a Z0/z0 packet; the kind is irrelevant to a PC
/// breakpoint table but must still parse.
fn parse_breakpoint(text: &str) -> Option<u32> {
    let (addr, kind) = text.split_once(',')?;
    protocol::parse_hex_u32(kind)?;
    protocol::parse_hex_u32(addr)
}
