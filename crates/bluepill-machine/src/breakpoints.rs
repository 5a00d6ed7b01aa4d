use thiserror::Error;

/// Capacity of the breakpoint table.
pub const MAX_BREAKPOINTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakpointError {
    #[error("breakpoint table is full ({MAX_BREAKPOINTS} entries)")]
    Full,
    #[error("no breakpoint at {addr:#010x}")]
    NotFound { addr: u32 },
}

/// Unordered set of code addresses checked against the PC after every
/// retired step.
#[derive(Debug, Default)]
pub struct Breakpoints {
    addrs: Vec<u32>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adding an address twice is fine; the set does not grow.
    pub fn add(&mut self, addr: u32) -> Result<(), BreakpointError> {
        if self.addrs.contains(&addr) {
            return Ok(());
        }
        if self.addrs.len() == MAX_BREAKPOINTS {
            return Err(BreakpointError::Full);
        }
        self.addrs.push(addr);
        Ok(())
    }

    pub fn remove(&mut self, addr: u32) -> Result<(), BreakpointError> {
        match self.addrs.iter().position(|a| *a == addr) {
            Some(i) => {
                self.addrs.swap_remove(i);
                Ok(())
            }
            None => Err(BreakpointError::NotFound { addr }),
        }
    }

    pub fn hit(&self, pc: u32) -> bool {
        self.addrs.contains(&pc)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_up_to_capacity() {
        let mut bps = Breakpoints::new();
        bps.add(0x100).unwrap();
        bps.add(0x100).unwrap();
        assert_eq!(bps.as_slice().len(), 1);

        for i in 1..MAX_BREAKPOINTS as u32 {
            bps.add(0x100 + i * 2).unwrap();
        }
        assert_eq!(bps.add(0xFFFF), Err(BreakpointError::Full));
        // Readding an existing entry still succeeds at capacity.
        bps.add(0x100).unwrap();
    }

    #[test]
    fn remove_compacts_and_rejects_absent() {
        let mut bps = Breakpoints::new();
        bps.add(0x100).unwrap();
        bps.add(0x102).unwrap();
        bps.remove(0x100).unwrap();
        assert!(!bps.hit(0x100));
        assert!(bps.hit(0x102));
        assert_eq!(bps.remove(0x100), Err(BreakpointError::NotFound { addr: 0x100 }));
    }
}
