use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::trace;

use crate::bus::{AccessSize, BusDevice, BusError};

/// On-chip Flash size of the STM32F103C8 (64 KiB).
pub const FLASH_SIZE: usize = 64 * 1024;
/// On-chip SRAM size (20 KiB).
pub const SRAM_SIZE: usize = 20 * 1024;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("empty firmware image")]
    Empty,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn read_le(bytes: &[u8], offset: u32, size: AccessSize) -> u32 {
    let offset = offset as usize;
    let n = size.bytes() as usize;
    if offset + n > bytes.len() {
        trace!(offset, "read past end of memory reads as zero");
        return 0;
    }
    let mut value = 0u32;
    for (i, b) in bytes[offset..offset + n].iter().enumerate() {
        value |= u32::from(*b) << (8 * i);
    }
    value
}

fn write_le(bytes: &mut [u8], offset: u32, value: u32, size: AccessSize) -> Result<(), BusError> {
    let n = size.bytes() as usize;
    let len = bytes.len();
    if offset as usize + n > len {
        return Err(BusError::OutOfRange {
            offset,
            len: len as u32,
        });
    }
    let offset = offset as usize;
    for i in 0..n {
        bytes[offset + i] = (value >> (8 * i)) as u8;
    }
    Ok(())
}

/// Code memory. Written only by the firmware loader; bus writes fail and
/// contents survive a system reset.
pub struct Flash {
    bytes: Box<[u8]>,
}

impl Flash {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; FLASH_SIZE].into_boxed_slice(),
        }
    }

    /// Copy a firmware image to offset zero. Images longer than the Flash
    /// are silently truncated. Returns the number of bytes kept.
    pub fn load_image(&mut self, image: &[u8]) -> usize {
        let n = image.len().min(FLASH_SIZE);
        self.bytes[..n].copy_from_slice(&image[..n]);
        n
    }

    /// Load a raw binary file into Flash. An empty or unreadable file is an
    /// error; an oversized one is truncated.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ImageError> {
        let image = fs::read(path)?;
        if image.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(self.load_image(&image))
    }

    pub fn read(&self, offset: u32, size: AccessSize) -> u32 {
        read_le(&self.bytes, offset, size)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for Flash {
    fn default() -> Self {
        Self::new()
    }
}

impl BusDevice for Flash {
    fn read(&mut self, offset: u32, size: AccessSize) -> Result<u32, BusError> {
        Ok(read_le(&self.bytes, offset, size))
    }

    fn write(&mut self, offset: u32, _value: u32, _size: AccessSize) -> Result<(), BusError> {
        Err(BusError::ReadOnly { offset })
    }
}

/// Working memory. Reset clears it.
pub struct Sram {
    bytes: Box<[u8]>,
}

impl Sram {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; SRAM_SIZE].into_boxed_slice(),
        }
    }

    pub fn reset(&mut self) {
        self.bytes.fill(0);
    }

    pub fn read(&self, offset: u32, size: AccessSize) -> u32 {
        read_le(&self.bytes, offset, size)
    }

    pub fn write(&mut self, offset: u32, value: u32, size: AccessSize) -> Result<(), BusError> {
        write_le(&mut self.bytes, offset, value, size)
    }
}

impl Default for Sram {
    fn default() -> Self {
        Self::new()
    }
}

impl BusDevice for Sram {
    fn read(&mut self, offset: u32, size: AccessSize) -> Result<u32, BusError> {
        Ok(read_le(&self.bytes, offset, size))
    }

    fn write(&mut self, offset: u32, value: u32, size: AccessSize) -> Result<(), BusError> {
        write_le(&mut self.bytes, offset, value, size)
    }
}
