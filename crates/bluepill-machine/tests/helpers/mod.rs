#![allow(dead_code)]

use bluepill_machine::{map, Machine};

/// Builder for raw firmware images: word-granular writes into a byte
/// vector laid out exactly as the flash expects it.
pub struct Image {
    bytes: Vec<u8>,
}

impl Image {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn word(mut self, offset: usize, value: u32) -> Self {
        if self.bytes.len() < offset + 4 {
            self.bytes.resize(offset + 4, 0);
        }
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn halfwords(mut self, offset: usize, halfwords: &[u16]) -> Self {
        let end = offset + 2 * halfwords.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        for (i, hw) in halfwords.iter().enumerate() {
            self.bytes[offset + 2 * i..offset + 2 * i + 2].copy_from_slice(&hw.to_le_bytes());
        }
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Vector table with the given reset handler (Thumb bit applied) and an
/// initial SP near the top of SRAM.
pub fn with_vectors(reset: u32) -> Image {
    Image::new()
        .word(0, map::SRAM_BASE + 0x4FF0)
        .word(4, reset | 1)
}

pub fn boot(image: &Image) -> Machine {
    let mut machine = Machine::new();
    machine.load_image(image.bytes()).unwrap();
    machine
}
