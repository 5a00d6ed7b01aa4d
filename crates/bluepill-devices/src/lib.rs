//! Peripheral models for the emulated STM32F103: the TIM2 general-purpose
//! timer and the USART1 serial port. Both are plain register machines; the
//! machine crate maps them onto the bus and ticks them once per simulation
//! step, passing in an interrupt sink so neither device holds a reference
//! to the NVIC.

mod tim;
mod usart;

pub use tim::{Tim2, TIM2_IRQ};
pub use usart::{Usart1, USART1_IRQ};
