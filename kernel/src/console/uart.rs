//! 16550 UART driver for COM1 (§4.11). Always brought up, independent of
//! whether Limine handed back a framebuffer, so early boot output and panic
//! messages have somewhere to go even on a headless machine.

use crate::arch::io::Port;

const COM1_BASE: u16 = 0x3F8;

const REG_DATA: u16 = 0;
const REG_INT_ENABLE: u16 = 1;
const REG_FIFO_CTRL: u16 = 2;
const REG_LINE_CTRL: u16 = 3;
const REG_MODEM_CTRL: u16 = 4;
const REG_LINE_STATUS: u16 = 5;

const LINE_CTRL_8N1: u8 = 0x03;
const LINE_CTRL_DLAB: u8 = 0x80;
const FIFO_ENABLE_14_THRESHOLD: u8 = 0xC7;
const MODEM_LOOPBACK_TEST: u8 = 0x1E; // DTR|RTS|OUT1|OUT2|loopback
const MODEM_NORMAL: u8 = 0x0F; // DTR|RTS|OUT1|OUT2
const LOOPBACK_TEST_BYTE: u8 = 0xAE;
const LINE_STATUS_TX_EMPTY: u8 = 1 << 5;

const BAUD_DIVISOR_38400: u16 = 3; // 115200 / 38400

pub struct Uart;

impl Uart {
    fn port(offset: u16) -> Port<u8> {
        Port::new(COM1_BASE + offset)
    }

    fn tx_ready() -> bool {
        unsafe { Self::port(REG_LINE_STATUS).read() & LINE_STATUS_TX_EMPTY != 0 }
    }

    pub fn write_byte(&mut self, byte: u8) {
        while !Self::tx_ready() {
            core::hint::spin_loop();
        }
        unsafe { Self::port(REG_DATA).write(byte) };
    }
}

impl core::fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Programs 38400 8N1, a 14-byte FIFO threshold, then runs the loopback
/// self-test before returning to normal operating mode. A UART that fails
/// loopback is treated as absent hardware the kernel cannot recover from
/// (§7) rather than silently producing no output.
///
/// # Safety
/// Must run once at boot, before anything calls [`Uart::write_byte`].
pub unsafe fn init() -> Uart {
    unsafe {
        Port::<u8>::new(COM1_BASE + REG_INT_ENABLE).write(0x00);
        Port::<u8>::new(COM1_BASE + REG_LINE_CTRL).write(LINE_CTRL_DLAB);
        Port::<u8>::new(COM1_BASE + 0).write((BAUD_DIVISOR_38400 & 0xFF) as u8);
        Port::<u8>::new(COM1_BASE + 1).write((BAUD_DIVISOR_38400 >> 8) as u8);
        Port::<u8>::new(COM1_BASE + REG_LINE_CTRL).write(LINE_CTRL_8N1);
        Port::<u8>::new(COM1_BASE + REG_FIFO_CTRL).write(FIFO_ENABLE_14_THRESHOLD);

        Port::<u8>::new(COM1_BASE + REG_MODEM_CTRL).write(MODEM_LOOPBACK_TEST);
        Port::<u8>::new(COM1_BASE + REG_DATA).write(LOOPBACK_TEST_BYTE);
        let echoed = Port::<u8>::new(COM1_BASE + REG_DATA).read();
        assert_eq!(echoed, LOOPBACK_TEST_BYTE, "COM1 loopback self-test failed; UART is not present");

        Port::<u8>::new(COM1_BASE + REG_MODEM_CTRL).write(MODEM_NORMAL);
    }
    Uart
}
