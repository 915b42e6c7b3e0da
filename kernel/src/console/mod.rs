//! Kernel console: COM1 plus, when Limine hands one back, the linear
//! framebuffer, both written through together from one global, lock-guarded
//! writer (§4.11).

pub mod framebuffer;
pub mod uart;

use core::fmt::{self, Write};

use spin::Mutex;

use framebuffer::Framebuffer;
use uart::Uart;

struct Writer {
    uart: Uart,
    framebuffer: Option<Framebuffer>,
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.uart.write_str(s)?;
        if let Some(fb) = self.framebuffer.as_mut() {
            fb.write_str(s)?;
        }
        Ok(())
    }
}

static WRITER: Mutex<Option<Writer>> = Mutex::new(None);

/// Brings up COM1 (panicking on a failed loopback self-test, §7) with no
/// framebuffer attached yet.
///
/// # Safety
/// Must run once at boot, before the first `print!`/`println!`/`klog!`.
pub unsafe fn init() {
    let uart = unsafe { uart::init() };
    *WRITER.lock() = Some(Writer { uart, framebuffer: None });
}

/// Attaches the framebuffer Limine reported, once paging and the HHDM are
/// set up enough to write through it.
pub fn attach_framebuffer(framebuffer: Framebuffer) {
    if let Some(writer) = WRITER.lock().as_mut() {
        writer.framebuffer = Some(framebuffer);
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let mut guard = WRITER.lock();
    if let Some(writer) = guard.as_mut() {
        let _ = writer.write_fmt(args);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Tagged log line (§4.11, §7): `klog!(LEVEL, "fmt", args...)`.
#[macro_export]
macro_rules! klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::println!("[{}] {}", stringify!($level), format_args!($($arg)*));
    };
}
