//! PS/2 keyboard driver: Set-1 scancode state machine behind the keyboard
//! IRQ (§4.10). The state machine itself (`KeyboardCore`) only ever sees a
//! `u8` in, `Option<KeyEvent>` out, so it has a host-side test harness; only
//! `on_interrupt` touches the controller's I/O ports.

use bitflags::bitflags;
use conquer_once::spin::OnceCell;
use crossbeam_queue::ArrayQueue;
use spin::Mutex;

use crate::arch::io::{io_wait, Port};
use crate::cfg::KEY_EVENT_RING_CAPACITY;

const DATA_PORT: u16 = 0x60;
const STATUS_COMMAND_PORT: u16 = 0x64;

const STATUS_OUTPUT_FULL: u8 = 1 << 0;
const CMD_READ_CONFIG: u8 = 0x20;
const CMD_WRITE_CONFIG: u8 = 0x60;
const CONFIG_TRANSLATION: u8 = 1 << 6;

const PREFIX_BYTE: u8 = 0xE0;
const BREAK_BIT: u8 = 0x80;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
        const CAPS_LOCK = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Make,
    Break,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scancode {
    Escape,
    Digit(u8),
    Letter(u8),
    Enter,
    Backspace,
    Tab,
    Space,
    Unknown(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: Scancode,
    pub kind: KeyKind,
    pub modifiers: Modifiers,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum DecodeState {
    Normal,
    Prefix,
}

/// Translates a single Set-1 byte into at most one key event, folding
/// modifier scancodes into the running mask instead of emitting them.
struct KeyboardCore {
    state: DecodeState,
    modifiers: Modifiers,
}

fn base_scancode(byte: u8) -> Scancode {
    match byte {
        0x01 => Scancode::Escape,
        0x02..=0x0A => Scancode::Digit(byte - 0x01), // 1..9
        0x0B => Scancode::Digit(0),
        0x0E => Scancode::Backspace,
        0x0F => Scancode::Tab,
        0x1C => Scancode::Enter,
        0x39 => Scancode::Space,
        0x10 => Scancode::Letter(b'q'),
        0x11 => Scancode::Letter(b'w'),
        0x12 => Scancode::Letter(b'e'),
        0x13 => Scancode::Letter(b'r'),
        0x14 => Scancode::Letter(b't'),
        0x15 => Scancode::Letter(b'y'),
        0x16 => Scancode::Letter(b'u'),
        0x17 => Scancode::Letter(b'i'),
        0x18 => Scancode::Letter(b'o'),
        0x19 => Scancode::Letter(b'p'),
        0x1E => Scancode::Letter(b'a'),
        0x1F => Scancode::Letter(b's'),
        0x20 => Scancode::Letter(b'd'),
        0x21 => Scancode::Letter(b'f'),
        0x22 => Scancode::Letter(b'g'),
        0x23 => Scancode::Letter(b'h'),
        0x24 => Scancode::Letter(b'j'),
        0x25 => Scancode::Letter(b'k'),
        0x26 => Scancode::Letter(b'l'),
        0x2C => Scancode::Letter(b'z'),
        0x2D => Scancode::Letter(b'x'),
        0x2E => Scancode::Letter(b'c'),
        0x2F => Scancode::Letter(b'v'),
        0x30 => Scancode::Letter(b'b'),
        0x31 => Scancode::Letter(b'n'),
        0x32 => Scancode::Letter(b'm'),
        other => Scancode::Unknown(other),
    }
}

/// Modifier scancodes: set on `Make`, clear on `Break`, except Caps Lock
/// which toggles on `Make` only (§8 property 9).
fn modifier_bit(byte: u8) -> Option<Modifiers> {
    match byte {
        0x2A | 0x36 => Some(Modifiers::SHIFT),
        0x1D => Some(Modifiers::CONTROL),
        0x38 => Some(Modifiers::ALT),
        0x3A => Some(Modifiers::CAPS_LOCK),
        _ => None,
    }
}

impl KeyboardCore {
    const fn new() -> Self {
        KeyboardCore { state: DecodeState::Normal, modifiers: Modifiers::empty() }
    }

    /// Feeds one controller byte through the state machine, returning an
    /// event for any non-modifier `Make`/`Break`.
    fn feed(&mut self, byte: u8) -> Option<KeyEvent> {
        if self.state == DecodeState::Prefix {
            self.state = DecodeState::Normal;
            // Extended keys (arrows, etc.) aren't in the base table; report
            // them as Unknown rather than silently dropping the byte.
            let base = byte & !BREAK_BIT;
            let kind = if byte & BREAK_BIT != 0 { KeyKind::Break } else { KeyKind::Make };
            return Some(KeyEvent { code: Scancode::Unknown(base), kind, modifiers: self.modifiers });
        }

        if byte == PREFIX_BYTE {
            self.state = DecodeState::Prefix;
            return None;
        }

        let is_break = byte & BREAK_BIT != 0;
        let base = byte & !BREAK_BIT;

        if let Some(bit) = modifier_bit(base) {
            if bit == Modifiers::CAPS_LOCK {
                if !is_break {
                    self.modifiers.toggle(Modifiers::CAPS_LOCK);
                }
            } else if is_break {
                self.modifiers.remove(bit);
            } else {
                self.modifiers.insert(bit);
            }
            return None;
        }

        let kind = if is_break { KeyKind::Break } else { KeyKind::Make };
        Some(KeyEvent { code: base_scancode(base), kind, modifiers: self.modifiers })
    }
}

static CORE: Mutex<KeyboardCore> = Mutex::new(KeyboardCore::new());
static EVENTS: OnceCell<ArrayQueue<KeyEvent>> = OnceCell::uninit();

fn events() -> &'static ArrayQueue<KeyEvent> {
    EVENTS.get_or_init(|| ArrayQueue::new(KEY_EVENT_RING_CAPACITY))
}

fn read_config() -> u8 {
    let mut command = Port::<u8>::new(STATUS_COMMAND_PORT);
    let mut data = Port::<u8>::new(DATA_PORT);
    unsafe {
        command.write(CMD_READ_CONFIG);
        data.read()
    }
}

fn write_config(value: u8) {
    let mut command = Port::<u8>::new(STATUS_COMMAND_PORT);
    let mut data = Port::<u8>::new(DATA_PORT);
    unsafe {
        command.write(CMD_WRITE_CONFIG);
        io_wait();
        data.write(value);
    }
}

/// Enables Set-1→Set-2 translation once. Re-checked (not just set-and-trust)
/// because a soft "translation inactive" condition at init is logged and
/// corrected, not treated as fatal (§7).
///
/// # Safety
/// Must run once at boot, after the I/O APIC routes GSI_KEYBOARD to the
/// keyboard vector.
pub unsafe fn init() {
    let config = read_config();
    if config & CONFIG_TRANSLATION == 0 {
        crate::klog!(WARN, "PS/2 controller translation was inactive; re-enabling");
        write_config(config | CONFIG_TRANSLATION);
    }
}

pub fn on_interrupt() {
    let mut status_port = Port::<u8>::new(STATUS_COMMAND_PORT);
    let status = unsafe { status_port.read() };
    if status & STATUS_OUTPUT_FULL == 0 {
        return;
    }

    let byte = unsafe { Port::<u8>::new(DATA_PORT).read() };
    if let Some(event) = CORE.lock().feed(byte) {
        let _ = events().push(event);
    }
}

/// Pops the oldest buffered key event, if any.
pub fn pop_event() -> Option<KeyEvent> {
    events().pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_a_make_then_break_reports_modifier_and_clears_it() {
        let mut core = KeyboardCore::new();
        assert_eq!(core.feed(0x2A), None); // Shift make
        let make = core.feed(0x1E).unwrap(); // A make
        assert_eq!(make.code, Scancode::Letter(b'a'));
        assert_eq!(make.kind, KeyKind::Make);
        assert!(make.modifiers.contains(Modifiers::SHIFT));

        let brk = core.feed(0x9E).unwrap(); // A break
        assert_eq!(brk.kind, KeyKind::Break);
        assert!(brk.modifiers.contains(Modifiers::SHIFT));

        assert_eq!(core.feed(0xAA), None); // Shift break
        assert!(!core.modifiers.contains(Modifiers::SHIFT));
    }

    #[test]
    fn caps_lock_toggles_only_on_make() {
        let mut core = KeyboardCore::new();
        assert_eq!(core.feed(0x3A), None);
        assert!(core.modifiers.contains(Modifiers::CAPS_LOCK));
        assert_eq!(core.feed(0xBA), None); // break: no change
        assert!(core.modifiers.contains(Modifiers::CAPS_LOCK));
        assert_eq!(core.feed(0x3A), None);
        assert!(!core.modifiers.contains(Modifiers::CAPS_LOCK));
    }

    #[test]
    fn prefix_byte_consumes_the_next_byte_as_extended() {
        let mut core = KeyboardCore::new();
        assert_eq!(core.feed(0xE0), None);
        let event = core.feed(0x48).unwrap(); // extended "up arrow" make
        assert_eq!(event.code, Scancode::Unknown(0x48));
        assert_eq!(event.kind, KeyKind::Make);
    }
}
