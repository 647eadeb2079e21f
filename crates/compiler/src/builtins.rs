//! Built-in function catalog.
//!
//! The interpreter ships a fixed library of built-in functions; the compiler
//! only knows their names, arity ranges and return types. This table is the
//! single source of truth: the expression parser looks names up here, the
//! object writer emits the table index as the dispatch code, and error
//! messages take the name from the same entry.

use crate::types::ReturnType;
use std::collections::HashMap;
use std::sync::OnceLock;

/// One catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub ret: ReturnType,
}

use ReturnType::{Byte, Int, Str, Void};

macro_rules! builtin {
    ($name:literal, $min:expr, $max:expr, $ret:expr) => {
        Builtin {
            name: $name,
            min_args: $min,
            max_args: $max,
            ret: $ret,
        }
    };
}

/// The catalog, grouped by peripheral. Indices are the interpreter dispatch
/// codes, so entries are only ever appended.
pub static CATALOG: &[Builtin] = &[
    // console
    builtin!("console.print", 1, 16, Void),
    builtin!("console.println", 0, 16, Void),
    builtin!("console.putc", 1, 1, Void),
    builtin!("console.getc", 0, 0, Int),
    builtin!("console.peek", 0, 0, Int),
    builtin!("console.available", 0, 0, Int),
    builtin!("console.readline", 0, 0, Str),
    builtin!("console.flush", 0, 0, Void),
    // strings
    builtin!("string.length", 1, 1, Int),
    builtin!("string.char", 2, 2, Int),
    builtin!("string.find", 2, 3, Int),
    builtin!("string.compare", 2, 2, Int),
    builtin!("string.upper", 1, 1, Str),
    builtin!("string.lower", 1, 1, Str),
    builtin!("string.trim", 1, 1, Str),
    builtin!("string.left", 2, 2, Str),
    builtin!("string.right", 2, 2, Str),
    builtin!("string.mid", 2, 3, Str),
    builtin!("string.replace", 3, 3, Str),
    builtin!("string.toint", 1, 1, Int),
    builtin!("string.fromint", 1, 2, Str),
    builtin!("string.fromchar", 1, 1, Str),
    // math
    builtin!("math.abs", 1, 1, Int),
    builtin!("math.min", 2, 2, Int),
    builtin!("math.max", 2, 2, Int),
    builtin!("math.clamp", 3, 3, Int),
    builtin!("math.pow", 2, 2, Int),
    builtin!("math.sqrt", 1, 1, Int),
    builtin!("math.random", 1, 2, Int),
    // time and RTC
    builtin!("time.ms", 0, 0, Int),
    builtin!("time.ticks", 0, 0, Int),
    builtin!("time.delay", 1, 1, Void),
    builtin!("rtc.get", 1, 1, Int),
    builtin!("rtc.set", 2, 2, Int),
    // terminal screen (mcurses)
    builtin!("mcurses.initscr", 0, 0, Void),
    builtin!("mcurses.endwin", 0, 0, Void),
    builtin!("mcurses.move", 2, 2, Void),
    builtin!("mcurses.addstr", 1, 1, Void),
    builtin!("mcurses.addch", 1, 1, Void),
    builtin!("mcurses.attrset", 1, 1, Void),
    builtin!("mcurses.clear", 0, 0, Void),
    builtin!("mcurses.erase", 0, 0, Void),
    builtin!("mcurses.clrtoeol", 0, 0, Void),
    builtin!("mcurses.clrtobot", 0, 0, Void),
    builtin!("mcurses.getch", 0, 0, Int),
    builtin!("mcurses.getstr", 0, 1, Str),
    builtin!("mcurses.nodelay", 1, 1, Void),
    builtin!("mcurses.halfdelay", 1, 1, Void),
    builtin!("mcurses.curs_set", 1, 1, Void),
    builtin!("mcurses.refresh", 0, 0, Void),
    builtin!("mcurses.scroll", 0, 0, Void),
    builtin!("mcurses.setscrreg", 2, 2, Void),
    builtin!("mcurses.deleteln", 0, 0, Void),
    builtin!("mcurses.insertln", 0, 0, Void),
    // GPIO
    builtin!("gpio.init", 3, 4, Void),
    builtin!("gpio.deinit", 2, 2, Void),
    builtin!("gpio.set", 3, 3, Void),
    builtin!("gpio.get", 2, 2, Int),
    builtin!("gpio.toggle", 2, 2, Void),
    // UART
    builtin!("uart.init", 2, 2, Void),
    builtin!("uart.deinit", 1, 1, Void),
    builtin!("uart.putc", 2, 2, Void),
    builtin!("uart.puts", 2, 2, Void),
    builtin!("uart.getc", 1, 1, Int),
    builtin!("uart.readline", 1, 1, Str),
    builtin!("uart.available", 1, 1, Int),
    builtin!("uart.flush", 1, 1, Void),
    // I2C
    builtin!("i2c.init", 1, 2, Void),
    builtin!("i2c.deinit", 1, 1, Void),
    builtin!("i2c.scan", 2, 2, Int),
    builtin!("i2c.read", 3, 4, Int),
    builtin!("i2c.write", 3, 4, Int),
    builtin!("i2c.readreg", 3, 3, Int),
    builtin!("i2c.writereg", 4, 4, Int),
    // SPI
    builtin!("spi.init", 2, 2, Void),
    builtin!("spi.xfer", 2, 2, Int),
    // files
    builtin!("file.open", 2, 2, Int),
    builtin!("file.close", 1, 1, Void),
    builtin!("file.read", 2, 3, Int),
    builtin!("file.readline", 1, 1, Str),
    builtin!("file.write", 2, 2, Int),
    builtin!("file.writeline", 2, 2, Int),
    builtin!("file.putc", 2, 2, Int),
    builtin!("file.seek", 2, 3, Int),
    builtin!("file.tell", 1, 1, Int),
    builtin!("file.eof", 1, 1, Int),
    builtin!("file.size", 1, 1, Int),
    builtin!("file.exists", 1, 1, Int),
    builtin!("file.remove", 1, 1, Int),
    builtin!("file.rename", 2, 2, Int),
    builtin!("file.mkdir", 1, 1, Int),
    // TFT display
    builtin!("tft.init", 0, 1, Void),
    builtin!("tft.clear", 0, 1, Void),
    builtin!("tft.pixel", 3, 3, Void),
    builtin!("tft.line", 5, 5, Void),
    builtin!("tft.rect", 5, 5, Void),
    builtin!("tft.fillrect", 5, 5, Void),
    builtin!("tft.circle", 4, 4, Void),
    builtin!("tft.fillcircle", 4, 4, Void),
    builtin!("tft.text", 3, 3, Void),
    builtin!("tft.font", 1, 1, Void),
    builtin!("tft.color", 1, 2, Void),
    builtin!("tft.rotation", 1, 1, Void),
    builtin!("tft.width", 0, 0, Int),
    builtin!("tft.height", 0, 0, Int),
    builtin!("tft.scroll", 1, 1, Void),
    builtin!("tft.backlight", 1, 1, Void),
    // flash memory
    builtin!("flash.erase", 1, 1, Int),
    builtin!("flash.read", 2, 2, Int),
    builtin!("flash.write", 2, 2, Int),
    builtin!("flash.lock", 0, 0, Int),
    builtin!("flash.unlock", 0, 0, Int),
    // EEPROM emulation
    builtin!("ee.read", 1, 1, Int),
    builtin!("ee.readbyte", 1, 1, Byte),
    builtin!("ee.write", 2, 2, Int),
    // analog and PWM
    builtin!("adc.init", 1, 1, Void),
    builtin!("adc.get", 1, 1, Int),
    builtin!("dac.init", 1, 1, Void),
    builtin!("dac.set", 2, 2, Void),
    builtin!("pwm.init", 2, 3, Void),
    builtin!("pwm.set", 2, 2, Void),
    builtin!("pwm.stop", 1, 1, Void),
    // board peripherals
    builtin!("button.get", 1, 1, Int),
    builtin!("led.set", 2, 2, Void),
    builtin!("led.toggle", 1, 1, Void),
    builtin!("buzzer.beep", 2, 2, Void),
    // system
    builtin!("sys.reset", 0, 0, Void),
    builtin!("sys.mem", 0, 0, Int),
    builtin!("sys.clock", 0, 0, Int),
    builtin!("sys.version", 0, 0, Int),
];

static NAME_INDEX: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();

/// Look a built-in up by exact name.
pub fn lookup(name: &str) -> Option<usize> {
    let index = NAME_INDEX.get_or_init(|| {
        CATALOG
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name, i))
            .collect()
    });
    index.get(name).copied()
}

/// Catalog entry for a dispatch index obtained from [`lookup`].
pub fn get(idx: usize) -> &'static Builtin {
    &CATALOG[idx]
}

/// Human-readable arity for error messages: "2" or "between 1 and 3".
pub fn arity_text(b: &Builtin) -> String {
    if b.min_args == b.max_args {
        format!("{}", b.min_args)
    } else {
        format!("between {} and {}", b.min_args, b.max_args)
    }
}
