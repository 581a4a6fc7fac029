//! Module parameters from the kernel command line, and the driver tunables built from them.

use alloc::string::String;
use alloc::vec::Vec;


/// One `module.param=value` (or bare `param`) argument.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Param {
    module: String,
    name: String,
    value: Option<String>,
}

/// Parsed command line. Later arguments override earlier ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleParams {
    params: Vec<Param>,
}

/// Split the next argument off `args`. Double quotes group spaces, as in `parse_args()`.
fn next_arg(args: &str) -> (&str, &str) {
    let mut in_quote = false;
    for (i, c) in args.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            c if c.is_ascii_whitespace() && !in_quote => return (&args[..i], &args[i..]),
            _ => {}
        }
    }
    (args, "")
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s)
}

/// `kstrtobool()`.
fn parse_bool(s: &str) -> Option<bool> {
    match s.as_bytes() {
        [b'y' | b'Y' | b'1', ..] => Some(true),
        [b'n' | b'N' | b'0', ..] => Some(false),
        [b'o' | b'O', b'n' | b'N', ..] => Some(true),
        [b'o' | b'O', b'f' | b'F', ..] => Some(false),
        _ => None,
    }
}

/// `kstrtouint()` with base 0: decimal, `0x` hex or leading-zero octal.
fn parse_u32(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8).ok()
    } else {
        s.parse().ok()
    }
}

impl ModuleParams {
    pub fn parse(cmdline: &str) -> Self {
        let mut params = Vec::new();
        let mut rest = cmdline.trim_start();
        while !rest.is_empty() {
            let (arg, tail) = next_arg(rest);
            rest = tail.trim_start();
            let (key, value) = match arg.split_once('=') {
                Some((k, v)) => (k, Some(String::from(unquote(v)))),
                None => (arg, None),
            };
            let (module, name) = key.split_once('.').unwrap_or(("", key));
            // `-` and `_` are the same in parameter names.
            let name: String = name.chars().map(|c| if c == '-' { '_' } else { c }).collect();
            params.push(Param { module: String::from(module), name, value });
        }
        Self { params }
    }

    fn find(&self, module: &str, name: &str) -> Option<&Param> {
        self.params.iter().rev().find(|p| p.module == module && p.name == name)
    }

    /// Whether the argument appears at all.
    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.find(module, name).is_some()
    }

    pub fn get_str(&self, module: &str, name: &str) -> Option<&str> {
        self.find(module, name)?.value.as_deref()
    }

    /// An invalid value is reported and ignored.
    pub fn get_u32(&self, module: &str, name: &str) -> Option<u32> {
        let value = self.get_str(module, name)?;
        let parsed = parse_u32(value);
        if parsed.is_none() {
            warn!("{}: invalid value '{}' for parameter '{}'", module, value, name);
        }
        parsed
    }

    /// A bare argument counts as true.
    pub fn get_bool(&self, module: &str, name: &str) -> Option<bool> {
        let param = self.find(module, name)?;
        let Some(value) = param.value.as_deref() else { return Some(true) };
        let parsed = parse_bool(value);
        if parsed.is_none() {
            warn!("{}: invalid value '{}' for parameter '{}'", module, value, name);
        }
        parsed
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}


/// Tunables of the sample drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    /// `key.debounce_ms`
    pub key_debounce_ms: u32,
    /// `led.blink_ms`, the period `LED_GET_PERIOD` reports before one is set.
    pub led_blink_ms: u32,
    /// `gt911.i2c_attempts`
    pub gt911_i2c_attempts: u32,
    /// `gt911.i2c_retry_ms`
    pub gt911_i2c_retry_ms: u32,
    /// `evdev.buffer`, in events.
    pub evdev_buffer: usize,
    /// `input.rep_delay_ms`
    pub rep_delay_ms: u32,
    /// `input.rep_period_ms`
    pub rep_period_ms: u32,
}

impl DriverConfig {
    pub const DEFAULT: DriverConfig = DriverConfig {
        key_debounce_ms: 10,
        led_blink_ms: 500,
        gt911_i2c_attempts: 2,
        gt911_i2c_retry_ms: 20,
        evdev_buffer: 64,
        rep_delay_ms: 250,
        rep_period_ms: 33,
    };

    pub fn from_params(params: &ModuleParams) -> Self {
        let mut cfg = Self::DEFAULT;
        let get = |module, name, default| params.get_u32(module, name).unwrap_or(default);
        cfg.key_debounce_ms = get("key", "debounce_ms", cfg.key_debounce_ms);
        // Reported back through an `int` ioctl.
        cfg.led_blink_ms = get("led", "blink_ms", cfg.led_blink_ms).min(i32::MAX as u32);
        cfg.gt911_i2c_attempts = get("gt911", "i2c_attempts", cfg.gt911_i2c_attempts).max(1);
        cfg.gt911_i2c_retry_ms = get("gt911", "i2c_retry_ms", cfg.gt911_i2c_retry_ms);
        cfg.rep_delay_ms = get("input", "rep_delay_ms", cfg.rep_delay_ms);
        cfg.rep_period_ms = get("input", "rep_period_ms", cfg.rep_period_ms);
        // Room for at least one full frame.
        let buffer = get("evdev", "buffer", cfg.evdev_buffer as u32).max(8);
        cfg.evdev_buffer = (buffer as usize).next_power_of_two();
        cfg
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
