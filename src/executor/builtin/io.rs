//! `echo`, `printf` and `read`.

use std::io::{self, Write};

use crate::environment::Environment;
use crate::executor::builtin::manager::BuiltinCommand;
use crate::executor::builtin::{fail, printed, shell_quote, status, write_out};
use crate::executor::{report, ExecStatus, Executor};
use crate::expander::word::{decode_escapes, EscapeStyle};
use crate::lexer::is_name;

pub struct EchoCommand;

impl BuiltinCommand for EchoCommand {
    fn name(&self) -> &'static str {
        "echo"
    }
    fn run(&self, args: &[String], _env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let mut newline = true;
        let mut escapes = false;
        let mut start = 0;
        for arg in args {
            let Some(flags) = arg.strip_prefix('-') else { break };
            if flags.is_empty() || !flags.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
                break;
            }
            for c in flags.chars() {
                match c {
                    'n' => newline = false,
                    'e' => escapes = true,
                    _ => escapes = false,
                }
            }
            start += 1;
        }
        let mut text = args[start..].join(" ");
        if escapes {
            let (decoded, stop) = decode_escapes(&text, EscapeStyle::Echo);
            text = decoded;
            if stop {
                return printed(write_out(&text));
            }
        }
        if newline {
            text.push('\n');
        }
        printed(write_out(&text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Count {
    Fixed(usize),
    Star,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: Option<Count>,
    precision: Option<Count>,
    conv: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Spec(Spec),
}

/// Splits a format into literal text (escapes decoded) and directives.
fn parse_format(format: &str) -> Result<Vec<Piece>, String> {
    let chars: Vec<char> = format.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    let flush = |literal: &mut String, pieces: &mut Vec<Piece>| {
        if !literal.is_empty() {
            pieces.push(Piece::Text(decode_escapes(literal, EscapeStyle::Ansi).0));
            literal.clear();
        }
    };
    while i < chars.len() {
        if chars[i] != '%' {
            literal.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        if chars.get(i) == Some(&'%') {
            literal.push('%');
            i += 1;
            continue;
        }
        flush(&mut literal, &mut pieces);
        let mut spec = Spec::default();
        while let Some(&c) = chars.get(i) {
            match c {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }
        spec.width = read_count(&chars, &mut i);
        if chars.get(i) == Some(&'.') {
            i += 1;
            spec.precision = Some(read_count(&chars, &mut i).unwrap_or(Count::Fixed(0)));
        }
        match chars.get(i) {
            Some(&c) if "sbqdiuxXocf".contains(c) => spec.conv = c,
            Some(&c) => return Err(format!("`{c}': invalid format character")),
            None => return Err("missing format character".to_string()),
        }
        i += 1;
        pieces.push(Piece::Spec(spec));
    }
    flush(&mut literal, &mut pieces);
    Ok(pieces)
}

fn read_count(chars: &[char], i: &mut usize) -> Option<Count> {
    if chars.get(*i) == Some(&'*') {
        *i += 1;
        return Some(Count::Star);
    }
    let start = *i;
    while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
        *i += 1;
    }
    let digits: String = chars[start..*i].iter().collect();
    digits.parse().ok().map(Count::Fixed)
}

/// Parses a printf numeric argument: decimal, `0x` hex, leading-zero octal,
/// or `'c` for a character code.
fn parse_number(arg: &str) -> Option<i64> {
    let s = arg.trim();
    if s.is_empty() {
        return Some(0);
    }
    if let Some(rest) = s.strip_prefix('\'').or_else(|| s.strip_prefix('"')) {
        return Some(rest.chars().next().map_or(0, |c| c as i64));
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse().ok()?
    };
    Some(if negative { -value } else { value })
}

struct Printf<'a> {
    args: &'a [String],
    next: usize,
    failed: bool,
    stopped: bool,
    out: String,
}

impl<'a> Printf<'a> {
    fn take(&mut self) -> Option<&'a str> {
        let arg = self.args.get(self.next).map(String::as_str);
        if arg.is_some() {
            self.next += 1;
        }
        arg
    }

    fn take_number(&mut self) -> i64 {
        let Some(arg) = self.take() else { return 0 };
        parse_number(arg).unwrap_or_else(|| {
            report(format_args!("printf: {arg}: invalid number"));
            self.failed = true;
            0
        })
    }

    fn resolve(&mut self, count: Option<Count>) -> Option<usize> {
        match count? {
            Count::Fixed(n) => Some(n),
            Count::Star => Some(self.take_number().max(0) as usize),
        }
    }

    fn render(&mut self, pieces: &[Piece]) {
        for piece in pieces {
            if self.stopped {
                return;
            }
            match piece {
                Piece::Text(text) => self.out.push_str(text),
                Piece::Spec(spec) => self.directive(spec),
            }
        }
    }

    fn directive(&mut self, spec: &Spec) {
        let width = self.resolve(spec.width);
        let precision = self.resolve(spec.precision);
        let text = match spec.conv {
            's' | 'b' | 'q' | 'c' => {
                let arg = self.take().unwrap_or("");
                let mut text = match spec.conv {
                    'b' => {
                        let (decoded, stop) = decode_escapes(arg, EscapeStyle::Echo);
                        self.stopped = stop;
                        decoded
                    }
                    'q' => shell_quote(arg),
                    'c' => arg.chars().next().map(String::from).unwrap_or_default(),
                    _ => arg.to_string(),
                };
                if let Some(p) = precision.filter(|_| spec.conv != 'c') {
                    text = text.chars().take(p).collect();
                }
                pad(String::new(), text, width, spec.left, false)
            }
            'f' => {
                let arg = self.take().unwrap_or("0");
                let value: f64 = arg.trim().parse().unwrap_or_else(|_| {
                    report(format_args!("printf: {arg}: invalid number"));
                    self.failed = true;
                    0.0
                });
                let body = format!("{:.*}", precision.unwrap_or(6), value.abs());
                let sign = sign_prefix(value < 0.0, spec);
                pad(sign, body, width, spec.left, spec.zero)
            }
            conv => {
                let value = self.take_number();
                let (sign, mut digits) = match conv {
                    'd' | 'i' => (sign_prefix(value < 0, spec), value.unsigned_abs().to_string()),
                    'u' => (String::new(), (value as u64).to_string()),
                    'x' => (alt_prefix(spec, value, "0x"), format!("{:x}", value as u64)),
                    'X' => (alt_prefix(spec, value, "0X"), format!("{:X}", value as u64)),
                    _ => (alt_prefix(spec, value, "0"), format!("{:o}", value as u64)),
                };
                if let Some(p) = precision {
                    if p == 0 && value == 0 {
                        digits.clear();
                    }
                    while digits.len() < p {
                        digits.insert(0, '0');
                    }
                }
                pad(sign, digits, width, spec.left, spec.zero && precision.is_none())
            }
        };
        self.out.push_str(&text);
    }
}

fn sign_prefix(negative: bool, spec: &Spec) -> String {
    if negative {
        "-".into()
    } else if spec.plus {
        "+".into()
    } else if spec.space {
        " ".into()
    } else {
        String::new()
    }
}

fn alt_prefix(spec: &Spec, value: i64, prefix: &str) -> String {
    if spec.alternate && value != 0 {
        prefix.to_string()
    } else {
        String::new()
    }
}

/// Pads to `width`. Zero padding goes between the prefix and the body.
fn pad(prefix: String, body: String, width: Option<usize>, left: bool, zero: bool) -> String {
    let len = prefix.chars().count() + body.chars().count();
    let Some(fill) = width.and_then(|w| w.checked_sub(len)).filter(|&f| f > 0) else {
        return prefix + &body;
    };
    if left {
        format!("{prefix}{body}{}", " ".repeat(fill))
    } else if zero {
        format!("{prefix}{}{body}", "0".repeat(fill))
    } else {
        format!("{}{prefix}{body}", " ".repeat(fill))
    }
}

/// Formats `args` with `format`, reusing the format while arguments remain.
/// The flag reports that some argument was not a valid number.
pub fn printf(format: &str, args: &[String]) -> Result<(String, bool), String> {
    let pieces = parse_format(format)?;
    let consumes = pieces.iter().any(|p| matches!(p, Piece::Spec(_)));
    let mut state = Printf {
        args,
        next: 0,
        failed: false,
        stopped: false,
        out: String::new(),
    };
    loop {
        state.render(&pieces);
        if state.stopped || !consumes || state.next >= args.len() {
            break;
        }
    }
    Ok((state.out, state.failed))
}

pub struct PrintfCommand;

impl BuiltinCommand for PrintfCommand {
    fn name(&self) -> &'static str {
        "printf"
    }
    fn run(&self, args: &[String], _env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let args = match args.first().map(String::as_str) {
            Some("--") => &args[1..],
            _ => args,
        };
        let Some((format, rest)) = args.split_first() else {
            return fail("printf", "usage: printf format [arguments]", 2);
        };
        match printf(format, rest) {
            Ok((text, failed)) => match write_out(&text) {
                Ok(()) => status(i32::from(failed)),
                Err(_) => status(1),
            },
            Err(msg) => fail("printf", msg, 1),
        }
    }
}

/// Reads one byte from stdin without buffering, so later commands see the
/// rest of the input.
pub(crate) fn read_byte() -> io::Result<Option<u8>> {
    let mut byte = 0u8;
    loop {
        // SAFETY: reading one byte into a local buffer.
        let n = unsafe { libc::read(libc::STDIN_FILENO, (&mut byte as *mut u8).cast(), 1) };
        match n {
            1 => return Ok(Some(byte)),
            0 => return Ok(None),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

/// Splits a line read by `read` into at most `count` fields; the last field
/// takes the rest of the line.
pub fn split_line(line: &str, ifs: &str, count: usize) -> Vec<String> {
    let is_white = |c: char| ifs.contains(c) && c.is_whitespace();
    let is_delim = |c: char| ifs.contains(c);
    let mut fields = Vec::new();
    let mut rest = line.trim_start_matches(is_white);
    while !rest.is_empty() {
        if fields.len() + 1 == count {
            fields.push(rest.trim_end_matches(is_white).to_string());
            return fields;
        }
        let end = rest.find(is_delim).unwrap_or(rest.len());
        fields.push(rest[..end].to_string());
        rest = &rest[end..];
        // One delimiter, with any IFS whitespace around it.
        rest = rest.trim_start_matches(is_white);
        if let Some(c) = rest.chars().next() {
            if is_delim(c) && !c.is_whitespace() {
                rest = rest[c.len_utf8()..].trim_start_matches(is_white);
            }
        }
    }
    fields
}

pub struct ReadCommand;

impl BuiltinCommand for ReadCommand {
    fn name(&self) -> &'static str {
        "read"
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let mut raw = false;
        let mut prompt = None;
        let mut array = None;
        let mut delim = b'\n';
        let mut i = 0;
        while let Some(arg) = args.get(i) {
            match arg.as_str() {
                "-r" => raw = true,
                "-p" | "-a" | "-d" => {
                    let Some(value) = args.get(i + 1) else {
                        return fail("read", format_args!("{arg}: option requires an argument"), 2);
                    };
                    match arg.as_str() {
                        "-p" => prompt = Some(value.clone()),
                        "-a" => array = Some(value.clone()),
                        _ => delim = value.bytes().next().unwrap_or(0),
                    }
                    i += 1;
                }
                "--" => {
                    i += 1;
                    break;
                }
                a if a.starts_with('-') && a.len() > 1 => return fail("read", format_args!("{a}: invalid option"), 2),
                _ => break,
            }
            i += 1;
        }
        let names: Vec<String> = args[i..].to_vec();
        if let Some(bad) = names.iter().chain(array.iter()).find(|n| !is_name(n)) {
            return fail("read", format_args!("`{bad}': not a valid identifier"), 1);
        }
        if let Some(prompt) = prompt {
            if crate::signals::stdin_is_tty() {
                let mut err = io::stderr();
                let _ = err.write_all(prompt.as_bytes());
                let _ = err.flush();
            }
        }

        let mut bytes = Vec::new();
        let mut terminated = false;
        loop {
            let byte = match read_byte() {
                Ok(Some(b)) => b,
                Ok(None) => break,
                Err(e) => return fail("read", crate::executor::os_message(&e), 1),
            };
            if byte == delim {
                terminated = true;
                break;
            }
            if !raw && byte == b'\\' {
                match read_byte() {
                    Ok(Some(b'\n')) => continue,
                    Ok(Some(b)) => bytes.push(b),
                    _ => break,
                }
                continue;
            }
            bytes.push(byte);
        }
        let line = String::from_utf8_lossy(&bytes).into_owned();
        let ifs = env.ifs().to_string();

        if let Some(name) = array {
            let fields = split_line(&line, &ifs, usize::MAX);
            env.unset(&name);
            env.arrays.assign_list(&name, fields);
        } else if names.is_empty() {
            env.set("REPLY", &line);
        } else {
            let mut fields = split_line(&line, &ifs, names.len()).into_iter();
            for name in &names {
                env.set(name, &fields.next().unwrap_or_default());
            }
        }
        status(if terminated { 0 } else { 1 })
    }
}
