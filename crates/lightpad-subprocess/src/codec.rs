//! Text encoding for create-process style APIs
//!
//! POSIX spawn calls take byte strings, so nothing here is needed there.
//! Windows wants one UTF-16 command line string and a UTF-16 environment
//! block; these helpers build both from the UTF-8 values callers use.
//! They are plain functions so they are tested on every host.

use std::string::FromUtf16Error;

use crate::types::EnvMap;

/// Encode UTF-8 text as UTF-16 code units, without a terminator
pub fn utf8_to_utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

/// Decode UTF-16 code units, failing on unpaired surrogates
pub fn utf16_to_utf8(units: &[u16]) -> Result<String, FromUtf16Error> {
    String::from_utf16(units)
}

/// Decode UTF-16 code units, replacing unpaired surrogates with U+FFFD
pub fn utf16_to_utf8_lossy(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

/// Decode a NUL-terminated UTF-16 buffer, ignoring everything after the NUL
pub fn utf16_until_nul(units: &[u16]) -> Result<String, FromUtf16Error> {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    utf16_to_utf8(&units[..end])
}

/// Quote one argument so `CommandLineToArgvW` splits it back unchanged
pub fn quote_windows_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty() || arg.contains([' ', '\t', '\n', '\x0b', '"']);
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Escape the run of backslashes and the quote itself.
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    // Trailing backslashes precede the closing quote.
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Join arguments (program excluded) into a Windows command line tail
pub fn windows_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote_windows_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Full command line: quoted program followed by the quoted arguments
pub fn windows_command_line(command: &[String]) -> String {
    windows_args(command)
}

/// Build a `CREATE_UNICODE_ENVIRONMENT` block
///
/// Entries are sorted case-insensitively by name, each is `NAME=VALUE\0`,
/// and the block ends with an extra `\0`.
pub fn env_block(env: &EnvMap) -> Vec<u16> {
    let mut entries: Vec<(&String, &String)> = env.iter().collect();
    entries.sort_by_cached_key(|(name, _)| name.to_uppercase());

    let mut block = Vec::new();
    for (name, value) in entries {
        block.extend(name.encode_utf16());
        block.push(u16::from(b'='));
        block.extend(value.encode_utf16());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}
