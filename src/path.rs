//! Remote path resolution
//!
//! Turns a configured prefix, a printf-style sequence format, the task and
//! file indices, and a suffix into the remote file path and its directory.
//! Everything here is pure.

use crate::config::OutputConfig;
use crate::error::{Error, Result};

/// Remote location of one output file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemotePath {
    /// Parent directory of `file_path`; the separator itself for the root
    pub directory: String,
    /// Full remote path, always starting with the separator
    pub file_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Decimal {
        arg: usize,
        width: usize,
        zero_pad: bool,
        left_align: bool,
        plus_sign: bool,
    },
}

/// Parsed printf-style sequence format
///
/// Supports `%%` and `%[index$][flags][width]d` with the flags `0`, `-` and `+`.
/// Arguments are the task index (1) and the file index (2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceFormat {
    pieces: Vec<Piece>,
}

impl SequenceFormat {
    /// Number of arguments a format may refer to
    const ARGS: usize = 2;

    /// Widest field a conversion may ask for
    pub const MAX_WIDTH: usize = 64;

    /// Parse a format string, rejecting anything the formatter can't render
    pub fn parse(format: &str) -> Result<Self> {
        let invalid = |reason: String| Error::config("sequence_format", reason);

        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut next_arg = 0;
        let mut chars = format.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }

            // digits may be an argument index ("2$") or a width ("03")
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                if digits.is_empty() && d == '0' {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let mut explicit_arg = None;
            if !digits.is_empty() && chars.peek() == Some(&'$') {
                chars.next();
                let index: usize = digits
                    .parse()
                    .map_err(|_| invalid(format!("invalid argument index in {format:?}")))?;
                if index == 0 || index > Self::ARGS {
                    return Err(invalid(format!(
                        "argument index {index} out of range in {format:?}"
                    )));
                }
                explicit_arg = Some(index - 1);
                digits.clear();
            }

            let (mut zero_pad, mut left_align, mut plus_sign) = (false, false, false);
            if digits.is_empty() {
                while let Some(flag) = chars.peek().copied() {
                    match flag {
                        '0' => zero_pad = true,
                        '-' => left_align = true,
                        '+' => plus_sign = true,
                        _ => break,
                    }
                    chars.next();
                }
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
            }
            if zero_pad && left_align {
                return Err(invalid(format!(
                    "flags '0' and '-' can't be combined in {format:?}"
                )));
            }
            let width: usize = if digits.is_empty() {
                0
            } else {
                digits
                    .parse()
                    .map_err(|_| invalid(format!("invalid width in {format:?}")))?
            };
            if width > Self::MAX_WIDTH {
                return Err(invalid(format!(
                    "width {width} exceeds {} in {format:?}",
                    Self::MAX_WIDTH
                )));
            }

            match chars.next() {
                Some('d') => {}
                Some(other) => {
                    return Err(invalid(format!(
                        "unsupported conversion '%{other}' in {format:?}"
                    )));
                }
                None => return Err(invalid(format!("dangling '%' in {format:?}"))),
            }

            let arg = match explicit_arg {
                Some(arg) => arg,
                None => {
                    let arg = next_arg;
                    next_arg += 1;
                    arg
                }
            };
            if arg >= Self::ARGS {
                return Err(invalid(format!(
                    "{format:?} needs more than {} arguments",
                    Self::ARGS
                )));
            }

            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Decimal {
                arg,
                width,
                zero_pad,
                left_align,
                plus_sign,
            });
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self { pieces })
    }

    /// Render the format for a task and file index
    pub fn format(&self, task_index: u32, file_index: u32) -> String {
        let args = [task_index, file_index];
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => out.push_str(s),
                Piece::Decimal {
                    arg,
                    width,
                    zero_pad,
                    left_align,
                    plus_sign,
                } => {
                    let digits = args[*arg].to_string();
                    let sign = if *plus_sign { "+" } else { "" };
                    let len = sign.len() + digits.len();
                    let pad = width.saturating_sub(len);
                    if *left_align {
                        out.push_str(sign);
                        out.push_str(&digits);
                        out.extend(std::iter::repeat_n(' ', pad));
                    } else if *zero_pad {
                        out.push_str(sign);
                        out.extend(std::iter::repeat_n('0', pad));
                        out.push_str(&digits);
                    } else {
                        out.extend(std::iter::repeat_n(' ', pad));
                        out.push_str(sign);
                        out.push_str(&digits);
                    }
                }
            }
        }
        out
    }
}

/// Make sure a file extension starts with exactly one leading "."
pub fn normalize_suffix(suffix: &str) -> String {
    if suffix.starts_with('.') {
        suffix.to_string()
    } else {
        format!(".{suffix}")
    }
}

/// Parent directory of a remote path under the given separator convention
pub fn parent_directory(file_path: &str, separator: &str) -> String {
    match file_path.rfind(separator) {
        // overlapping the leading separator counts as the root
        Some(idx) if idx >= separator.len() => file_path[..idx].to_string(),
        _ => separator.to_string(),
    }
}

/// Resolve the remote path of one output file
pub fn resolve(
    path_prefix: &str,
    sequence_format: &SequenceFormat,
    task_index: u32,
    file_index: u32,
    suffix: &str,
    separator: &str,
) -> RemotePath {
    let mut file_path = format!(
        "{path_prefix}{}{}",
        sequence_format.format(task_index, file_index),
        normalize_suffix(suffix)
    );
    if !file_path.starts_with(separator) {
        file_path.insert_str(0, separator);
    }
    let directory = parent_directory(&file_path, separator);
    RemotePath {
        directory,
        file_path,
    }
}

/// [`resolve`] bound to one output configuration
#[derive(Clone, Debug)]
pub struct PathResolver {
    path_prefix: String,
    sequence_format: SequenceFormat,
    suffix: String,
    separator: String,
}

impl PathResolver {
    /// Build a resolver from a configuration
    pub fn from_config(config: &OutputConfig) -> Result<Self> {
        Ok(Self {
            path_prefix: config.path_prefix.clone(),
            sequence_format: SequenceFormat::parse(&config.sequence_format)?,
            suffix: normalize_suffix(&config.file_ext),
            separator: config.directory_separator.clone(),
        })
    }

    /// Remote path of a task's file
    pub fn resolve(&self, task_index: u32, file_index: u32) -> RemotePath {
        resolve(
            &self.path_prefix,
            &self.sequence_format,
            task_index,
            file_index,
            &self.suffix,
            &self.separator,
        )
    }
}
