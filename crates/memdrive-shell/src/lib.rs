//! Line-oriented command shell over a [`MemoryDrive`].
//!
//! Stands in for a driver dispatcher: each line is one request, routed to the
//! matching drive operation, with results printed to an output stream.
//!
//! ```text
//! mkdir /docs
//! touch /docs/readme.txt
//! write /docs/readme.txt Hello, world!
//! cat /docs/readme.txt
//! ls /docs *.txt
//! mv /docs/readme.txt /docs/notes.txt --replace
//! stat /docs/notes.txt
//! truncate /docs/notes.txt 5
//! rm /docs/notes.txt
//! rmdir /docs
//! df
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use memdrive_kernel::{CreateOptions, FileTime, MemoryDrive, NodeKind, SetAttr, VfsError};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::debug;

/// Error type for a single shell line.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid number: {0}")]
    BadNumber(String),
    #[error(transparent)]
    Vfs(#[from] VfsError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Command names, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CommandName {
    Mkdir,
    Touch,
    Write,
    Cat,
    Ls,
    Mv,
    Rm,
    Rmdir,
    Stat,
    Truncate,
    Df,
}

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mkdir { path: String },
    Touch { path: String },
    Write { path: String, text: String },
    Cat { path: String },
    Ls { dir: String, mask: Option<String> },
    Mv { from: String, to: String, replace: bool },
    Rm { path: String },
    Rmdir { path: String },
    Stat { path: String },
    Truncate { path: String, size: u64 },
    Df,
}

impl Command {
    /// Parse one line. Returns `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>, ShellError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (head, rest) = split_word(line);
        let name = CommandName::from_str(head)
            .map_err(|_| ShellError::UnknownCommand(head.to_string()))?;
        let args: Vec<&str> = rest.split_whitespace().collect();

        let one = |usage| match args.as_slice() {
            [path] => Ok(path.to_string()),
            _ => Err(ShellError::Usage(usage)),
        };

        let command = match name {
            CommandName::Mkdir => Command::Mkdir {
                path: one("mkdir PATH")?,
            },
            CommandName::Touch => Command::Touch {
                path: one("touch PATH")?,
            },
            CommandName::Write => {
                let (path, text) = split_word(rest);
                if path.is_empty() {
                    return Err(ShellError::Usage("write PATH TEXT"));
                }
                Command::Write {
                    path: path.to_string(),
                    text: text.to_string(),
                }
            }
            CommandName::Cat => Command::Cat {
                path: one("cat PATH")?,
            },
            CommandName::Ls => match args.as_slice() {
                [dir] => Command::Ls {
                    dir: dir.to_string(),
                    mask: None,
                },
                [dir, mask] => Command::Ls {
                    dir: dir.to_string(),
                    mask: Some(mask.to_string()),
                },
                _ => return Err(ShellError::Usage("ls DIR [MASK]")),
            },
            CommandName::Mv => match args.as_slice() {
                [from, to] => Command::Mv {
                    from: from.to_string(),
                    to: to.to_string(),
                    replace: false,
                },
                [from, to, "--replace"] => Command::Mv {
                    from: from.to_string(),
                    to: to.to_string(),
                    replace: true,
                },
                _ => return Err(ShellError::Usage("mv FROM TO [--replace]")),
            },
            CommandName::Rm => Command::Rm {
                path: one("rm PATH")?,
            },
            CommandName::Rmdir => Command::Rmdir {
                path: one("rmdir PATH")?,
            },
            CommandName::Stat => Command::Stat {
                path: one("stat PATH")?,
            },
            CommandName::Truncate => match args.as_slice() {
                [path, size] => Command::Truncate {
                    path: path.to_string(),
                    size: size
                        .parse()
                        .map_err(|_| ShellError::BadNumber(size.to_string()))?,
                },
                _ => return Err(ShellError::Usage("truncate PATH SIZE")),
            },
            CommandName::Df => {
                if !args.is_empty() {
                    return Err(ShellError::Usage("df"));
                }
                Command::Df
            }
        };
        Ok(Some(command))
    }
}

/// Split off the first whitespace-delimited word; the remainder keeps its
/// inner spacing.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// Executes commands against one drive.
pub struct Shell {
    drive: MemoryDrive,
}

impl Shell {
    pub fn new(drive: MemoryDrive) -> Self {
        Self { drive }
    }

    pub fn drive(&self) -> &MemoryDrive {
        &self.drive
    }

    /// Run one parsed command, printing its result to `out`.
    pub fn execute(&self, command: &Command, out: &mut impl Write) -> Result<(), ShellError> {
        debug!(?command, "execute");
        let d = &self.drive;
        match command {
            Command::Mkdir { path } => {
                d.mkdir(path, &CreateOptions::new())?;
            }
            Command::Touch { path } => {
                if d.exists(path) {
                    d.set_attributes(path, &SetAttr::new().with_last_write_time(FileTime::now()))?;
                } else {
                    d.create_file(path, &CreateOptions::new())?;
                }
            }
            Command::Write { path, text } => {
                if !d.exists(path) {
                    d.create_file(path, &CreateOptions::new())?;
                }
                let handle = d.open(path)?;
                d.set_size(path, 0)?;
                let written = d.write_handle(&handle, 0, text.as_bytes());
                d.close(handle)?;
                writeln!(out, "{} bytes", written?)?;
            }
            Command::Cat { path } => {
                let size = d.get_info(path)?.size;
                let data = d.read(path, 0, usize::try_from(size).unwrap_or(usize::MAX))?;
                writeln!(out, "{}", String::from_utf8_lossy(&data))?;
            }
            Command::Ls { dir, mask } => {
                for entry in d.read_dir(dir, mask.as_deref())? {
                    let marker = match entry.kind {
                        NodeKind::Directory => "d",
                        NodeKind::File => "-",
                    };
                    writeln!(out, "{marker} {:>10} {}", entry.size, entry.name)?;
                }
            }
            Command::Mv { from, to, replace } => {
                d.rename(from, to, *replace)?;
            }
            Command::Rm { path } => {
                d.delete(path)?;
            }
            Command::Rmdir { path } => {
                d.rmdir(path)?;
            }
            Command::Stat { path } => {
                let info = d.get_info(path)?;
                writeln!(out, "name: {}", info.name)?;
                writeln!(out, "kind: {}", info.kind)?;
                writeln!(out, "size: {}", info.size)?;
                writeln!(out, "allocation: {}", info.allocation_size)?;
                writeln!(out, "attributes: {:?}", info.attributes)?;
                writeln!(out, "mode: {:o}", info.mode)?;
                if let Some(tag) = info.reparse_tag {
                    writeln!(out, "reparse: {tag:#x}")?;
                }
            }
            Command::Truncate { path, size } => {
                d.set_size(path, *size)?;
            }
            Command::Df => {
                let st = d.stat_fs();
                writeln!(
                    out,
                    "total: {} free: {} sector: {} ({} of {} sectors free)",
                    st.total_space, st.free_space, st.sector_size, st.free_sectors, st.total_sectors
                )?;
            }
        }
        Ok(())
    }

    /// Run every line of `input`. Failures are reported on `err` and the
    /// script continues. Returns the number of failed lines.
    pub fn run(
        &self,
        input: impl BufRead,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> io::Result<usize> {
        let mut failures = 0;
        for (n, line) in input.lines().enumerate() {
            let line = line?;
            let result = match Command::parse(&line) {
                Ok(Some(cmd)) => self.execute(&cmd, out),
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                failures += 1;
                writeln!(err, "line {}: {e}", n + 1)?;
            }
        }
        Ok(failures)
    }
}
