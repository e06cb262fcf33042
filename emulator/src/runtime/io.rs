//! Host I/O boundary of the simulator
//!
//! The console is abstracted by the [`Console`] trait:
//! - [`StdConsole`] reads from the process stdin and writes to its stdout.
//! - [`BufferedConsole`] reads from and writes to in-memory buffers, which
//!   can be inspected from outside of the computer.
//!
//! Files opened by the program are tracked in a [`FileTable`].

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Read, Write};
use std::rc::Rc;

use tracing::debug;

use crate::constants::Word;

/// Line-oriented console used by the syscalls
pub trait Console {
    /// Write bytes to the standard output
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Write bytes to the standard error
    fn write_error(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write(bytes)
    }

    /// Read a line, including its trailing newline if any. Returns an empty
    /// string at the end of the input.
    fn read_line(&mut self) -> io::Result<String>;

    /// Read up to `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Console bound to the process standard streams
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()
    }

    fn write_error(&mut self, bytes: &[u8]) -> io::Result<()> {
        io::stderr().lock().write_all(bytes)
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::stdin().lock().read(buf)
    }
}

/// Console reading from an input buffer and writing to an output buffer
///
/// Clones share the same buffers, so a clone kept outside of the computer
/// can feed input and collect output.
#[derive(Debug, Default, Clone)]
pub struct BufferedConsole {
    input: Rc<RefCell<VecDeque<u8>>>,
    output: Rc<RefCell<Vec<u8>>>,
}

impl BufferedConsole {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a console with some input already queued
    #[must_use]
    pub fn with_input(input: &str) -> Self {
        let console = Self::new();
        console.push_input(input);
        console
    }

    /// Queue some input
    pub fn push_input(&self, input: &str) {
        self.input.borrow_mut().extend(input.bytes());
    }

    /// Everything written so far, lossily decoded
    #[must_use]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.borrow()).into_owned()
    }

    /// Take everything written so far, clearing the buffer
    #[must_use]
    pub fn take_output(&self) -> String {
        let bytes = std::mem::take(&mut *self.output.borrow_mut());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Console for BufferedConsole {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.borrow_mut().extend_from_slice(bytes);
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut input = self.input.borrow_mut();
        let mut line = Vec::new();
        while let Some(byte) = input.pop_front() {
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut input = self.input.borrow_mut();
        let count = buf.len().min(input.len());
        for (dest, byte) in buf.iter_mut().zip(input.drain(..count)) {
            *dest = byte;
        }
        Ok(count)
    }
}

/// How a file is opened by the `open` syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    Append,
}

impl FileMode {
    /// Decode the mode flags passed in `$a1`
    #[must_use]
    pub fn from_flags(flags: Word) -> Option<Self> {
        match flags {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            9 => Some(Self::Append),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Stream {
    Stdin,
    Stdout,
    Stderr,
    File(File),
}

#[derive(Debug)]
pub(crate) struct OpenFile {
    name: String,
    stream: Stream,
}

/// File descriptors opened by the program
///
/// Descriptors 0, 1 and 2 are always present and route to the console.
#[derive(Debug)]
pub struct FileTable {
    files: BTreeMap<Word, OpenFile>,

    /// Descriptors opened and closed since the journal was started
    journal: Option<FileJournal>,
}

/// Changes made to a [`FileTable`], in the order they happened
pub(crate) type FileJournal = Vec<FileChange>;

/// Closed files are kept open in the journal so that they can be put back
#[derive(Debug)]
pub(crate) enum FileChange {
    Opened(Word),
    Closed(Word, OpenFile),
}

impl Default for FileTable {
    fn default() -> Self {
        let mut files = BTreeMap::new();
        for (fd, name, stream) in [
            (0, "stdin", Stream::Stdin),
            (1, "stdout", Stream::Stdout),
            (2, "stderr", Stream::Stderr),
        ] {
            files.insert(
                fd,
                OpenFile {
                    name: name.to_owned(),
                    stream,
                },
            );
        }
        Self {
            files,
            journal: None,
        }
    }
}

impl FileTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a host file, returning its descriptor
    pub fn open(&mut self, name: &str, mode: FileMode) -> io::Result<Word> {
        let mut options = OpenOptions::new();
        match mode {
            FileMode::Read => options.read(true),
            FileMode::Write => options.write(true).create(true).truncate(true),
            FileMode::Append => options.append(true).create(true),
        };
        let file = options.open(name)?;

        // Lowest descriptor not in use
        let fd = (3..)
            .find(|fd| !self.files.contains_key(fd))
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no file descriptor left"))?;

        debug!(fd, name, ?mode, "Opened file");
        self.files.insert(
            fd,
            OpenFile {
                name: name.to_owned(),
                stream: Stream::File(file),
            },
        );
        if let Some(journal) = &mut self.journal {
            journal.push(FileChange::Opened(fd));
        }
        Ok(fd)
    }

    #[must_use]
    pub fn is_open(&self, fd: Word) -> bool {
        self.files.contains_key(&fd)
    }

    /// Read up to `buf.len()` bytes from a descriptor
    pub fn read(
        &mut self,
        fd: Word,
        buf: &mut [u8],
        console: &mut dyn Console,
    ) -> io::Result<usize> {
        match self.files.get_mut(&fd).map(|file| &mut file.stream) {
            Some(Stream::Stdin) => console.read(buf),
            Some(Stream::File(file)) => file.read(buf),
            Some(Stream::Stdout | Stream::Stderr) => Err(io::ErrorKind::PermissionDenied.into()),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    /// Write all the bytes to a descriptor
    pub fn write(&mut self, fd: Word, bytes: &[u8], console: &mut dyn Console) -> io::Result<()> {
        match self.files.get_mut(&fd).map(|file| &mut file.stream) {
            Some(Stream::Stdout) => console.write(bytes),
            Some(Stream::Stderr) => console.write_error(bytes),
            Some(Stream::File(file)) => file.write_all(bytes),
            Some(Stream::Stdin) => Err(io::ErrorKind::PermissionDenied.into()),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    /// Close a descriptor. Unknown descriptors are ignored.
    pub fn close(&mut self, fd: Word) {
        if let Some(file) = self.files.remove(&fd) {
            debug!(fd, "Closed file");
            if let Some(journal) = &mut self.journal {
                journal.push(FileChange::Closed(fd, file));
            }
        }
    }

    /// Start recording the descriptors opened and closed
    pub(crate) fn start_journal(&mut self) {
        self.journal = Some(Vec::new());
    }

    /// Stop recording, returning what changed
    pub(crate) fn take_journal(&mut self) -> FileJournal {
        self.journal.take().unwrap_or_default()
    }

    /// Close the descriptors opened and reopen the ones closed since the
    /// journal was started. File contents are left as they are.
    pub(crate) fn rollback(&mut self, journal: FileJournal) {
        for change in journal.into_iter().rev() {
            match change {
                FileChange::Opened(fd) => self.files.remove(&fd),
                FileChange::Closed(fd, file) => self.files.insert(fd, file),
            };
        }
    }

    /// Open descriptors with their names, in ascending order
    pub fn entries(&self) -> impl Iterator<Item = (Word, &str)> {
        self.files.iter().map(|(fd, file)| (*fd, file.name.as_str()))
    }
}
