//! Blocking byte transports.
//!
//! Every data format reads through a [`ByteReader`] and writes through a [`ByteWriter`].
//! The factories [`new_reader`] and [`new_writer`] pick the transport from a source string:
//! first by scheme prefix, then by file suffix, falling back to a plain file.
//!
//! | Source                   | Transport                                           |
//! |--------------------------|-----------------------------------------------------|
//! | `ssh://user@host/path`   | `ssh ... dd` pipeline, plus a decompression filter  |
//! | `dccp://path`            | `dccp` pipeline, plus a decompression filter        |
//! | `pipein://<command>`     | arbitrary shell command                             |
//! | `*.gz`                   | in-process gzip (flate2)                            |
//! | `*.bz2`                  | `bzip2 -dc` pipeline                                |
//! | `*.lz4`                  | in-process streaming LZ4 frame decoder              |
//! | anything else            | plain file                                          |
//!
//! Pipelines run through `sh -c`. The Rust runtime ignores SIGPIPE, so a child that exits
//! early shows up as a `BrokenPipe` IO error on our side instead of killing the process.
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use super::error::TransportError;
use super::lz4_reader::Lz4Reader;

/// Blocking reader capability
pub trait ByteReader {
    /// Fill `buf` from the stream. Returns fewer than `buf.len()` bytes only at end of
    /// stream, and 0 once the stream is exhausted.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Blocking writer capability
pub trait ByteWriter {
    fn write(&mut self, buf: &[u8]) -> Result<(), TransportError>;
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Keep reading until `buf` is full or the source reports end of stream
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize, std::io::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Any in-process `Read` (plain file, gzip, lz4) exposed as a ByteReader
#[derive(Debug)]
pub struct StreamReader<R: Read> {
    inner: Option<R>,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<R: Read> ByteReader for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let inner = self.inner.as_mut().ok_or(TransportError::Closed)?;
        Ok(read_full(inner, buf)?)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.inner = None;
        Ok(())
    }
}

pub type FileReader = StreamReader<BufReader<File>>;
pub type GzReader = StreamReader<MultiGzDecoder<BufReader<File>>>;
pub type Lz4FileReader = StreamReader<Lz4Reader<BufReader<File>>>;

/// Reads the stdout of a shell pipeline
#[derive(Debug)]
pub struct PipeReader {
    command: String,
    child: Child,
    stdout: Option<ChildStdout>,
    finished: bool,
}

impl PipeReader {
    pub fn new(command: &str) -> Result<Self, TransportError> {
        log::debug!("Spawning input pipeline: {command}");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::SpawnFailed(command.to_string(), e))?;
        let stdout = child.stdout.take();
        Ok(Self {
            command: command.to_string(),
            child,
            stdout,
            finished: false,
        })
    }
}

impl ByteReader for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stdout = self.stdout.as_mut().ok_or(TransportError::Closed)?;
        let n = read_full(stdout, buf)?;
        if n < buf.len() {
            self.finished = true;
        }
        Ok(n)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.stdout.take().is_none() {
            return Ok(());
        }
        let status = self.child.wait()?;
        // A pipeline closed before its end dies of a broken pipe, which is expected
        if self.finished && !status.success() {
            return Err(TransportError::PipeFailed(self.command.clone(), status));
        }
        Ok(())
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{e}");
        }
    }
}

/// Any in-process `Write` exposed as a ByteWriter. `finish` flushes trailers on close.
pub struct StreamWriter<W: Write> {
    inner: Option<W>,
    finish: fn(W) -> std::io::Result<()>,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, finish: fn(W) -> std::io::Result<()>) -> Self {
        Self {
            inner: Some(inner),
            finish,
        }
    }
}

impl<W: Write> ByteWriter for StreamWriter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let inner = self.inner.as_mut().ok_or(TransportError::Closed)?;
        inner.write_all(buf)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.take() {
            Some(inner) => Ok((self.finish)(inner)?),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for StreamWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{e}");
        }
    }
}

/// Writes into the stdin of a shell pipeline
#[derive(Debug)]
pub struct PipeWriter {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl PipeWriter {
    pub fn new(command: &str) -> Result<Self, TransportError> {
        log::debug!("Spawning output pipeline: {command}");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::SpawnFailed(command.to_string(), e))?;
        let stdin = child.stdin.take();
        Ok(Self {
            command: command.to_string(),
            child,
            stdin,
        })
    }
}

impl ByteWriter for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(buf)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin.flush()?;
        drop(stdin);
        let status = self.child.wait()?;
        if !status.success() {
            return Err(TransportError::PipeFailed(self.command.clone(), status));
        }
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{e}");
        }
    }
}

/// Decompression filter chained after a remote fetch
fn decompression_filter(name: &str) -> &'static str {
    if name.ends_with(".gz") {
        " | gzip -dc"
    } else if name.ends_with(".bz2") {
        " | bzip2 -dc"
    } else if name.ends_with(".lz4") {
        " | lz4 -d"
    } else {
        ""
    }
}

/// Quote a single argument for `sh -c`
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Build the shell pipeline for an `ssh://user@host/path` source
fn ssh_pipeline(location: &str) -> Result<String, TransportError> {
    let Some((host, remote_file)) = location.split_once('/') else {
        return Err(TransportError::BadSource(format!(
            "ssh://{location} should be of the form ssh://user@host/file/path"
        )));
    };
    Ok(format!(
        "ssh -e none -T -x -n {host} dd if={remote_file} bs=1024k{}",
        decompression_filter(remote_file)
    ))
}

fn open_file(source: &str) -> Result<BufReader<File>, TransportError> {
    let path = Path::new(source);
    if !path.exists() {
        return Err(TransportError::BadFilePath(path.to_path_buf()));
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Open a reader for `source`
pub fn new_reader(source: &str) -> Result<Box<dyn ByteReader>, TransportError> {
    if let Some(location) = source.strip_prefix("ssh://") {
        Ok(Box::new(PipeReader::new(&ssh_pipeline(location)?)?))
    } else if let Some(location) = source.strip_prefix("dccp://") {
        let pipe = format!(
            "dccp {} /dev/fd/1{}",
            shell_quote(location),
            decompression_filter(source)
        );
        Ok(Box::new(PipeReader::new(&pipe)?))
    } else if let Some(command) = source.strip_prefix("pipein://") {
        Ok(Box::new(PipeReader::new(command)?))
    } else if source.ends_with(".gz") {
        Ok(Box::new(GzReader::new(MultiGzDecoder::new(open_file(
            source,
        )?))))
    } else if source.ends_with(".bz2") {
        if !Path::new(source).exists() {
            return Err(TransportError::BadFilePath(source.into()));
        }
        let pipe = format!("bzip2 -dc {}", shell_quote(source));
        Ok(Box::new(PipeReader::new(&pipe)?))
    } else if source.ends_with(".lz4") {
        Ok(Box::new(Lz4FileReader::new(Lz4Reader::new(open_file(
            source,
        )?))))
    } else {
        Ok(Box::new(FileReader::new(open_file(source)?)))
    }
}

/// Open a writer for `destination`
pub fn new_writer(destination: &str) -> Result<Box<dyn ByteWriter>, TransportError> {
    if let Some(command) = destination.strip_prefix("pipeout://") {
        return Ok(Box::new(PipeWriter::new(command)?));
    }
    let file = BufWriter::new(File::create(destination)?);
    if destination.ends_with(".gz") {
        Ok(Box::new(StreamWriter::new(
            GzEncoder::new(file, Compression::default()),
            |w| w.finish()?.flush(),
        )))
    } else if destination.ends_with(".lz4") {
        Ok(Box::new(StreamWriter::new(
            lz4_flex::frame::FrameEncoder::new(file),
            |w| w.finish().map_err(std::io::Error::other)?.flush(),
        )))
    } else {
        Ok(Box::new(StreamWriter::new(file, |mut w| w.flush())))
    }
}
