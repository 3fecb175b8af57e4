//! Content-Length framing of DAP messages.

use crate::error::Error;
use crate::log::FileTracer;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};

/// Read a single framed message. Return [`None`] if the stream is closed before a header.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<Value>, Error> {
    let mut content_length: Option<usize> = None;
    let mut header_seen = false;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line)?;
        if read_n == 0 {
            if header_seen {
                return Err(Error::MalformedMessage(
                    "connection closed inside a header".to_string(),
                ));
            }
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if header_seen {
                break;
            }
            continue;
        }
        header_seen = true;
        if let Some(v) = line.strip_prefix("Content-Length:") {
            let len = v
                .trim()
                .parse()
                .map_err(|_| Error::MalformedMessage(format!("bad header: {line}")))?;
            content_length = Some(len);
        }
    }

    let len = content_length
        .ok_or_else(|| Error::MalformedMessage("missing Content-Length header".to_string()))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    let msg: Value = serde_json::from_slice(&buf)?;
    Ok(Some(msg))
}

/// Write a single framed message.
pub fn write_message<W: Write>(writer: &mut W, message: &Value) -> Result<(), Error> {
    let payload = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Reading half of a DAP connection.
pub struct DapReader {
    reader: BufReader<TcpStream>,
    tracer: Option<FileTracer>,
}

impl DapReader {
    pub fn read_message(&mut self) -> Result<Option<Value>, Error> {
        let msg = read_message(&mut self.reader)?;
        if let (Some(tracer), Some(msg)) = (&self.tracer, &msg) {
            tracer.line(&format!("<- {msg}"));
        }
        Ok(msg)
    }
}

/// Writing half of a DAP connection.
pub struct DapWriter {
    stream: TcpStream,
    tracer: Option<FileTracer>,
}

impl DapWriter {
    pub fn write_message(&mut self, message: &Value) -> Result<(), Error> {
        if let Some(tracer) = &self.tracer {
            tracer.line(&format!("-> {message}"));
        }
        write_message(&mut self.stream, message)
    }

    /// Close both directions, a blocked [`DapReader`] wakes up with EOF.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Split a connected stream into framed halves.
pub fn split(stream: TcpStream, tracer: Option<FileTracer>) -> Result<(DapReader, DapWriter), Error> {
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    Ok((
        DapReader {
            reader,
            tracer: tracer.clone(),
        },
        DapWriter { stream, tracer },
    ))
}
