//! CQL native protocol v4 framing
//!
//! Only what the sidecar needs: STARTUP, QUERY with a ROWS result, REGISTER
//! and pushed EVENT frames.

use crate::domain::{HostEvent, HostEventKind, Row};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const PROTOCOL_VERSION: u8 = 0x04;
pub const RESPONSE_FLAG: u8 = 0x80;
pub const HEADER_LEN: usize = 9;
/// Upper bound on a frame body (256 MiB, the server default)
pub const MAX_BODY_LEN: usize = 256 * 1024 * 1024;
/// Stream id the server uses for pushed events
pub const EVENT_STREAM: i16 = -1;

const CONSISTENCY_ONE: u16 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Register = 0x0B,
    Event = 0x0C,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x0B => Opcode::Register,
            0x0C => Opcode::Event,
            other => return Err(Error::Protocol(format!("unknown opcode 0x{:02x}", other))),
        })
    }
}

// =============================================================================
// Header
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
    pub opcode: Opcode,
    pub length: usize,
}

impl FrameHeader {
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let mut buf = &buf[..];
        let version = buf.get_u8();
        if version & !RESPONSE_FLAG != PROTOCOL_VERSION {
            return Err(Error::Protocol(format!("unsupported protocol version 0x{:02x}", version)));
        }
        let flags = buf.get_u8();
        let stream = buf.get_i16();
        let opcode = Opcode::from_u8(buf.get_u8())?;
        let length = buf.get_i32();
        if length < 0 || length as usize > MAX_BODY_LEN {
            return Err(Error::Protocol(format!("invalid frame length {}", length)));
        }
        Ok(Self {
            version,
            flags,
            stream,
            opcode,
            length: length as usize,
        })
    }
}

/// A decoded response frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

// =============================================================================
// Request Encoding
// =============================================================================

fn encode_frame(stream: i16, opcode: Opcode, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(0);
    buf.put_i16(stream);
    buf.put_u8(opcode as u8);
    buf.put_i32(body.len() as i32);
    buf.put_slice(body);
    buf.freeze()
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_long_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

pub fn startup(stream: i16) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u16(1);
    put_string(&mut body, "CQL_VERSION");
    put_string(&mut body, "3.0.0");
    encode_frame(stream, Opcode::Startup, &body)
}

pub fn query(stream: i16, cql: &str) -> Bytes {
    let mut body = BytesMut::new();
    put_long_string(&mut body, cql);
    body.put_u16(CONSISTENCY_ONE);
    body.put_u8(0);
    encode_frame(stream, Opcode::Query, &body)
}

pub fn register(stream: i16, events: &[&str]) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u16(events.len() as u16);
    for event in events {
        put_string(&mut body, event);
    }
    encode_frame(stream, Opcode::Register, &body)
}

// =============================================================================
// Response Decoding
// =============================================================================

/// Bounds-checked reader over a frame body
pub struct BodyReader {
    buf: Bytes,
}

impl BodyReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::Protocol(format!(
                "truncated frame body: need {} bytes, have {}",
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        self.need(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|e| Error::Protocol(format!("invalid utf-8: {}", e)))
    }

    /// `[bytes]`: a negative length means null
    pub fn read_bytes(&mut self) -> Result<Option<Bytes>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        let len = len as usize;
        self.need(len)?;
        Ok(Some(self.buf.split_to(len)))
    }

    pub fn read_inet(&mut self) -> Result<SocketAddr> {
        let len = self.read_u8()? as usize;
        self.need(len)?;
        let ip = match len {
            4 => {
                let mut octets = [0u8; 4];
                self.buf.copy_to_slice(&mut octets);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let mut octets = [0u8; 16];
                self.buf.copy_to_slice(&mut octets);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => return Err(Error::Protocol(format!("invalid inet length {}", other))),
        };
        let port = self.read_i32()?;
        let port = u16::try_from(port).map_err(|_| Error::Protocol(format!("invalid port {}", port)))?;
        Ok(SocketAddr::new(ip, port))
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Skip a column type `[option]`, recursing into collection parameters
    fn skip_type(&mut self) -> Result<()> {
        self.skip_type_at(0)
    }

    fn skip_type_at(&mut self, depth: usize) -> Result<()> {
        if depth > MAX_TYPE_DEPTH {
            return Err(Error::Protocol(format!(
                "column type nested deeper than {}",
                MAX_TYPE_DEPTH
            )));
        }
        let next = depth + 1;
        match self.read_u16()? {
            0x0000 => {
                self.read_string()?;
            }
            0x0020 | 0x0022 => self.skip_type_at(next)?,
            0x0021 => {
                self.skip_type_at(next)?;
                self.skip_type_at(next)?;
            }
            0x0030 => {
                self.read_string()?;
                self.read_string()?;
                let fields = self.read_u16()?;
                for _ in 0..fields {
                    self.read_string()?;
                    self.skip_type_at(next)?;
                }
            }
            0x0031 => {
                let items = self.read_u16()?;
                for _ in 0..items {
                    self.skip_type_at(next)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Server ERROR body as (code, message)
pub fn parse_error(body: Bytes) -> Result<(i32, String)> {
    let mut reader = BodyReader::new(body);
    let code = reader.read_i32()?;
    let message = reader.read_string()?;
    Ok((code, message))
}

const RESULT_VOID: i32 = 0x0001;
const RESULT_ROWS: i32 = 0x0002;

const ROWS_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const ROWS_HAS_MORE_PAGES: i32 = 0x0002;
const ROWS_NO_METADATA: i32 = 0x0004;

/// Collections and UDTs nested deeper than this are rejected
const MAX_TYPE_DEPTH: usize = 16;

/// Decode a RESULT body. Non-row results decode as no rows.
pub fn parse_rows(body: Bytes) -> Result<Vec<Row>> {
    let mut reader = BodyReader::new(body);
    let kind = reader.read_i32()?;
    if kind != RESULT_ROWS {
        if kind != RESULT_VOID {
            tracing::trace!("Ignoring result of kind {}", kind);
        }
        return Ok(Vec::new());
    }

    let flags = reader.read_i32()?;
    let column_count = reader.read_i32()?;
    if column_count < 0 {
        return Err(Error::Protocol(format!("invalid column count {}", column_count)));
    }
    if flags & ROWS_HAS_MORE_PAGES != 0 {
        reader.read_bytes()?;
    }
    if flags & ROWS_NO_METADATA != 0 {
        return Err(Error::Protocol("rows result without metadata".to_string()));
    }

    let global = flags & ROWS_GLOBAL_TABLES_SPEC != 0;
    if global {
        reader.read_string()?;
        reader.read_string()?;
    }

    // Every column spec carries at least a name length and a type id
    let mut names = Vec::with_capacity((column_count as usize).min(reader.remaining() / 4));
    for _ in 0..column_count {
        if !global {
            reader.read_string()?;
            reader.read_string()?;
        }
        names.push(reader.read_string()?);
        reader.skip_type()?;
    }

    let row_count = reader.read_i32()?;
    if row_count < 0 {
        return Err(Error::Protocol(format!("invalid row count {}", row_count)));
    }

    // Every cell carries at least a length
    let min_row_len = (names.len() * 4).max(1);
    let mut rows = Vec::with_capacity((row_count as usize).min(reader.remaining() / min_row_len));
    for _ in 0..row_count {
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            columns.push((name.clone(), reader.read_bytes()?));
        }
        rows.push(Row::new(columns));
    }
    Ok(rows)
}

/// Decode an EVENT body. Events the sidecar does not track decode as `None`.
pub fn parse_event(body: Bytes) -> Result<Option<HostEvent>> {
    let mut reader = BodyReader::new(body);
    let event_type = reader.read_string()?;
    let change = reader.read_string()?;

    let kind = match (event_type.as_str(), change.as_str()) {
        ("TOPOLOGY_CHANGE", "NEW_NODE") => HostEventKind::Added,
        ("TOPOLOGY_CHANGE", "REMOVED_NODE") => HostEventKind::Removed,
        ("STATUS_CHANGE", "UP") => HostEventKind::Up,
        ("STATUS_CHANGE", "DOWN") => HostEventKind::Down,
        _ => return Ok(None),
    };
    let address = reader.read_inet()?;
    Ok(Some(HostEvent::new(kind, address)))
}
