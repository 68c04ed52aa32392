//! Binary payload shapes for `ModemDevice`'s four commands (§4.5, §6):
//! `Write`/`Read` carry a version byte, sequential offset, and length;
//! `Status` returns the modem's state bits; `Control` carries a one-byte
//! sub-operation plus its own small argument.

use fujinet_wire::{CodecError, Reader, Writer, PROTOCOL_VERSION};

pub const OP_WRITE: u16 = 0x01;
pub const OP_READ: u16 = 0x02;
pub const OP_STATUS: u16 = 0x03;
pub const OP_CONTROL: u16 = 0x04;

pub struct WriteRequest {
    pub offset: u32,
    pub data: Vec<u8>,
}

impl WriteRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        r.version(PROTOCOL_VERSION)?;
        let offset = r.u32()?;
        let data = r.lp_bytes()?.to_vec();
        Ok(Self { offset, data })
    }
}

pub fn encode_write_response(written: u16) -> Vec<u8> {
    let mut w = Writer::new();
    w.version().u16(written);
    w.into_vec()
}

pub struct ReadRequest {
    pub offset: u32,
    pub max_bytes: u16,
}

impl ReadRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        r.version(PROTOCOL_VERSION)?;
        Ok(Self {
            offset: r.u32()?,
            max_bytes: r.u16()?,
        })
    }
}

pub fn encode_read_response(offset: u32, data: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.version().u32(offset).lp_bytes(data);
    w.into_vec()
}

/// Bit flags for `Status`'s leading byte (§4.5 "State bits").
pub mod status_flags {
    pub const COMMAND_MODE: u8 = 1 << 0;
    pub const CONNECTED: u8 = 1 << 1;
    pub const LISTENING: u8 = 1 << 2;
    pub const PENDING_CALLER: u8 = 1 << 3;
    pub const AUTOANSWER: u8 = 1 << 4;
    pub const TELNET: u8 = 1 << 5;
    pub const ECHO: u8 = 1 << 6;
    pub const NUMERIC_RESULT: u8 = 1 << 7;
}

#[allow(clippy::too_many_arguments)]
pub fn encode_status_response(flags: u8, listen_port: u16, rx_avail: u16, host_write_cursor: u32, host_read_cursor: u32) -> Vec<u8> {
    let mut w = Writer::new();
    w.version().u8(flags).u16(listen_port).u16(rx_avail).u32(host_write_cursor).u32(host_read_cursor);
    w.into_vec()
}

/// Sub-operations of the `Control` command (§4.5).
pub mod control_op {
    pub const HANGUP: u8 = 0x01;
    pub const DIAL: u8 = 0x02;
    pub const LISTEN: u8 = 0x03;
    pub const UNLISTEN: u8 = 0x04;
    pub const ANSWER: u8 = 0x05;
    pub const SET_AUTOANSWER: u8 = 0x06;
    pub const SET_TELNET: u8 = 0x07;
    pub const SET_ECHO: u8 = 0x08;
    pub const SET_NUMERIC: u8 = 0x09;
    pub const SET_BAUD: u8 = 0x0A;
    pub const SET_BAUD_LOCK: u8 = 0x0B;
    pub const RESET: u8 = 0x0C;
}

pub enum ControlRequest {
    Hangup,
    Dial(String),
    Listen(u16),
    Unlisten,
    Answer,
    SetAutoAnswer(bool),
    SetTelnet(bool),
    SetEcho(bool),
    SetNumeric(bool),
    SetBaud(u32),
    SetBaudLock(bool),
    Reset,
}

impl ControlRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        r.version(PROTOCOL_VERSION)?;
        let sub_op = r.u8()?;
        Ok(match sub_op {
            control_op::HANGUP => ControlRequest::Hangup,
            control_op::DIAL => ControlRequest::Dial(r.lp_str()?),
            control_op::LISTEN => ControlRequest::Listen(r.u16()?),
            control_op::UNLISTEN => ControlRequest::Unlisten,
            control_op::ANSWER => ControlRequest::Answer,
            control_op::SET_AUTOANSWER => ControlRequest::SetAutoAnswer(r.u8()? != 0),
            control_op::SET_TELNET => ControlRequest::SetTelnet(r.u8()? != 0),
            control_op::SET_ECHO => ControlRequest::SetEcho(r.u8()? != 0),
            control_op::SET_NUMERIC => ControlRequest::SetNumeric(r.u8()? != 0),
            control_op::SET_BAUD => ControlRequest::SetBaud(r.u32()?),
            control_op::SET_BAUD_LOCK => ControlRequest::SetBaudLock(r.u8()? != 0),
            control_op::RESET => ControlRequest::Reset,
            _ => return Err(CodecError::UnexpectedEof),
        })
    }
}

pub fn encode_minimal_response() -> Vec<u8> {
    let mut w = Writer::new();
    w.version();
    w.into_vec()
}
