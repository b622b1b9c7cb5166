//! PN532 driver over a UART byte stream
//!
//! Normal information frames:
//!
//! ```text
//! 00 00 FF LEN LCS TFI PD0..PDn DCS 00
//! ```
//!
//! `LEN` counts TFI plus data, `LCS` makes `LEN + LCS == 0`, and `DCS`
//! makes `TFI + PD0 + .. + PDn + DCS == 0` (all mod 256). Every command is
//! answered first by an ACK frame, then by a response frame whose first
//! data byte is the command code plus one.

use super::TagReader;
use crate::config::ReaderConfig;
use crate::error::ReaderError;
use jukebox_common::TagUid;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use tracing::{debug, info};

const TFI_HOST_TO_PN532: u8 = 0xD4;
const TFI_PN532_TO_HOST: u8 = 0xD5;

pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
pub const NACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];

/// HSU wake-up: a long preamble so the chip leaves power-down
const WAKEUP: [u8; 16] = [
    0x55, 0x55, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Garbage bytes tolerated before a start code
const MAX_SYNC_BYTES: usize = 64;

const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
const CMD_SAM_CONFIGURATION: u8 = 0x14;
const CMD_RF_CONFIGURATION: u8 = 0x32;
const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;

/// One decoded frame from the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nack,
    /// Information frame payload without the TFI byte
    Data(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub ic: u8,
    pub version: u8,
    pub revision: u8,
    pub support: u8,
}

/// Build a normal information frame
pub fn encode_frame(tfi: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() < 254, "normal frames carry at most 254 bytes");
    let len = (payload.len() + 1) as u8;
    let dcs = payload
        .iter()
        .fold(tfi, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg();

    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&[0x00, 0x00, 0xFF, len, len.wrapping_neg(), tfi]);
    frame.extend_from_slice(payload);
    frame.push(dcs);
    frame.push(0x00);
    frame
}

/// Build a host → PN532 command frame
pub fn encode_command(command: u8, params: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(params.len() + 1);
    payload.push(command);
    payload.extend_from_slice(params);
    encode_frame(TFI_HOST_TO_PN532, &payload)
}

fn map_io(e: std::io::Error) -> ReaderError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::UnexpectedEof => {
            ReaderError::Timeout
        }
        _ => ReaderError::Io(e),
    }
}

fn read_byte<R: Read + ?Sized>(r: &mut R) -> Result<u8, ReaderError> {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte).map_err(map_io)?;
    Ok(byte[0])
}

/// Read one frame, skipping preamble bytes and line noise
pub fn read_frame<R: Read + ?Sized>(r: &mut R) -> Result<Frame, ReaderError> {
    let mut prev = read_byte(r)?;
    let mut skipped = 0;
    loop {
        let byte = read_byte(r)?;
        if prev == 0x00 && byte == 0xFF {
            break;
        }
        prev = byte;
        skipped += 1;
        if skipped > MAX_SYNC_BYTES {
            return Err(ReaderError::Frame("no start code".to_string()));
        }
    }

    let len = read_byte(r)?;
    let lcs = read_byte(r)?;
    match (len, lcs) {
        (0x00, 0xFF) => {
            // postamble; some boards omit it
            let _ = read_byte(r);
            return Ok(Frame::Ack);
        }
        (0xFF, 0x00) => {
            let _ = read_byte(r);
            return Ok(Frame::Nack);
        }
        _ => {}
    }

    if len.wrapping_add(lcs) != 0 {
        return Err(ReaderError::Checksum);
    }
    if len == 0 {
        return Err(ReaderError::Frame("empty information frame".to_string()));
    }

    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).map_err(map_io)?;
    let dcs = read_byte(r)?;
    if body.iter().fold(dcs, |acc, b| acc.wrapping_add(*b)) != 0 {
        return Err(ReaderError::Checksum);
    }
    let _ = read_byte(r);

    if body[0] != TFI_PN532_TO_HOST {
        return Err(ReaderError::Frame(format!(
            "unexpected TFI {:#04x}",
            body[0]
        )));
    }
    body.remove(0);
    Ok(Frame::Data(body))
}

/// Parse an InListPassiveTarget response (after the response code)
///
/// Layout: `NbTg [Tg SENS_RES(2) SEL_RES NFCIDLength NFCID1..]`
pub fn parse_passive_target(resp: &[u8]) -> Result<Option<TagUid>, ReaderError> {
    match resp.first() {
        None => Err(ReaderError::UnexpectedResponse(
            "empty InListPassiveTarget response".to_string(),
        )),
        Some(0) => Ok(None),
        Some(_) => {
            if resp.len() < 6 {
                return Err(ReaderError::UnexpectedResponse(format!(
                    "target data too short ({} bytes)",
                    resp.len()
                )));
            }
            let uid_len = resp[5] as usize;
            let uid = resp.get(6..6 + uid_len).ok_or_else(|| {
                ReaderError::UnexpectedResponse(format!(
                    "NFCID length {} exceeds response",
                    uid_len
                ))
            })?;
            TagUid::from_bytes(uid)
                .map(Some)
                .map_err(|e| ReaderError::UnexpectedResponse(e.to_string()))
        }
    }
}

/// PN532 attached over a byte stream (HSU/UART)
pub struct Pn532<T> {
    port: T,
    firmware: Option<FirmwareVersion>,
}

impl Pn532<Box<dyn SerialPort>> {
    /// Open the configured serial device and initialize the chip
    pub fn open(config: &ReaderConfig) -> Result<Self, ReaderError> {
        let port = serialport::new(&config.serial_port, config.baud_rate)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| ReaderError::Io(e.into()))?;

        let mut reader = Self::new(port);
        reader.init()?;
        Ok(reader)
    }
}

impl<T: Read + Write + Send> Pn532<T> {
    pub fn new(port: T) -> Self {
        Self {
            port,
            firmware: None,
        }
    }

    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.firmware
    }

    /// Wake the chip, check it answers, configure SAM and RF retries
    pub fn init(&mut self) -> Result<FirmwareVersion, ReaderError> {
        self.port.write_all(&WAKEUP)?;
        self.port.flush()?;

        let firmware = self.firmware_version()?;
        info!(
            "PN532 firmware {}.{} (IC {:#04x}, support {:#04x})",
            firmware.version, firmware.revision, firmware.ic, firmware.support
        );

        // Normal mode, 1 s virtual-card timeout, IRQ enabled
        self.call(CMD_SAM_CONFIGURATION, &[0x01, 0x14, 0x01])?;
        // MaxRetries: ATR 0xFF, PSL 0x01, passive activation 0x02
        self.call(CMD_RF_CONFIGURATION, &[0x05, 0xFF, 0x01, 0x02])?;

        self.firmware = Some(firmware);
        Ok(firmware)
    }

    /// Send a command and return the response data after the response code
    pub fn call(&mut self, command: u8, params: &[u8]) -> Result<Vec<u8>, ReaderError> {
        self.port.write_all(&encode_command(command, params))?;
        self.port.flush()?;

        match read_frame(&mut self.port)? {
            Frame::Ack => {}
            Frame::Nack => return Err(ReaderError::Nack),
            Frame::Data(_) => {
                return Err(ReaderError::UnexpectedResponse(
                    "information frame instead of ACK".to_string(),
                ))
            }
        }

        match read_frame(&mut self.port)? {
            Frame::Data(body) => {
                let expected = command.wrapping_add(1);
                match body.first() {
                    Some(&code) if code == expected => Ok(body[1..].to_vec()),
                    other => Err(ReaderError::UnexpectedResponse(format!(
                        "response code {:?}, expected {:#04x}",
                        other, expected
                    ))),
                }
            }
            Frame::Nack => Err(ReaderError::Nack),
            Frame::Ack => Err(ReaderError::UnexpectedResponse(
                "second ACK instead of response".to_string(),
            )),
        }
    }

    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, ReaderError> {
        let resp = self.call(CMD_GET_FIRMWARE_VERSION, &[])?;
        if resp.len() < 4 {
            return Err(ReaderError::UnexpectedResponse(format!(
                "firmware version has {} bytes",
                resp.len()
            )));
        }
        Ok(FirmwareVersion {
            ic: resp[0],
            version: resp[1],
            revision: resp[2],
            support: resp[3],
        })
    }

    /// Look for one ISO14443A target at 106 kbps
    pub fn in_list_passive_target(&mut self) -> Result<Option<TagUid>, ReaderError> {
        let resp = self.call(CMD_IN_LIST_PASSIVE_TARGET, &[0x01, 0x00])?;
        parse_passive_target(&resp)
    }
}

impl<T: Read + Write + Send> TagReader for Pn532<T> {
    fn read_uid(&mut self) -> Result<Option<TagUid>, ReaderError> {
        self.in_list_passive_target()
    }

    fn recover(&mut self) -> Result<(), ReaderError> {
        debug!("Re-initializing PN532");
        self.init().map(|_| ())
    }
}
