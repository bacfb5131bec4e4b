//! Blocking reads of raw record batches.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use crate::backend::WatchBackend;
use crate::error::{DecodeError, ReadError};
use crate::event::{EventMask, MAX_NAME_LEN, RECORD_HEADER_LEN, RawEvent, WatchId};

/// Reads from the capability into a reusable buffer.
#[derive(Debug)]
pub struct EventReader {
    buf: Vec<u8>,
}

impl EventReader {
    /// Size the buffer to hold `capacity_events` maximum-length records.
    pub fn new(capacity_events: usize) -> Self {
        Self {
            buf: vec![0; capacity_events.max(1) * (RECORD_HEADER_LEN + MAX_NAME_LEN)],
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// Block for at most `timeout` and decode whatever arrives.
    ///
    /// `Ok(None)` means nothing arrived in time. A zero-length read and a
    /// buffer that fails to decode are both errors; the stream cannot be
    /// trusted after either.
    pub fn read_batch<B: WatchBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<RawEvent>>, ReadError> {
        let len = match backend.read(&mut self.buf, timeout).map_err(ReadError::Io)? {
            None => return Ok(None),
            Some(0) => return Err(ReadError::EndOfStream),
            Some(len) => len.min(self.buf.len()),
        };
        let events = decode(&self.buf[..len]).collect::<Result<Vec<_>, _>>()?;
        Ok(Some(events))
    }
}

/// Decode a buffer of back-to-back records.
///
/// Every record is bounds-checked before it is read; the first bad record
/// ends the sequence with an error.
pub fn decode(buf: &[u8]) -> RawEvents<'_> {
    RawEvents {
        buf,
        offset: 0,
        failed: false,
    }
}

/// Iterator returned by [`decode`].
#[derive(Debug)]
pub struct RawEvents<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl Iterator for RawEvents<'_> {
    type Item = Result<RawEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        let offset = self.offset;
        let remaining = self.buf.len() - offset;
        if remaining < RECORD_HEADER_LEN {
            self.failed = true;
            return Some(Err(DecodeError::TruncatedHeader { offset, remaining }));
        }

        let header = &self.buf[offset..offset + RECORD_HEADER_LEN];
        let wd = read_u32(header, 0) as i32;
        let mask = read_u32(header, 4);
        let cookie = read_u32(header, 8);
        let len = read_u32(header, 12) as usize;

        let body_remaining = remaining - RECORD_HEADER_LEN;
        if len > body_remaining {
            self.failed = true;
            return Some(Err(DecodeError::NameOverrun {
                offset,
                len,
                remaining: body_remaining,
            }));
        }

        let start = offset + RECORD_HEADER_LEN;
        let raw_name = &self.buf[start..start + len];
        let name_end = raw_name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(raw_name.len());
        let name = (name_end > 0).then(|| OsStr::from_bytes(&raw_name[..name_end]).to_os_string());

        self.offset = start + len;
        Some(Ok(RawEvent {
            wd: WatchId::new(wd),
            mask: EventMask::from_bits_retain(mask),
            cookie: (cookie != 0).then_some(cookie),
            name,
        }))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(word)
}
