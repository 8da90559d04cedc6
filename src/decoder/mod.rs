//! ECM container stream decoder.
//!
//! The stream is a 4-byte magic header followed by self-delimiting records.
//! Each record starts with a variable-length descriptor carrying a 2-bit
//! type and a count; type 0 copies raw bytes through, types 1..=3
//! reconstruct full sectors from payload-only bytes, regenerating EDC/ECC.

use std::io::{self, ErrorKind, Read, Write};

use log::{debug, trace};
use thiserror::Error;

use crate::edc_ecc;
use crate::sector::{self, SectorType, SUBHEADER_OFFSET};

/// "ECM\0"
pub const ECM_MAGIC: [u8; 4] = [0x45, 0x43, 0x4D, 0x00];

/// Descriptor count value marking the end of the stream.
const END_OF_RECORDS: u32 = 0xFFFF_FFFF;

const RAW_COPY_CHUNK: usize = 64 * 1024;

/// Decode failures. Running out of input mid-record is not one of them:
/// the stream is self-delimiting and reference decoders accept truncated
/// tails, so the decoder stops cleanly instead.
#[derive(Debug, Error)]
pub enum EcmError {
    #[error("input ends before the 4-byte ECM header")]
    TruncatedHeader,
    #[error("invalid ECM magic: expected \"ECM\\0\", got {0:02X?}")]
    BadMagic([u8; 4]),
    #[error("decode canceled")]
    Canceled,
    #[error("failed to write output image: {0}")]
    Write(#[source] io::Error),
    #[error("failed to read ECM stream: {0}")]
    Read(#[source] io::Error),
}

/// Totals for one completed decode pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Bytes consumed from the ECM stream, header included.
    pub bytes_in: u64,
    /// Bytes appended to the output image.
    pub bytes_out: u64,
    /// Completed records, terminator excluded.
    pub records: u64,
    /// Reconstructed sector counts for record types 1, 2 and 3.
    pub sectors: [u64; 3],
    /// Bytes copied through raw (type 0) records.
    pub raw_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Raw { count: u64 },
    Sectors { sector_type: SectorType, count: u64 },
}

/// Decode an ECM stream from `input` into `output`.
///
/// `progress` is invoked once per completed record with
/// `(bytes_consumed, input_len)`; the first argument never decreases.
/// `cancel` is consulted at the start of every record and a `true` return
/// aborts the decode with [`EcmError::Canceled`].
pub fn decode_stream<R: Read, W: Write>(
    input: R,
    input_len: u64,
    output: W,
    progress: impl FnMut(u64, u64),
    cancel: impl FnMut() -> bool,
) -> Result<DecodeSummary, EcmError> {
    Decoder {
        input,
        output,
        progress,
        cancel,
        input_len,
        consumed: 0,
        summary: DecodeSummary::default(),
    }
    .run()
}

/// Decode an in-memory ECM stream, collecting the image into a `Vec`.
pub fn decode_bytes(input: &[u8]) -> Result<Vec<u8>, EcmError> {
    let mut output = Vec::new();
    decode_stream(input, input.len() as u64, &mut output, |_, _| {}, || false)?;
    Ok(output)
}

struct Decoder<R, W, P, C> {
    input: R,
    output: W,
    progress: P,
    cancel: C,
    input_len: u64,
    consumed: u64,
    summary: DecodeSummary,
}

impl<R, W, P, C> Decoder<R, W, P, C>
where
    R: Read,
    W: Write,
    P: FnMut(u64, u64),
    C: FnMut() -> bool,
{
    fn run(mut self) -> Result<DecodeSummary, EcmError> {
        self.read_header()?;
        debug!("ECM header ok, decoding records");

        loop {
            if (self.cancel)() {
                return Err(EcmError::Canceled);
            }

            let Some(record) = self.read_descriptor()? else {
                break;
            };
            trace!("record {:?}", record);

            let complete = match record {
                Record::Raw { count } => self.copy_raw(count)?,
                Record::Sectors { sector_type, count } => {
                    self.reconstruct_sectors(sector_type, count)?
                }
            };
            if !complete {
                // Body claims more bytes than the input holds; keep what
                // was produced and stop.
                debug!("input exhausted mid-record, stopping");
                break;
            }

            self.summary.records += 1;
            (self.progress)(self.consumed, self.input_len);
        }

        self.summary.bytes_in = self.consumed;
        Ok(self.summary)
    }

    fn read_header(&mut self) -> Result<(), EcmError> {
        let mut magic = [0u8; 4];
        if !self.read_full(&mut magic)? {
            return Err(EcmError::TruncatedHeader);
        }
        if magic != ECM_MAGIC {
            return Err(EcmError::BadMagic(magic));
        }
        Ok(())
    }

    /// Decode one variable-length record descriptor. `None` means the
    /// stream ended, either through the count sentinel or by running out
    /// of input at a descriptor boundary.
    fn read_descriptor(&mut self) -> Result<Option<Record>, EcmError> {
        let Some(first) = self.read_byte()? else {
            return Ok(None);
        };

        let record_type = first & 0x03;
        let mut num = u32::from((first >> 2) & 0x1F);
        let mut bits = 5u32;
        let mut last = first;

        // High bit set means another 7 payload bits follow. Bits landing at
        // position 32 or above cannot change a 32-bit count and are dropped.
        while last & 0x80 != 0 {
            let Some(next) = self.read_byte()? else {
                return Ok(None);
            };
            if bits < 32 {
                num |= u32::from(next & 0x7F) << bits;
            }
            bits += 7;
            last = next;
        }

        // The sentinel is checked on the raw value, before the +1.
        if num == END_OF_RECORDS {
            debug!("terminator descriptor reached");
            return Ok(None);
        }
        let count = u64::from(num) + 1;

        Ok(Some(match record_type {
            0 => Record::Raw { count },
            1 => Record::Sectors { sector_type: SectorType::Mode1, count },
            2 => Record::Sectors { sector_type: SectorType::Mode2Form1, count },
            _ => Record::Sectors { sector_type: SectorType::Mode2Form2, count },
        }))
    }

    /// Copy `count` bytes from input to output verbatim. Returns `false`
    /// if the input ran out first.
    fn copy_raw(&mut self, count: u64) -> Result<bool, EcmError> {
        let mut chunk = [0u8; RAW_COPY_CHUNK];
        let mut remaining = count;

        while remaining > 0 {
            let want = remaining.min(RAW_COPY_CHUNK as u64) as usize;
            let got = match self.input.read(&mut chunk[..want]) {
                Ok(0) => return Ok(false),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(EcmError::Read(e)),
            };
            self.consumed += got as u64;

            self.output.write_all(&chunk[..got]).map_err(EcmError::Write)?;
            self.summary.bytes_out += got as u64;
            self.summary.raw_bytes += got as u64;
            remaining -= got as u64;
        }

        Ok(true)
    }

    /// Reconstruct `count` sectors of one type. Returns `false` if the
    /// input ran out before the last sector's payload was complete; sectors
    /// finished before that point have already been written.
    fn reconstruct_sectors(
        &mut self,
        sector_type: SectorType,
        count: u64,
    ) -> Result<bool, EcmError> {
        let output_range = sector_type.output_range();

        for _ in 0..count {
            let mut sector = sector::new_sector(sector_type);
            if !self.read_sector_payload(&mut sector, sector_type)? {
                return Ok(false);
            }

            edc_ecc::eccedc_generate(&mut sector, sector_type);

            self.output
                .write_all(&sector[output_range.clone()])
                .map_err(EcmError::Write)?;
            self.summary.bytes_out += output_range.len() as u64;
            self.summary.sectors[sector_type.index()] += 1;
        }

        Ok(true)
    }

    /// Read one sector's stored payload into its layout positions.
    fn read_sector_payload(
        &mut self,
        sector: &mut [u8],
        sector_type: SectorType,
    ) -> Result<bool, EcmError> {
        match sector_type {
            SectorType::Mode1 => {
                // 3-byte address, then user data. The mode byte sitting
                // between them is implied by the record type and is not
                // part of the stream.
                Ok(self.read_full(&mut sector[0x00C..0x00F])?
                    && self.read_full(&mut sector[0x010..0x810])?)
            }
            SectorType::Mode2Form1 | SectorType::Mode2Form2 => {
                let len = sector_type.payload_len();
                if !self.read_full(&mut sector[0x014..0x014 + len])? {
                    return Ok(false);
                }
                // The stream stores one copy of the 4-byte sub-header;
                // restore the first half from it.
                sector.copy_within(0x014..0x018, SUBHEADER_OFFSET);
                Ok(true)
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>, EcmError> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.consumed += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(EcmError::Read(e)),
            }
        }
    }

    /// Fill `buf` completely, or return `false` on end of input.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<bool, EcmError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    filled += n;
                    self.consumed += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(EcmError::Read(e)),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_of(bytes: &[u8]) -> Option<Record> {
        let mut decoder = Decoder {
            input: bytes,
            output: Vec::new(),
            progress: |_, _| {},
            cancel: || false,
            input_len: bytes.len() as u64,
            consumed: 0,
            summary: DecodeSummary::default(),
        };
        decoder.read_descriptor().unwrap()
    }

    #[test]
    fn test_single_byte_descriptor() {
        assert_eq!(descriptor_of(&[0x00]), Some(Record::Raw { count: 1 }));
        assert_eq!(
            descriptor_of(&[0x01]),
            Some(Record::Sectors { sector_type: SectorType::Mode1, count: 1 })
        );
        // Highest count a single byte can carry: num = 0x1F.
        assert_eq!(descriptor_of(&[0x7C]), Some(Record::Raw { count: 0x20 }));
    }

    #[test]
    fn test_multi_byte_descriptor() {
        // 0xFD continues with 5 low bits of 0x1F; the next byte supplies
        // bits 5.. of the count.
        assert_eq!(
            descriptor_of(&[0xFD, 0x01]),
            Some(Record::Sectors { sector_type: SectorType::Mode1, count: 0x40 })
        );
        assert_eq!(
            descriptor_of(&[0xFD, 0x02]),
            Some(Record::Sectors { sector_type: SectorType::Mode1, count: 0x60 })
        );
    }

    #[test]
    fn test_terminator_descriptor() {
        // Canonical encoding of num == 0xFFFFFFFF.
        assert_eq!(descriptor_of(&[0xFC, 0xFF, 0xFF, 0xFF, 0x3F]), None);
    }

    #[test]
    fn test_descriptor_at_end_of_input() {
        assert_eq!(descriptor_of(&[]), None);
        // Continuation bit set but no byte follows.
        assert_eq!(descriptor_of(&[0x80]), None);
        assert_eq!(descriptor_of(&[0xFD]), None);
    }

    #[test]
    fn test_oversized_descriptor_does_not_panic() {
        // Enough continuation bytes push the bit cursor past 32; the extra
        // payload bits are dropped rather than overflowing the shift.
        let record = descriptor_of(&[0x80, 0x81, 0x81, 0x81, 0x81, 0x01, 0x00]);
        assert!(matches!(record, Some(Record::Raw { .. })));
    }
}
