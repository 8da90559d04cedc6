//! Loss-less decoder for ECM (Error-Code Modeler) CD-ROM image streams.
//!
//! An ECM stream stores CD-ROM sectors with their EDC checksum and P/Q
//! error-correction fields stripped; both are fully determined by the
//! payload bytes and are regenerated bit-exactly here while decoding.

pub mod decoder;
pub mod edc_ecc;
pub mod io;
pub mod sector;

pub use decoder::{decode_bytes, decode_stream, DecodeSummary, EcmError};
