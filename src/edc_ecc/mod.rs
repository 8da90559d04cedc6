// EDC/ECC regeneration for CD-ROM data sectors.
//
// EDC is a 32-bit CRC (polynomial 0xD8018001) over a layout-specific region
// of the sector. ECC is the two-layer P/Q parity of the CIRC scheme over
// GF(2^8) with field polynomial 0x11D, computed column-wise through the
// interleave patterns native to Mode 1 / Mode 2 Form 1 sectors.

use std::sync::LazyLock;

use crate::sector::{
    SectorType, ECC_P_OFFSET, ECC_Q_OFFSET, HEADER_OFFSET, MODE1_EDC_OFFSET, MODE1_PAD_RANGE,
    MODE2_FORM1_EDC_OFFSET, MODE2_FORM2_EDC_OFFSET, SUBHEADER_OFFSET,
};

const EDC_POLY: u32 = 0xD801_8001;
const GF8_PRIM_POLY: u16 = 0x11D; // x^8 + x^4 + x^3 + x^2 + 1

static EDC_LUT: LazyLock<[u32; 256]> = LazyLock::new(|| {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut v = i as u32;
        for _ in 0..8 {
            v = (v >> 1) ^ if v & 1 != 0 { EDC_POLY } else { 0 };
        }
        *entry = v;
    }
    table
});

/// Multiplication by alpha in GF(2^8).
static ECC_F: LazyLock<[u8; 256]> = LazyLock::new(|| {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut v = (i as u16) << 1;
        if v & 0x100 != 0 {
            v ^= GF8_PRIM_POLY;
        }
        *entry = v as u8;
    }
    table
});

/// Inverse of the parity fold: ECC_B[i ^ ECC_F[i]] == i.
static ECC_B: LazyLock<[u8; 256]> = LazyLock::new(|| {
    let ecc_f = &*ECC_F;
    let mut table = [0u8; 256];
    for i in 0..=255u8 {
        table[(i ^ ecc_f[i as usize]) as usize] = i;
    }
    table
});

/// Compute the EDC checksum of `data`. The caller stores it little-endian.
pub fn edc_compute(data: &[u8]) -> u32 {
    let lut = &*EDC_LUT;

    let mut edc = 0u32;
    for &byte in data {
        edc = (edc >> 8) ^ lut[((edc ^ u32::from(byte)) & 0xFF) as usize];
    }

    edc
}

fn edc_write(sector: &mut [u8], src_start: usize, len: usize, dest: usize) {
    let edc = edc_compute(&sector[src_start..src_start + len]);
    sector[dest..dest + 4].copy_from_slice(&edc.to_le_bytes());
}

/// One parity pass over the sector's ECC source region (0x00C onward),
/// writing `2 * major_count` parity bytes at `dest_offset`.
///
/// Works in place: for both the P and Q parameter sets the interleave
/// indices stay strictly below `dest_offset`, so splitting the buffer at
/// the destination is sound.
fn ecc_compute_block(
    sector: &mut [u8],
    dest_offset: usize,
    major_count: usize,
    minor_count: usize,
    major_mult: usize,
    minor_inc: usize,
) {
    let ecc_f = &*ECC_F;
    let ecc_b = &*ECC_B;

    let (front, dest) = sector.split_at_mut(dest_offset);
    let src = &front[HEADER_OFFSET..];
    let size = major_count * minor_count;

    for major in 0..major_count {
        let mut index = (major >> 1) * major_mult + (major & 1);
        let mut ecc_a = 0u8;
        let mut ecc_b_acc = 0u8;

        for _ in 0..minor_count {
            let t = src[index];
            index += minor_inc;
            if index >= size {
                index -= size;
            }
            ecc_a ^= t;
            ecc_b_acc ^= t;
            ecc_a = ecc_f[ecc_a as usize];
        }

        ecc_a = ecc_b[(ecc_f[ecc_a as usize] ^ ecc_b_acc) as usize];
        dest[major] = ecc_a;
        dest[major + major_count] = ecc_a ^ ecc_b_acc;
    }
}

/// Generate the P and Q parity blocks for a Mode 1 / Mode 2 Form 1 sector.
///
/// Mode 2 parity is defined over a zeroed address field, so when
/// `zero_address` is set the 4 header bytes are blanked for both passes and
/// restored afterwards.
pub fn ecc_generate(sector: &mut [u8], zero_address: bool) {
    let mut address = [0u8; 4];
    if zero_address {
        address.copy_from_slice(&sector[HEADER_OFFSET..HEADER_OFFSET + 4]);
        sector[HEADER_OFFSET..HEADER_OFFSET + 4].fill(0);
    }

    // P parity: 86 columns of 24 bytes
    ecc_compute_block(sector, ECC_P_OFFSET, 86, 24, 2, 86);
    // Q parity: 52 diagonals of 43 bytes, covering the P bytes just written
    ecc_compute_block(sector, ECC_Q_OFFSET, 52, 43, 86, 88);

    if zero_address {
        sector[HEADER_OFFSET..HEADER_OFFSET + 4].copy_from_slice(&address);
    }
}

/// Regenerate every stripped field of a reconstructed sector.
pub fn eccedc_generate(sector: &mut [u8], sector_type: SectorType) {
    match sector_type {
        SectorType::Mode1 => {
            edc_write(sector, 0x000, 0x810, MODE1_EDC_OFFSET);
            sector[MODE1_PAD_RANGE].fill(0);
            ecc_generate(sector, false);
        }
        SectorType::Mode2Form1 => {
            edc_write(sector, SUBHEADER_OFFSET, 0x808, MODE2_FORM1_EDC_OFFSET);
            ecc_generate(sector, true);
        }
        SectorType::Mode2Form2 => {
            // Form 2 carries no P/Q parity, only the trailing EDC.
            edc_write(sector, SUBHEADER_OFFSET, 0x91C, MODE2_FORM2_EDC_OFFSET);
        }
    }
}
