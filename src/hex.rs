//! Intel HEX output.

use std::{
    fmt::{self, Display, Formatter},
    io::{self, Write},
};

pub const DATA: u8 = 0x00;
pub const EOF: u8 = 0x01;

/// Longest data payload of one record.
pub const MAX_DATA: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    pub addr: u16,
    pub kind: u8,
    pub data: Vec<u8>,
}

impl HexRecord {
    pub fn data(addr: u16, data: Vec<u8>) -> Self {
        Self {
            addr,
            kind: DATA,
            data,
        }
    }

    pub fn eof() -> Self {
        Self {
            addr: 0,
            kind: EOF,
            data: Vec::new(),
        }
    }

    /// Two's complement of the byte sum of count, address, type and data.
    pub fn checksum(&self) -> u8 {
        let [hi, lo] = self.addr.to_be_bytes();
        let sum = self
            .data
            .iter()
            .fold(
                (self.data.len() as u8)
                    .wrapping_add(hi)
                    .wrapping_add(lo)
                    .wrapping_add(self.kind),
                |sum, &byte| sum.wrapping_add(byte),
            );
        (!sum).wrapping_add(1)
    }
}

impl Display for HexRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, ":{:02X}{:04X}{:02X}", self.data.len(), self.addr, self.kind)?;
        for byte in &self.data {
            write!(f, "{byte:02X}")?;
        }
        write!(f, "{:02X}", self.checksum())
    }
}

/// Groups consecutive addresses into data records and appends the EOF record.
pub fn records(bytes: &[(u16, u8)]) -> Vec<HexRecord> {
    let mut records: Vec<HexRecord> = Vec::new();
    let mut last: Option<u16> = None;
    for &(addr, byte) in bytes {
        if let Some(last) = last {
            if addr <= last {
                tracing::warn!("{addr:04X} overlaps or precedes {last:04X}");
            }
        }
        let follows = last.and_then(|last| last.checked_add(1)) == Some(addr);
        match records.last_mut() {
            Some(record) if follows && record.data.len() < MAX_DATA => record.data.push(byte),
            _ => records.push(HexRecord::data(addr, vec![byte])),
        }
        last = Some(addr);
    }
    records.push(HexRecord::eof());
    records
}

pub fn write_hex<W: Write>(mut out: W, bytes: &[(u16, u8)]) -> io::Result<()> {
    for record in records(bytes) {
        writeln!(out, "{record}")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(bytes: &[(u16, u8)]) -> Vec<String> {
        records(bytes).iter().map(ToString::to_string).collect()
    }

    #[test]
    fn two_byte_record() {
        assert_eq!(lines(&[(0x0000, 0x74), (0x0001, 0x01)]), [":02000000740189", ":00000001FF"]);
    }

    #[test]
    fn empty_program_is_just_eof() {
        assert_eq!(lines(&[]), [":00000001FF"]);
    }

    #[test]
    fn records_split_at_sixteen_bytes_and_gaps() {
        let mut bytes: Vec<(u16, u8)> = (0..20).map(|i| (0x0100 + i, i as u8)).collect();
        bytes.push((0x0200, 0xAA));
        let records = records(&bytes);
        let shape: Vec<(u16, usize)> = records.iter().map(|r| (r.addr, r.data.len())).collect();
        assert_eq!(shape, [(0x0100, 16), (0x0110, 4), (0x0200, 1), (0x0000, 0)]);
    }

    #[test]
    fn checksums_zero_the_sum() {
        let bytes: Vec<(u16, u8)> = (0..40).map(|i| (0x1234 + i, (i * 37) as u8)).collect();
        for record in records(&bytes) {
            let [hi, lo] = record.addr.to_be_bytes();
            let sum = record
                .data
                .iter()
                .fold(record.data.len() as u8, |sum, &byte| sum.wrapping_add(byte))
                .wrapping_add(hi)
                .wrapping_add(lo)
                .wrapping_add(record.kind)
                .wrapping_add(record.checksum());
            assert_eq!(sum, 0);
        }
    }

    #[test]
    fn writes_one_record_per_line() {
        let mut out = Vec::new();
        write_hex(&mut out, &[(0x0000, 0x00)]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ":0100000000FF\n:00000001FF\n");
    }
}
