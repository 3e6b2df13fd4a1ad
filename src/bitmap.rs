//! Packed boolean vectors used throughout the metadata grammar, and the
//! CRC-carrying variant ("digest") used for pack/folder/substream checksums.

use std::io::Read;

use crate::{
    bitset::BitSet,
    cursor::{read_u32, read_u8},
    error::Error,
};

/// A packed boolean vector: either every index is implicitly set (the
/// `all_defined` wire shorthand) or an explicit MSB-first bitmap follows.
#[derive(Debug, Default, Clone)]
pub(crate) struct Bitmap {
    bits: BitSet,
}

impl Bitmap {
    pub(crate) fn test(&self, index: usize) -> bool {
        self.bits.contains(index)
    }

    pub(crate) fn len(&self) -> usize {
        self.bits.len()
    }

    /// Reads an `all_defined` byte, then the MSB-first bitmap if it was 0.
    pub(crate) fn read<R: Read>(reader: &mut R, size: usize) -> Result<Self, Error> {
        let all_defined = read_u8(reader)?;
        let bits = if all_defined != 0 {
            let mut bits = BitSet::with_capacity(size);
            for i in 0..size {
                bits.insert(i);
            }
            bits
        } else {
            read_raw_bits(reader, size)?
        };
        Ok(Self { bits })
    }
}

fn read_raw_bits<R: Read>(reader: &mut R, size: usize) -> Result<BitSet, Error> {
    let mut bits = BitSet::with_capacity(size);
    let mut mask = 0u32;
    let mut cache = 0u32;
    for i in 0..size {
        if mask == 0 {
            mask = 0x80;
            cache = read_u8(reader)? as u32;
        }
        if (cache & mask) != 0 {
            bits.insert(i);
        }
        mask >>= 1;
    }
    Ok(bits)
}

/// A [`Bitmap`] paired with a dense CRC-32 vector: entries at unset indices
/// are left zero rather than omitted, matching the wire format's own
/// sparse-on-the-wire, dense-in-memory shape.
#[derive(Debug, Default, Clone)]
pub(crate) struct BitmapDigest {
    pub(crate) bitmap: Bitmap,
    pub(crate) crcs: Vec<u64>,
}

impl BitmapDigest {
    pub(crate) fn contains(&self, index: usize) -> bool {
        self.bitmap.test(index)
    }

    pub(crate) fn read<R: Read>(reader: &mut R, size: usize) -> Result<Self, Error> {
        let bitmap = Bitmap::read(reader, size)?;
        let mut crcs = vec![0u64; size];
        for (i, crc) in crcs.iter_mut().enumerate() {
            if bitmap.test(i) {
                *crc = read_u32(reader)? as u64;
            }
        }
        Ok(Self { bitmap, crcs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_all_defined_shorthand() {
        let mut data: &[u8] = &[1];
        let bm = Bitmap::read(&mut data, 5).unwrap();
        for i in 0..5 {
            assert!(bm.test(i));
        }
    }

    #[test]
    fn bitmap_explicit_bits_are_msb_first() {
        // 0b1001_0001 => bits 0, 3, 7 set.
        let mut data: &[u8] = &[0, 0b1001_0001];
        let bm = Bitmap::read(&mut data, 8).unwrap();
        assert!(bm.test(0));
        assert!(!bm.test(1));
        assert!(!bm.test(2));
        assert!(bm.test(3));
        assert!(!bm.test(4));
        assert!(!bm.test(5));
        assert!(!bm.test(6));
        assert!(bm.test(7));
    }

    #[test]
    fn digest_leaves_holes_zero() {
        // all_defined=0, bits=0b1010_0000 (indices 0 and 2 set), then two u32 CRCs.
        let mut data: &[u8] = &[0, 0b1010_0000, 0xAA, 0, 0, 0, 0xBB, 0, 0, 0];
        let digest = BitmapDigest::read(&mut data, 4).unwrap();
        assert_eq!(digest.crcs, vec![0xAA, 0, 0xBB, 0]);
        assert!(digest.contains(0));
        assert!(!digest.contains(1));
        assert!(digest.contains(2));
        assert!(!digest.contains(3));
    }
}
