//! Integration tests against hand-built 7z archives.
//!
//! Every archive below is built byte-by-byte from the tag-structured
//! metadata grammar, using the COPY method (id `0x00`) for its one folder so
//! no real LZMA/Zstd encoder is needed to produce a valid fixture. Each
//! archive was cross-checked against an independent parser before being
//! embedded here.

use std::io::{Cursor, Read};

use sevenz_core::{Archive, ArchiveReader, Error, ExtractSink};

// Single file "a.txt" containing "hello world", plain (unencoded) header.
const SINGLE_FILE: &[u8] = &[
    0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04, 0xA1, 0xF5, 0x36, 0xDF, 0x0B, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x6E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE8, 0x49, 0x6A, 0xE5,
    0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x20, 0x77, 0x6F, 0x72, 0x6C, 0x64, 0x01, 0x04, 0x06, 0xFF, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x09, 0xFF, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x0B, 0xFF, 0x01, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x0C, 0xFF, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x0A, 0x01,
    0x85, 0x11, 0x4A, 0x0D, 0x00, 0x00, 0x05, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x11, 0xFF, 0x0D, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x61, 0x00, 0x2E, 0x00, 0x74,
    0x00, 0x78, 0x00, 0x74, 0x00, 0x00, 0x00, 0x00, 0x00,
];

// Same single-file layout as SINGLE_FILE, but truncated 5 bytes into the
// next header, so the header region runs past the end of the byte stream.
const TRUNCATED_HEADER: &[u8] = &[
    0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04, 0xA1, 0xF5, 0x36, 0xDF, 0x0B, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x6E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE8, 0x49, 0x6A, 0xE5,
    0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x20, 0x77, 0x6F, 0x72, 0x6C, 0x64, 0x01, 0x04, 0x06, 0xFF, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x09, 0xFF, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x0B, 0xFF, 0x01, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x0C, 0xFF, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x0A, 0x01,
    0x85, 0x11, 0x4A, 0x0D, 0x00, 0x00, 0x05, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x11, 0xFF, 0x0D, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x61, 0x00, 0x2E, 0x00, 0x74,
    0x00, 0x78, 0x00, 0x74,
];

// Encoded (COPY-wrapped) header whose rehydrated body describes a single
// empty directory named "dir".
const ENCODED_HEADER: &[u8] = &[
    0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04, 0xDA, 0x48, 0x78, 0xE1, 0x2C, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x92, 0xAF, 0x13, 0x1B,
    0x01, 0x05, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0E, 0xFF, 0x02, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x11, 0xFF, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x64, 0x00, 0x69, 0x00, 0x72, 0x00, 0x00, 0x00, 0x00, 0x00, 0x17, 0x06, 0xFF, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x09, 0xFF, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x0B, 0xFF, 0x01, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x0C, 0xFF, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

// Three files ("f0.bin", "f1.bin", "f2.bin") of sizes 100/200/300 bytes,
// packed into one solid folder with explicit substream sizes and per-file
// CRCs.
const MULTI_FILE_SOLID: &[u8] = &[
    0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04, 0xB2, 0x0E, 0xFA, 0x0A, 0x58, 0x02, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xB1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x68, 0xAA, 0xD1, 0x19,
    0xE1, 0x3B, 0x03, 0x2E, 0x11, 0x2A, 0x32, 0xB5, 0x79, 0x08, 0x0F, 0x08, 0xB1, 0xF7, 0xED, 0x4C,
    0x2E, 0x5D, 0x3A, 0x07, 0xF9, 0x7F, 0x21, 0xEE, 0x23, 0x2D, 0x17, 0x8A, 0x20, 0x9A, 0xF6, 0xB5,
    0x88, 0x7F, 0x66, 0xE8, 0x09, 0x24, 0x02, 0xAA, 0x49, 0xF2, 0xC1, 0x55, 0x1B, 0x27, 0xFE, 0x53,
    0x26, 0x6E, 0x49, 0x0D, 0xB1, 0x38, 0x48, 0x9C, 0xE8, 0x14, 0xD5, 0x8D, 0x14, 0x5A, 0x8B, 0x4F,
    0x99, 0x4F, 0xED, 0x15, 0xC5, 0xB2, 0xFD, 0xAE, 0xEF, 0xF3, 0x17, 0xF1, 0x57, 0xE1, 0xE0, 0x97,
    0x8C, 0x3F, 0x5F, 0xD5, 0xDF, 0x3D, 0x34, 0xF8, 0xC0, 0x82, 0x62, 0xB0, 0x37, 0x50, 0x89, 0x4F,
    0xA5, 0xE4, 0x24, 0x28, 0xCA, 0x6D, 0x18, 0x92, 0x13, 0x70, 0x2C, 0xA2, 0x9C, 0xEB, 0x21, 0x83,
    0x25, 0xDA, 0x67, 0x33, 0xCB, 0x63, 0xEB, 0x78, 0xB8, 0x69, 0xD7, 0x59, 0x68, 0x9A, 0x1E, 0xB4,
    0x4E, 0xFF, 0xF1, 0xAA, 0x47, 0x43, 0x18, 0x54, 0x4A, 0x23, 0xA6, 0x57, 0x00, 0x1F, 0x2C, 0x4B,
    0x6F, 0x14, 0xDD, 0xC8, 0xA6, 0x6A, 0xC3, 0x8F, 0x9B, 0xD8, 0xA3, 0x4D, 0x2F, 0x85, 0x8E, 0xD2,
    0xCC, 0x8D, 0x3A, 0xC0, 0x8C, 0x6D, 0x98, 0xCB, 0x1A, 0xB2, 0xE1, 0x77, 0xFB, 0x54, 0xC2, 0x9D,
    0x01, 0x25, 0xF5, 0xCA, 0x98, 0xDB, 0xF5, 0x5F, 0xCD, 0xF4, 0x50, 0x90, 0xBD, 0xB1, 0x69, 0x56,
    0xEA, 0xF2, 0x0E, 0xEF, 0x35, 0x0D, 0xBB, 0xF3, 0x21, 0x47, 0xA9, 0xB2, 0x94, 0x98, 0xA9, 0x96,
    0x63, 0x8E, 0x25, 0x68, 0xAD, 0xAB, 0xA4, 0xEA, 0x88, 0x2B, 0x3D, 0x7D, 0x83, 0xBE, 0x46, 0x0E,
    0xCA, 0x13, 0x16, 0x6A, 0x4F, 0xA0, 0xB5, 0xDE, 0x23, 0x9C, 0x85, 0xF8, 0x70, 0xB2, 0x2A, 0x09,
    0xA9, 0x75, 0x53, 0xF4, 0xFF, 0x47, 0x22, 0x4A, 0x7C, 0x54, 0xC9, 0xA7, 0x42, 0xE4, 0x14, 0xBE,
    0x23, 0xBC, 0xD1, 0x16, 0x24, 0xA0, 0x74, 0x65, 0xB1, 0xC2, 0xFC, 0x1A, 0x0F, 0xE5, 0x29, 0x96,
    0xDA, 0xAE, 0x4B, 0xF8, 0x7B, 0x0F, 0xB6, 0xBE, 0xD4, 0x59, 0x26, 0x09, 0x6C, 0x64, 0x48, 0x43,
    0x82, 0x19, 0xEF, 0xB9, 0xBE, 0x93, 0xCB, 0xD0, 0xBC, 0x77, 0x92, 0x04, 0xA0, 0x88, 0x3D, 0x12,
    0x6F, 0xBD, 0x5E, 0xA4, 0x95, 0xB9, 0x8B, 0x5A, 0xE9, 0x56, 0x01, 0xD1, 0x7A, 0x62, 0xE3, 0x8B,
    0x59, 0xB5, 0xD1, 0xF8, 0xF6, 0xF5, 0xE3, 0xBE, 0x34, 0xCD, 0x41, 0x36, 0xF0, 0xF9, 0x31, 0x43,
    0x83, 0x7A, 0x24, 0xAB, 0xC8, 0x96, 0xB5, 0xCF, 0x60, 0xF2, 0xEE, 0xA3, 0xE2, 0x37, 0xED, 0x2B,
    0x26, 0x65, 0x5A, 0xAB, 0x58, 0xC1, 0x8B, 0x66, 0x87, 0x0F, 0x50, 0xA1, 0x33, 0x17, 0x1C, 0x85,
    0xD9, 0xA5, 0xAE, 0x9D, 0xDE, 0x55, 0xC0, 0xCA, 0x04, 0x94, 0x91, 0xA2, 0x7F, 0x4F, 0x63, 0xE7,
    0xE3, 0xD5, 0xAC, 0x89, 0xDE, 0xC8, 0x84, 0xFC, 0xA1, 0x7E, 0x92, 0x50, 0x53, 0xD2, 0x50, 0x11,
    0x77, 0xB5, 0x69, 0xDC, 0xE3, 0x0C, 0xCF, 0x23, 0x20, 0x24, 0x7D, 0xC3, 0xF8, 0xC2, 0x79, 0x9A,
    0xA7, 0xE7, 0x20, 0x9B, 0x0D, 0x5C, 0x49, 0x4B, 0xC0, 0xDB, 0x5A, 0x46, 0x9A, 0x30, 0xFA, 0xAB,
    0x44, 0x88, 0xDC, 0xF1, 0x8E, 0xA1, 0x55, 0x21, 0xE0, 0x75, 0xE2, 0x7F, 0x22, 0x88, 0x4F, 0x8C,
    0x4A, 0xC9, 0x6F, 0x66, 0x4A, 0x6C, 0xAF, 0xD3, 0x00, 0xB1, 0x61, 0x72, 0x08, 0x09, 0xB9, 0xE1,
    0x79, 0x05, 0xD4, 0xD8, 0xFE, 0xD7, 0xA9, 0x7F, 0xF8, 0x9C, 0xF0, 0x08, 0x0A, 0x95, 0x3F, 0xE7,
    0x7D, 0xCA, 0xD6, 0x6B, 0x15, 0xDC, 0xC8, 0x39, 0xD3, 0x5B, 0x59, 0x25, 0xBC, 0x57, 0x75, 0x20,
    0xC2, 0x10, 0x41, 0x89, 0x0E, 0xB0, 0x1E, 0x8C, 0x09, 0x17, 0xD2, 0xF6, 0x0F, 0x93, 0x5D, 0x76,
    0xFA, 0x1F, 0x96, 0x7C, 0xE4, 0xEA, 0x59, 0x86, 0x52, 0xD5, 0x9F, 0x04, 0x95, 0xA6, 0x69, 0x5E,
    0x10, 0x9D, 0xFF, 0x09, 0xD9, 0x53, 0xDE, 0xAD, 0x92, 0x30, 0x28, 0xD6, 0xAB, 0x13, 0xD1, 0xE2,
    0x5D, 0xCF, 0x36, 0xA9, 0x61, 0x33, 0xCA, 0x2D, 0xA2, 0x40, 0x25, 0xA9, 0xF6, 0x86, 0x27, 0x20,
    0xE6, 0x05, 0xB4, 0x12, 0x6E, 0x37, 0xE4, 0x5B, 0x15, 0x88, 0xCC, 0x9E, 0x10, 0xAC, 0xAF, 0x6C,
    0x2C, 0x7C, 0x32, 0x99, 0x08, 0x22, 0x2B, 0x0E, 0x98, 0xB0, 0xDC, 0x09, 0xC8, 0xE9, 0x2C, 0x6F,
    0x28, 0xB2, 0xAB, 0xB4, 0xC6, 0xB5, 0x30, 0x0F, 0x01, 0x04, 0x06, 0xFF, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0xFF, 0x58,
    0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x0B, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0C,
    0xFF, 0x58, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x0D, 0xFF, 0x03, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0xFF, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF,
    0xC8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x01, 0x0D, 0x0C, 0x69, 0x69, 0xF2, 0xF8,
    0x52, 0xD2, 0xBA, 0xB0, 0x81, 0x9A, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x11, 0xFF, 0x2B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x66, 0x00, 0x30,
    0x00, 0x2E, 0x00, 0x62, 0x00, 0x69, 0x00, 0x6E, 0x00, 0x00, 0x00, 0x66, 0x00, 0x31, 0x00, 0x2E,
    0x00, 0x62, 0x00, 0x69, 0x00, 0x6E, 0x00, 0x00, 0x00, 0x66, 0x00, 0x32, 0x00, 0x2E, 0x00, 0x62,
    0x00, 0x69, 0x00, 0x6E, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const MULTI_FILE_SIZES: [u64; 3] = [100, 200, 300];
const MULTI_FILE_CRCS: [u32; 3] = [0x69690c0d, 0xd252f8f2, 0x9a81b0ba];

// A directory, an empty file, and a regular file, in that order, so the
// empty entries sit both before and alongside the one real substream.
const DIR_EMPTY_FILE_AND_REGULAR_FILE: &[u8] = &[
    0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00, 0x04, 0x01, 0x45, 0x60, 0x61, 0x14, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xA2, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFA, 0xC7, 0x3B, 0x5D,
    0x72, 0x65, 0x67, 0x75, 0x6C, 0x61, 0x72, 0x20, 0x66, 0x69, 0x6C, 0x65, 0x20, 0x63, 0x6F, 0x6E,
    0x74, 0x65, 0x6E, 0x74, 0x01, 0x04, 0x06, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0xFF, 0x14, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x07, 0x0B, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0C, 0xFF, 0x14, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x0A, 0x01, 0xEC, 0x71, 0xFF, 0xBF, 0x00, 0x00, 0x05,
    0xFF, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0E, 0xFF, 0x02, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xC0, 0x0F, 0xFF, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x40, 0x11, 0xFF, 0x29, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x64, 0x00, 0x69, 0x00,
    0x72, 0x00, 0x00, 0x00, 0x65, 0x00, 0x6D, 0x00, 0x70, 0x00, 0x74, 0x00, 0x79, 0x00, 0x2E, 0x00,
    0x74, 0x00, 0x78, 0x00, 0x74, 0x00, 0x00, 0x00, 0x72, 0x00, 0x2E, 0x00, 0x74, 0x00, 0x78, 0x00,
    0x74, 0x00, 0x00, 0x00, 0x00, 0x00,
];

fn reader_for(bytes: &'static [u8]) -> Cursor<&'static [u8]> {
    Cursor::new(bytes)
}

#[test]
fn reads_single_file_metadata_and_content() {
    let mut cursor = reader_for(SINGLE_FILE);
    let archive = Archive::read(&mut cursor).unwrap();
    assert_eq!(archive.files.len(), 1);
    let entry = &archive.files[0];
    assert_eq!(entry.name(), "a.txt");
    assert!(!entry.is_directory());
    assert!(entry.has_stream());
    assert_eq!(entry.size(), 11);

    let mut reader = ArchiveReader::new(reader_for(SINGLE_FILE)).unwrap();
    let data = reader.read_file("a.txt").unwrap();
    assert_eq!(data, b"hello world");
}

#[test]
fn truncated_next_header_is_an_error() {
    let mut cursor = reader_for(TRUNCATED_HEADER);
    let err = Archive::read(&mut cursor).unwrap_err();
    assert!(matches!(err, Error::Io(_, _)));
}

#[test]
fn rehydrates_an_encoded_header() {
    let mut cursor = reader_for(ENCODED_HEADER);
    let archive = Archive::read(&mut cursor).unwrap();
    assert_eq!(archive.files.len(), 1);
    let entry = &archive.files[0];
    assert_eq!(entry.name(), "dir");
    assert!(entry.is_directory());
    assert!(!entry.has_stream());
}

#[test]
fn reads_multi_file_solid_folder_with_substream_sizes_and_crcs() {
    let mut cursor = reader_for(MULTI_FILE_SOLID);
    let archive = Archive::read(&mut cursor).unwrap();
    assert_eq!(archive.files.len(), 3);
    assert!(archive.is_solid);
    for (i, entry) in archive.files.iter().enumerate() {
        assert_eq!(entry.name(), format!("f{i}.bin"));
        assert_eq!(entry.size(), MULTI_FILE_SIZES[i]);
        assert!(entry.has_crc);
        assert_eq!(entry.crc as u32, MULTI_FILE_CRCS[i]);
    }

    let mut reader = ArchiveReader::new(reader_for(MULTI_FILE_SOLID)).unwrap();
    let mut seen = Vec::new();
    reader
        .for_each_entries(|entry, data| {
            let mut buf = Vec::new();
            data.read_to_end(&mut buf)?;
            seen.push((entry.name().to_string(), buf.len()));
            Ok(true)
        })
        .unwrap();
    assert_eq!(
        seen,
        vec![
            ("f0.bin".to_string(), 100),
            ("f1.bin".to_string(), 200),
            ("f2.bin".to_string(), 300),
        ]
    );
}

#[test]
fn empty_entries_stay_in_file_list_order() {
    let mut reader = ArchiveReader::new(reader_for(DIR_EMPTY_FILE_AND_REGULAR_FILE)).unwrap();

    struct Recording {
        order: Vec<String>,
    }
    impl ExtractSink for Recording {
        fn on_directory(&mut self, entry: &sevenz_core::ArchiveEntry) -> Result<(), Error> {
            self.order.push(format!("dir:{}", entry.name()));
            Ok(())
        }
        fn on_empty_file(&mut self, entry: &sevenz_core::ArchiveEntry) -> Result<(), Error> {
            self.order.push(format!("empty:{}", entry.name()));
            Ok(())
        }
        fn on_file(
            &mut self,
            entry: &sevenz_core::ArchiveEntry,
            data: &mut dyn Read,
        ) -> Result<(), Error> {
            let mut buf = Vec::new();
            data.read_to_end(&mut buf)?;
            self.order.push(format!("file:{}:{}", entry.name(), buf.len()));
            Ok(())
        }
    }

    let mut sink = Recording { order: Vec::new() };
    reader.extract_to_sink(&mut sink).unwrap();
    assert_eq!(
        sink.order,
        vec![
            "dir:dir".to_string(),
            "empty:empty.txt".to_string(),
            "file:r.txt:20".to_string(),
        ]
    );
}
