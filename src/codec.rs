//! Codec registry and execution: given a [`Coder`], produces a `Read`
//! wrapping its input that yields decompressed bytes. This is the streaming
//! translation of a buffer-in/buffer-out decode call: each coder becomes one
//! link in a chain of `Read` adapters instead of an explicit buffer copy,
//! and a short read before the declared unpack size becomes the underlying
//! engine's own `io::Error` rather than a separate length check here.

use std::{io, io::Read};

use byteorder::{LittleEndian, ReadBytesExt};
use lzma_rust2::{LZMA2Reader, LZMA2ReaderMT, LZMAReader, filter::bcj::BCJReader, lzma2_get_memory_usage};

use crate::{archive::EncoderMethod, block::Coder, error::Error};

#[allow(clippy::upper_case_acronyms)]
pub(crate) enum Decoder<R: Read> {
    COPY(R),
    LZMA(Box<LZMAReader<R>>),
    LZMA2(Box<LZMA2Reader<R>>),
    LZMA2MT(Box<LZMA2ReaderMT<R>>),
    BCJ(BCJReader<R>),
    #[cfg(feature = "zstd")]
    ZSTD(zstd::Decoder<'static, std::io::BufReader<R>>),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Decoder::COPY(r) => r.read(buf),
            Decoder::LZMA(r) => r.read(buf),
            Decoder::LZMA2(r) => r.read(buf),
            Decoder::LZMA2MT(r) => r.read(buf),
            Decoder::BCJ(r) => r.read(buf),
            #[cfg(feature = "zstd")]
            Decoder::ZSTD(r) => r.read(buf),
        }
    }
}

/// Builds the decoder for a single coder step.
///
/// `threads` selects the LZMA2 decode path: `1` uses the plain single-
/// threaded [`LZMA2Reader`], anything higher opts into [`LZMA2ReaderMT`].
/// Every other codec here is inherently single-threaded.
pub(crate) fn add_decoder<I: Read>(
    input: I,
    uncompressed_len: usize,
    coder: &Coder,
    max_mem_limit_kb: usize,
    threads: u32,
) -> Result<Decoder<I>, Error> {
    let method = EncoderMethod::by_id(coder.encoder_method_id());
    let method = if let Some(m) = method {
        m
    } else {
        return Err(Error::UnsupportedCompressionMethod(format!(
            "{:?}",
            coder.encoder_method_id()
        )));
    };
    match method.id() {
        EncoderMethod::ID_COPY => Ok(Decoder::COPY(input)),
        EncoderMethod::ID_LZMA => {
            if coder.properties.len() < 5 {
                return Err(Error::Other("LZMA properties too short".into()));
            }
            let dict_size = get_lzma_dic_size(coder)?;
            let props = coder.properties[0];
            let lz = LZMAReader::new_with_props(input, uncompressed_len as _, props, dict_size, None)
                .map_err(Error::io)?;
            Ok(Decoder::LZMA(Box::new(lz)))
        }
        EncoderMethod::ID_LZMA2 => {
            let dic_size = get_lzma2_dic_size(coder)?;
            let mem_size = lzma2_get_memory_usage(dic_size) as usize;
            if mem_size > max_mem_limit_kb {
                return Err(Error::MaxMemLimited {
                    max_kb: max_mem_limit_kb,
                    actaul_kb: mem_size,
                });
            }

            let lz = if threads < 2 {
                Decoder::LZMA2(Box::new(LZMA2Reader::new(input, dic_size, None)))
            } else {
                Decoder::LZMA2MT(Box::new(LZMA2ReaderMT::new(input, dic_size, None, threads)))
            };

            Ok(lz)
        }
        #[cfg(feature = "zstd")]
        EncoderMethod::ID_ZSTD => {
            let zs = zstd::Decoder::new(input)?;
            Ok(Decoder::ZSTD(zs))
        }
        EncoderMethod::ID_BCJ_X86 => {
            let de = BCJReader::new_x86(input, 0);
            Ok(Decoder::BCJ(de))
        }
        _ => Err(Error::UnsupportedCompressionMethod(
            method.name().to_string(),
        )),
    }
}

fn get_lzma2_dic_size(coder: &Coder) -> Result<u32, Error> {
    if coder.properties.is_empty() {
        return Err(Error::other("LZMA2 properties too short"));
    }
    let dict_size_bits = 0xFF & coder.properties[0] as u32;
    if (dict_size_bits & (!0x3F)) != 0 {
        return Err(Error::other("Unsupported LZMA2 property bits"));
    }
    if dict_size_bits > 40 {
        return Err(Error::other("Dictionary larger than 4GiB maximum size"));
    }
    if dict_size_bits == 40 {
        return Ok(0xFFFFFFFF);
    }
    let size = (2 | (dict_size_bits & 0x1)) << (dict_size_bits / 2 + 11);
    Ok(size)
}

fn get_lzma_dic_size(coder: &Coder) -> io::Result<u32> {
    let mut props = &coder.properties[1..5];
    props.read_u32::<LittleEndian>()
}
