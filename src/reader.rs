use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, SeekFrom},
};

use crc32fast::Hasher;

use crate::{archive::*, block::*, codec::add_decoder, error::Error};

/// Default per-decode memory ceiling: effectively unbounded unless the
/// caller opts into a tighter limit via [`ArchiveReader::set_max_mem_limit_kb`].
const MAX_MEM_LIMIT_KB: usize = usize::MAX / 1024;

pub(crate) struct BoundedReader<R: Read> {
    inner: R,
    remain: usize,
}

impl<R: Read> BoundedReader<R> {
    pub(crate) fn new(inner: R, max_size: usize) -> Self {
        Self {
            inner,
            remain: max_size,
        }
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remain == 0 {
            return Ok(0);
        }
        let remain = self.remain;
        let buf2 = if buf.len() < remain {
            buf
        } else {
            &mut buf[..remain]
        };
        match self.inner.read(buf2) {
            Ok(size) => {
                if self.remain < size {
                    self.remain = 0;
                } else {
                    self.remain -= size;
                }
                Ok(size)
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct SeekableBoundedReader<R: Read + Seek> {
    inner: R,
    cur: u64,
    bounds: (u64, u64),
}

impl<R: Read + Seek> Seek for SeekableBoundedReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(pos) => self.bounds.0 as i64 + pos as i64,
            SeekFrom::End(pos) => self.bounds.1 as i64 + pos,
            SeekFrom::Current(pos) => self.cur as i64 + pos,
        };
        if new_pos < 0 {
            return Err(std::io::Error::other("SeekBeforeStart"));
        }
        self.cur = new_pos as u64;
        self.inner.seek(SeekFrom::Start(self.cur))
    }
}

impl<R: Read + Seek> Read for SeekableBoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cur >= self.bounds.1 {
            return Ok(0);
        }
        if self.stream_position()? != self.cur {
            self.inner.seek(SeekFrom::Start(self.cur))?;
        }
        let buf2 = if buf.len() < (self.bounds.1 - self.cur) as usize {
            buf
        } else {
            &mut buf[..(self.bounds.1 - self.cur) as usize]
        };
        let size = self.inner.read(buf2)?;
        self.cur += size as u64;
        Ok(size)
    }
}

impl<R: Read + Seek> SeekableBoundedReader<R> {
    #[allow(dead_code)]
    pub(crate) fn new(inner: R, bounds: (u64, u64)) -> Self {
        Self {
            inner,
            cur: bounds.0,
            bounds,
        }
    }
}

struct Crc32VerifyingReader<R> {
    inner: R,
    crc_digest: Hasher,
    expected_value: u64,
    remaining: i64,
}

impl<R: Read> Crc32VerifyingReader<R> {
    fn new(inner: R, remaining: usize, expected_value: u64) -> Self {
        Self {
            inner,
            crc_digest: Hasher::new(),
            expected_value,
            remaining: remaining as i64,
        }
    }
}

impl<R: Read> Read for Crc32VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining <= 0 {
            return Ok(0);
        }
        let size = self.inner.read(buf)?;
        if size > 0 {
            self.remaining -= size as i64;
            self.crc_digest.update(&buf[..size]);
        }
        if self.remaining <= 0 {
            let d = std::mem::replace(&mut self.crc_digest, Hasher::new()).finalize();
            if d as u64 != self.expected_value {
                return Err(std::io::Error::other(Error::ChecksumVerificationFailed));
            }
        }
        Ok(size)
    }
}

impl Archive {
    /// Open 7z file under specified `path`.
    #[inline]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Archive, Error> {
        let mut file =
            File::open(path.as_ref()).map_err(|e| Error::file_open(e, path.as_ref().to_string_lossy().to_string()))?;
        Self::read(&mut file)
    }

    /// Read 7z archive metadata from the given `reader`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::fs::File;
    ///
    /// use sevenz_core::Archive;
    ///
    /// let mut reader = File::open("example.7z").unwrap();
    /// let archive = Archive::read(&mut reader).unwrap();
    ///
    /// for entry in &archive.files {
    ///     println!("{}", entry.name());
    /// }
    /// ```
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Archive, Error> {
        let reader_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut signature = [0; 6];
        reader.read_exact(&mut signature).map_err(Error::io)?;
        if signature != SEVEN_Z_SIGNATURE {
            return Err(Error::BadSignature(signature));
        }
        let mut versions = [0; 2];
        reader.read_exact(&mut versions).map_err(Error::io)?;
        let version_major = versions[0];
        let version_minor = versions[1];
        if version_major != 0 {
            return Err(Error::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        let start_header_crc = crate::cursor::read_u32(reader)?;

        let header_valid = if start_header_crc == 0 {
            let current_position = reader.stream_position().map_err(Error::io)?;
            let mut buf = [0; 20];
            reader.read_exact(&mut buf).map_err(Error::io)?;
            reader
                .seek(SeekFrom::Start(current_position))
                .map_err(Error::io)?;
            buf.iter().any(|a| *a != 0)
        } else {
            true
        };
        if header_valid {
            let start_header = Self::read_start_header(reader, start_header_crc)?;
            Self::init_archive(reader, start_header, true, 1)
        } else {
            Self::try_to_locate_end_header(reader, reader_len, 1)
        }
    }

    fn try_to_locate_end_header<R: Read + Seek>(
        reader: &mut R,
        reader_len: u64,
        thread_count: u32,
    ) -> Result<Self, Error> {
        let search_limit = 1024 * 1024;
        let prev_data_size = reader.stream_position().map_err(Error::io)? + 20;
        let size = reader_len;
        let min_pos = if reader.stream_position().map_err(Error::io)? + search_limit > size {
            reader.stream_position().map_err(Error::io)?
        } else {
            size - search_limit
        };
        let mut pos = reader_len - 1;
        while pos > min_pos {
            pos -= 1;

            reader.seek(SeekFrom::Start(pos)).map_err(Error::io)?;
            let nid = crate::cursor::read_u8(reader)?;
            if nid == K_ENCODED_HEADER || nid == K_HEADER {
                let start_header = StartHeader {
                    next_header_offset: pos - prev_data_size,
                    next_header_size: reader_len - pos,
                    next_header_crc: 0,
                };
                let result = Self::init_archive(reader, start_header, false, thread_count)?;

                if !result.files.is_empty() {
                    return Ok(result);
                }
            }
        }
        Err(Error::other(
            "Start header corrupt and unable to guess end header",
        ))
    }

    fn init_archive<R: Read + Seek>(
        reader: &mut R,
        start_header: StartHeader,
        verify_crc: bool,
        thread_count: u32,
    ) -> Result<Self, Error> {
        if start_header.next_header_size > usize::MAX as u64 {
            return Err(Error::other(format!(
                "Cannot handle next_header_size {}",
                start_header.next_header_size
            )));
        }

        let next_header_size_int = start_header.next_header_size as usize;

        reader
            .seek(SeekFrom::Start(
                SIGNATURE_HEADER_SIZE + start_header.next_header_offset,
            ))
            .map_err(Error::io)?;

        let mut buf = vec![0; next_header_size_int];
        reader.read_exact(&mut buf).map_err(Error::io)?;
        if verify_crc && crc32fast::hash(&buf) as u64 != start_header.next_header_crc {
            return Err(Error::NextHeaderCrcMismatch);
        }

        let mut archive = Archive::default();
        let mut buf_reader = buf.as_slice();
        let mut nid = crate::cursor::read_u8(&mut buf_reader)?;
        if nid == K_ENCODED_HEADER {
            let (mut out_reader, buf_size) =
                Self::read_encoded_header(&mut buf_reader, reader, &mut archive, thread_count)?;
            buf.clear();
            buf.resize(buf_size, 0);
            out_reader.read_exact(&mut buf).map_err(Error::io)?;
            drop(out_reader);
            archive = Archive::default();
            buf_reader = buf.as_slice();
            nid = crate::cursor::read_u8(&mut buf_reader)?;
        }
        if nid == K_HEADER {
            let mut header = std::io::Cursor::new(buf_reader);
            Self::read_header(&mut header, &mut archive)?;
        } else {
            return Err(Error::other("Broken or unsupported archive: no Header"));
        }

        archive.is_solid = archive
            .blocks
            .iter()
            .any(|block| block.num_unpack_sub_streams > 1);

        Ok(archive)
    }

    fn read_encoded_header<'r, R: Read, RI: 'r + Read + Seek>(
        header: &mut R,
        reader: &'r mut RI,
        archive: &mut Archive,
        thread_count: u32,
    ) -> Result<(Box<dyn Read + 'r>, usize), Error> {
        Self::read_streams_info(header, archive)?;
        let block = archive
            .blocks
            .first()
            .ok_or(Error::other("no blocks, can't read encoded header"))?;
        let first_pack_stream_index = 0;
        let block_offset = SIGNATURE_HEADER_SIZE + archive.pack_pos;
        if archive.pack_sizes.is_empty() {
            return Err(Error::other("no packed streams, can't read encoded header"));
        }

        reader
            .seek(SeekFrom::Start(block_offset))
            .map_err(Error::io)?;
        let unpack_size = block.get_unpack_size() as usize;
        let pack_size = archive.pack_sizes[first_pack_stream_index] as usize;
        let input_reader =
            SeekableBoundedReader::new(reader, (block_offset, block_offset + pack_size as u64));
        let mut decoder: Box<dyn Read> = Box::new(input_reader);
        for (index, coder) in block.ordered_coder_iter() {
            if coder.num_in_streams != 1 || coder.num_out_streams != 1 {
                return Err(Error::other(
                    "Multi input/output stream coders are not yet supported",
                ));
            }
            let next = add_decoder(
                decoder,
                block.get_unpack_size_at_index(index) as usize,
                coder,
                MAX_MEM_LIMIT_KB,
                thread_count,
            )?;
            decoder = Box::new(next);
        }
        if block.has_crc {
            decoder = Box::new(Crc32VerifyingReader::new(decoder, unpack_size, block.crc));
        }

        Ok((decoder, unpack_size))
    }
}

#[derive(Copy, Clone)]
struct IndexEntry {
    block_index: Option<usize>,
    file_index: usize,
}

/// Reads a 7z archive file, driving extraction of its folders and files.
pub struct ArchiveReader<R: Read + Seek> {
    source: R,
    archive: Archive,
    thread_count: u32,
    max_mem_limit_kb: usize,
    index: HashMap<String, IndexEntry>,
}

impl ArchiveReader<File> {
    /// Opens a 7z archive file at the given `path` and creates an [`ArchiveReader`] to read it.
    #[inline]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::file_open(e, path.as_ref().to_string_lossy().to_string()))?;
        Self::new(file)
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Creates an [`ArchiveReader`] to read a 7z archive file from the given `source` reader.
    #[inline]
    pub fn new(mut source: R) -> Result<Self, Error> {
        let archive = Archive::read(&mut source)?;

        let mut reader = Self {
            source,
            archive,
            thread_count: 1,
            max_mem_limit_kb: MAX_MEM_LIMIT_KB,
            index: HashMap::default(),
        };

        reader.fill_index();

        Ok(reader)
    }

    /// Creates an [`ArchiveReader`] from an existing [`Archive`] instance.
    ///
    /// This is useful when you already have a parsed archive and want to create a reader
    /// without re-parsing the archive structure.
    #[inline]
    pub fn from_archive(archive: Archive, source: R) -> Self {
        let mut reader = Self {
            source,
            archive,
            thread_count: 1,
            max_mem_limit_kb: MAX_MEM_LIMIT_KB,
            index: HashMap::default(),
        };

        reader.fill_index();

        reader
    }

    /// Sets the thread count to use for the LZMA2 decode path, when the
    /// engine supports it. Clamped to `1..=256`; `1` keeps the default
    /// single-threaded posture.
    pub fn set_thread_count(&mut self, thread_count: u32) {
        self.thread_count = thread_count.clamp(1, 256);
    }

    /// Sets a ceiling, in KB, on the memory an individual coder may allocate
    /// (currently enforced for LZMA2's dictionary). Exceeding it surfaces
    /// [`Error::MaxMemLimited`] instead of allocating.
    pub fn set_max_mem_limit_kb(&mut self, max_mem_limit_kb: usize) {
        self.max_mem_limit_kb = max_mem_limit_kb;
    }

    fn fill_index(&mut self) {
        for (file_index, file) in self.archive.files.iter().enumerate() {
            let block_index = self.archive.stream_map.file_block_index[file_index];

            self.index.insert(
                file.name.clone(),
                IndexEntry {
                    block_index,
                    file_index,
                },
            );
        }
    }

    /// Returns a reference to the underlying [`Archive`] structure.
    #[inline]
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    fn build_decode_stack<'r>(
        source: &'r mut R,
        archive: &Archive,
        block_index: usize,
        thread_count: u32,
        max_mem_limit_kb: usize,
    ) -> Result<(Box<dyn Read + 'r>, usize), Error> {
        let block = &archive.blocks[block_index];
        if block.total_input_streams > block.total_output_streams {
            return Err(Error::unsupported(
                "blocks with more than one packed input stream are not supported",
            ));
        }
        let first_pack_stream_index = archive.stream_map.block_first_pack_stream_index[block_index];
        let block_offset = SIGNATURE_HEADER_SIZE
            + archive.pack_pos
            + archive.stream_map.pack_stream_offsets[first_pack_stream_index];

        source
            .seek(SeekFrom::Start(block_offset))
            .map_err(Error::io)?;
        let pack_size = archive.pack_sizes[first_pack_stream_index] as usize;

        let mut decoder: Box<dyn Read> = Box::new(BoundedReader::new(source, pack_size));
        for (index, coder) in block.ordered_coder_iter() {
            if coder.num_in_streams != 1 || coder.num_out_streams != 1 {
                return Err(Error::unsupported(
                    "Multi input/output stream coders are not yet supported",
                ));
            }
            let next = add_decoder(
                decoder,
                block.get_unpack_size_at_index(index) as usize,
                coder,
                max_mem_limit_kb,
                thread_count,
            )?;
            decoder = Box::new(next);
        }
        if block.has_crc {
            decoder = Box::new(Crc32VerifyingReader::new(
                decoder,
                block.get_unpack_size() as usize,
                block.crc,
            ));
        }

        Ok((decoder, pack_size))
    }

    /// Takes a closure to decode each file in the archive, in file-list
    /// order: directories and empty files are dispatched exactly where they
    /// sit in that order (before the first folder's first file, and between
    /// folders, never bunched at the end), interleaved with the real file
    /// content pulled from whichever folder they belong to.
    ///
    /// Attention about solid archives: when decoding a solid archive, the
    /// data to be decompressed depends on the data in front of it, so it is
    /// not possible to skip the previous data and only decompress the data
    /// at the back.
    pub fn for_each_entries<F: FnMut(&ArchiveEntry, &mut dyn Read) -> Result<bool, Error>>(
        &mut self,
        mut each: F,
    ) -> Result<(), Error> {
        let mut open_block: Option<(usize, Box<dyn Read + '_>)> = None;
        for file_index in 0..self.archive.files.len() {
            let file = &self.archive.files[file_index];
            let block_index = self.archive.stream_map.file_block_index[file_index];

            let block_index = match block_index {
                Some(b) if file.has_stream => b,
                _ => {
                    let empty_reader: &mut dyn Read = &mut ([0u8; 0].as_slice());
                    if !each(file, empty_reader)? {
                        return Ok(());
                    }
                    continue;
                }
            };

            if open_block.as_ref().map(|&(b, _)| b) != Some(block_index) {
                // Drop the previous block's reader first: it borrows
                // `self.source`, and that borrow must end before we can
                // take it again to build the next block's decode stack.
                open_block = None;
                let (reader, _pack_size) = Self::build_decode_stack(
                    &mut self.source,
                    &self.archive,
                    block_index,
                    self.thread_count,
                    self.max_mem_limit_kb,
                )?;
                open_block = Some((block_index, reader));
            }
            let block_reader = &mut open_block.as_mut().unwrap().1;

            let mut decoder: Box<dyn Read> =
                Box::new(BoundedReader::new(block_reader.as_mut(), file.size as usize));
            if file.has_crc {
                decoder = Box::new(Crc32VerifyingReader::new(
                    decoder,
                    file.size as usize,
                    file.crc,
                ));
            }
            if !each(file, &mut decoder)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Returns the data of a file with the given path inside the archive.
    ///
    /// # Notice
    /// This function is very inefficient when used with solid archives, since
    /// it needs to decode all data before the actual file.
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>, Error> {
        let index_entry = *self.index.get(name).ok_or(Error::FileNotFound)?;
        let file = &self.archive.files[index_entry.file_index];

        if !file.has_stream {
            return Ok(Vec::new());
        }

        let block_index = index_entry
            .block_index
            .ok_or_else(|| Error::other("File has no associated block"))?;

        if self.archive.is_solid {
            let mut result = None;
            let target_file_ptr = file as *const _;

            BlockDecoder::new(
                self.thread_count,
                self.max_mem_limit_kb,
                block_index,
                &self.archive,
                &mut self.source,
            )
            .for_each_entries(&mut |archive_entry, reader| {
                let mut data = Vec::with_capacity(archive_entry.size as usize);
                reader.read_to_end(&mut data)?;

                if std::ptr::eq(archive_entry, target_file_ptr) {
                    result = Some(data);
                    Ok(false)
                } else {
                    Ok(true)
                }
            })?;

            result.ok_or(Error::FileNotFound)
        } else {
            let pack_index = self.archive.stream_map.block_first_pack_stream_index[block_index];
            let pack_offset = self.archive.stream_map.pack_stream_offsets[pack_index];
            let block_offset = SIGNATURE_HEADER_SIZE + self.archive.pack_pos + pack_offset;

            self.source.seek(SeekFrom::Start(block_offset))?;

            let (mut block_reader, _size) = Self::build_decode_stack(
                &mut self.source,
                &self.archive,
                block_index,
                self.thread_count,
                self.max_mem_limit_kb,
            )?;

            let mut data = Vec::with_capacity(file.size as usize);
            let mut decoder: Box<dyn Read> =
                Box::new(BoundedReader::new(&mut block_reader, file.size as usize));

            if file.has_crc {
                decoder = Box::new(Crc32VerifyingReader::new(
                    decoder,
                    file.size as usize,
                    file.crc,
                ));
            }

            decoder.read_to_end(&mut data)?;

            Ok(data)
        }
    }

    /// Returns the compression method(s) used for a specific file in the archive.
    pub fn file_compression_methods(
        &self,
        file_name: &str,
        methods: &mut Vec<EncoderMethod>,
    ) -> Result<(), Error> {
        let index_entry = self.index.get(file_name).ok_or(Error::FileNotFound)?;
        let file = &self.archive.files[index_entry.file_index];

        if !file.has_stream {
            return Ok(());
        }

        let block_index = index_entry
            .block_index
            .ok_or_else(|| Error::other("File has no associated block"))?;

        let block = self
            .archive
            .blocks
            .get(block_index)
            .ok_or_else(|| Error::other("Block not found"))?;

        block
            .coders
            .iter()
            .filter_map(|coder| EncoderMethod::by_id(coder.encoder_method_id()))
            .for_each(|method| {
                methods.push(method);
            });

        Ok(())
    }
}

/// Decoder for a specific block within a 7z archive.
///
/// Provides access to entries within a single compression block and allows
/// decoding files from that block.
pub struct BlockDecoder<'a, R: Read + Seek> {
    thread_count: u32,
    max_mem_limit_kb: usize,
    block_index: usize,
    archive: &'a Archive,
    source: &'a mut R,
}

impl<'a, R: Read + Seek> BlockDecoder<'a, R> {
    /// Creates a new [`BlockDecoder`] for decoding a specific block in the archive.
    pub fn new(
        thread_count: u32,
        max_mem_limit_kb: usize,
        block_index: usize,
        archive: &'a Archive,
        source: &'a mut R,
    ) -> Self {
        Self {
            thread_count,
            max_mem_limit_kb,
            block_index,
            archive,
            source,
        }
    }

    /// Sets the thread count to use for the LZMA2 decode path, when the
    /// engine supports it.
    pub fn set_thread_count(&mut self, thread_count: u32) {
        self.thread_count = thread_count.clamp(1, 256);
    }

    /// Returns a slice of archive entries contained in this block.
    ///
    /// The entries are returned in the order they appear in the block.
    pub fn entries(&self) -> &[ArchiveEntry] {
        let start = self.archive.stream_map.block_first_file_index[self.block_index];
        let file_count = self.archive.blocks[self.block_index].num_unpack_sub_streams;
        &self.archive.files[start..(file_count + start)]
    }

    /// Returns the number of entries contained in this block.
    pub fn entry_count(&self) -> usize {
        self.archive.blocks[self.block_index].num_unpack_sub_streams
    }

    /// Takes a closure to decode each file in this block.
    ///
    /// When decoding files in a block, the data to be decompressed depends
    /// on the data in front of it, so it is not possible to simply skip the
    /// previous data and only decompress the data at the back.
    ///
    /// Non-solid archives use one block per file and allow more effective
    /// decoding of a single file.
    pub fn for_each_entries<F: FnMut(&ArchiveEntry, &mut dyn Read) -> Result<bool, Error>>(
        self,
        each: &mut F,
    ) -> Result<bool, Error> {
        let Self {
            thread_count,
            max_mem_limit_kb,
            block_index,
            archive,
            source,
        } = self;
        let (mut block_reader, _size) =
            ArchiveReader::build_decode_stack(source, archive, block_index, thread_count, max_mem_limit_kb)?;
        let start = archive.stream_map.block_first_file_index[block_index];
        let file_count = archive.blocks[block_index].num_unpack_sub_streams;

        for file_index in start..(file_count + start) {
            let file = &archive.files[file_index];
            if file.has_stream && file.size > 0 {
                let mut decoder: Box<dyn Read> =
                    Box::new(BoundedReader::new(&mut block_reader, file.size as usize));
                if file.has_crc {
                    decoder = Box::new(Crc32VerifyingReader::new(
                        decoder,
                        file.size as usize,
                        file.crc,
                    ));
                }
                if !each(file, &mut decoder)? {
                    return Ok(false);
                }
            } else {
                let empty_reader: &mut dyn Read = &mut ([0u8; 0].as_slice());
                if !each(file, empty_reader)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
