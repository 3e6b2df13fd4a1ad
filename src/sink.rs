//! A trait-based alternative to the closure form of
//! [`ArchiveReader::for_each_entries`]/[`BlockDecoder::for_each_entries`], for
//! callers that prefer a dependency-injected sink over a closure.

use std::io::{Read, Seek};

use crate::{ArchiveEntry, ArchiveReader, Error};

/// Receives archive entries as [`ArchiveReader::extract_to_sink`] walks them.
///
/// Implementors do not receive file contents for directories or empty files:
/// [`ExtractSink::on_file`] is only called for entries with a non-empty data
/// stream. Materializing the received bytes (to a filesystem, a buffer, a
/// network socket) is entirely the implementor's responsibility; this crate
/// only hands out the decoded byte range.
pub trait ExtractSink {
    /// Called for a directory entry.
    fn on_directory(&mut self, entry: &ArchiveEntry) -> Result<(), Error>;

    /// Called for a file entry with no data stream (size 0, no substream).
    fn on_empty_file(&mut self, entry: &ArchiveEntry) -> Result<(), Error>;

    /// Called for a file entry with a data stream. `data` yields exactly
    /// `entry.size()` bytes; the CRC, if [`ArchiveEntry::has_crc`] is set,
    /// has already been verified by the time this is called.
    fn on_file(&mut self, entry: &ArchiveEntry, data: &mut dyn Read) -> Result<(), Error>;
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Drives a [`ExtractSink`] over every entry in the archive, in file-list
    /// order, dispatching to [`ExtractSink::on_directory`],
    /// [`ExtractSink::on_empty_file`], or [`ExtractSink::on_file`] as
    /// appropriate for each entry.
    pub fn extract_to_sink<S: ExtractSink>(&mut self, sink: &mut S) -> Result<(), Error> {
        let mut sink_err = None;
        self.for_each_entries(|entry, reader| {
            let result = if entry.is_directory() {
                sink.on_directory(entry)
            } else if entry.has_stream() {
                sink.on_file(entry, reader)
            } else {
                sink.on_empty_file(entry)
            };
            match result {
                Ok(()) => Ok(true),
                Err(e) => {
                    sink_err = Some(e);
                    Ok(false)
                }
            }
        })?;
        match sink_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        directories: Vec<String>,
        empty_files: Vec<String>,
        files: Vec<(String, Vec<u8>)>,
    }

    impl ExtractSink for RecordingSink {
        fn on_directory(&mut self, entry: &ArchiveEntry) -> Result<(), Error> {
            self.directories.push(entry.name().to_string());
            Ok(())
        }

        fn on_empty_file(&mut self, entry: &ArchiveEntry) -> Result<(), Error> {
            self.empty_files.push(entry.name().to_string());
            Ok(())
        }

        fn on_file(&mut self, entry: &ArchiveEntry, data: &mut dyn Read) -> Result<(), Error> {
            let mut buf = Vec::new();
            data.read_to_end(&mut buf).map_err(Error::io)?;
            self.files.push((entry.name().to_string(), buf));
            Ok(())
        }
    }

    #[test]
    fn sink_trait_is_object_shaped_correctly() {
        let mut sink = RecordingSink::default();
        let dir = ArchiveEntry::new_directory("dir");
        sink.on_directory(&dir).unwrap();
        assert_eq!(sink.directories, vec!["dir".to_string()]);
    }
}
