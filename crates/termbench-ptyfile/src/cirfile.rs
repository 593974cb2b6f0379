use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::PtyFileError;

pub const HEADER_LEN: u64 = 256;

const MAGIC: &[u8; 8] = b"CIRFILE1";
const ZERO_CHUNK: usize = 8 * 1024;

/// A bounded circular file: a 256-byte header followed by a `max_size`-byte
/// ring. The file models the trailing window of a byte stream; absolute
/// stream position `p` lives at ring offset
/// `(head_pos + (p - file_offset)) % max_size`.
#[derive(Debug)]
pub struct CirFile {
    file: File,
    max_size: i64,
    /// Absolute stream offset of the first stored byte.
    file_offset: i64,
    /// Stored byte count, always <= max_size.
    data_size: i64,
    /// Ring offset of the first stored byte.
    head_pos: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CirFileStat {
    pub max_size: i64,
    pub file_offset: i64,
    pub data_size: i64,
}

impl CirFile {
    pub fn create(path: impl AsRef<Path>, max_size: i64) -> Result<Self, PtyFileError> {
        if max_size <= 0 {
            return Err(PtyFileError::InvalidArg(format!(
                "cirfile max_size must be positive, got {max_size}"
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        // pre-size header + ring (sparse where supported) so ring reads
        // never run past EOF
        file.set_len(HEADER_LEN + max_size as u64)?;
        let mut cf = Self {
            file,
            max_size,
            file_offset: 0,
            data_size: 0,
            head_pos: 0,
        };
        cf.write_header()?;
        Ok(cf)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, PtyFileError> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(PtyFileError::NotFound)
            }
            Err(err) => return Err(err.into()),
        };
        let mut cf = Self {
            file,
            max_size: 0,
            file_offset: 0,
            data_size: 0,
            head_pos: 0,
        };
        cf.read_header()?;
        Ok(cf)
    }

    pub fn stat_path(path: impl AsRef<Path>) -> Result<CirFileStat, PtyFileError> {
        Ok(Self::open(path)?.stat())
    }

    pub fn stat(&self) -> CirFileStat {
        CirFileStat {
            max_size: self.max_size,
            file_offset: self.file_offset,
            data_size: self.data_size,
        }
    }

    /// Write `data` at absolute stream position `pos`. Positions past the
    /// current end are zero-filled; writes before the stored window are
    /// rejected (that data is already gone).
    pub fn write_at(&mut self, data: &[u8], pos: i64) -> Result<(), PtyFileError> {
        if pos < 0 {
            return Err(PtyFileError::InvalidArg(format!(
                "invalid seek pos '{pos}' in cirfile write"
            )));
        }
        let mut data = data;
        let mut pos = pos;
        if data.len() as i64 > self.max_size {
            let skip = data.len() - self.max_size as usize;
            pos += skip as i64;
            data = &data[skip..];
        }
        if pos < self.file_offset {
            return Err(PtyFileError::InvalidArg(format!(
                "write pos {pos} is before the stored window (starts at {})",
                self.file_offset
            )));
        }

        let end = self.file_offset + self.data_size;
        if pos >= end + self.max_size {
            // the gap alone evicts the whole window; restart it at pos
            self.file_offset = pos;
            self.head_pos = 0;
            self.data_size = 0;
        } else if pos > end {
            let zeros = [0u8; ZERO_CHUNK];
            let mut fill_at = end;
            while fill_at < pos {
                let run = ((pos - fill_at) as usize).min(ZERO_CHUNK);
                self.write_span(fill_at, &zeros[..run])?;
                fill_at += run as i64;
            }
        }
        self.write_span(pos, data)?;
        self.write_header()
    }

    /// Read up to `max_read` bytes starting at stream position `offset`.
    /// Returns `(real_offset, data)`: when `offset` has already slid out of
    /// the window, the read starts at the window head instead.
    pub fn read_at_with_max(
        &mut self,
        offset: i64,
        max_read: i64,
    ) -> Result<(i64, Vec<u8>), PtyFileError> {
        let start = offset.max(self.file_offset);
        let end = self.file_offset + self.data_size;
        if start >= end || max_read <= 0 {
            return Ok((start, Vec::new()));
        }
        let count = (end - start).min(max_read) as usize;
        let mut out = vec![0u8; count];
        self.ring_read(start, &mut out)?;
        Ok((start, out))
    }

    pub fn read_all(&mut self) -> Result<(i64, Vec<u8>), PtyFileError> {
        self.read_at_with_max(0, i64::MAX)
    }

    // write at a position inside or directly at the end of the window,
    // sliding the window forward when it overflows max_size
    fn write_span(&mut self, pos: i64, data: &[u8]) -> Result<(), PtyFileError> {
        if data.is_empty() {
            return Ok(());
        }
        self.ring_write(pos, data)?;
        let end = self.file_offset + self.data_size;
        let new_end = end.max(pos + data.len() as i64);
        let window = new_end - self.file_offset;
        if window > self.max_size {
            let delta = window - self.max_size;
            self.file_offset += delta;
            self.head_pos = (self.head_pos + delta) % self.max_size;
            self.data_size = self.max_size;
        } else {
            self.data_size = window;
        }
        Ok(())
    }

    fn ring_write(&mut self, stream_pos: i64, data: &[u8]) -> Result<(), PtyFileError> {
        let mut rel = (self.head_pos + (stream_pos - self.file_offset)) % self.max_size;
        let mut remaining = data;
        while !remaining.is_empty() {
            let run = (remaining.len() as i64).min(self.max_size - rel) as usize;
            self.file.seek(SeekFrom::Start(HEADER_LEN + rel as u64))?;
            self.file.write_all(&remaining[..run])?;
            remaining = &remaining[run..];
            rel = 0;
        }
        Ok(())
    }

    fn ring_read(&mut self, stream_pos: i64, out: &mut [u8]) -> Result<(), PtyFileError> {
        let mut rel = (self.head_pos + (stream_pos - self.file_offset)) % self.max_size;
        let mut filled = 0usize;
        while filled < out.len() {
            let run = ((out.len() - filled) as i64).min(self.max_size - rel) as usize;
            self.file.seek(SeekFrom::Start(HEADER_LEN + rel as u64))?;
            self.file.read_exact(&mut out[filled..filled + run])?;
            filled += run;
            rel = 0;
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), PtyFileError> {
        let mut header = [0u8; HEADER_LEN as usize];
        header[..8].copy_from_slice(MAGIC);
        header[8..16].copy_from_slice(&self.max_size.to_le_bytes());
        header[16..24].copy_from_slice(&self.file_offset.to_le_bytes());
        header[24..32].copy_from_slice(&self.data_size.to_le_bytes());
        header[32..40].copy_from_slice(&self.head_pos.to_le_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        self.file.flush()?;
        Ok(())
    }

    fn read_header(&mut self) -> Result<(), PtyFileError> {
        let mut header = [0u8; HEADER_LEN as usize];
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .read_exact(&mut header)
            .map_err(|err| PtyFileError::Corrupt(format!("short header: {err}")))?;
        if &header[..8] != MAGIC {
            return Err(PtyFileError::Corrupt("bad magic".to_owned()));
        }
        let field = |at: usize| i64::from_le_bytes(header[at..at + 8].try_into().expect("8 bytes"));
        self.max_size = field(8);
        self.file_offset = field(16);
        self.data_size = field(24);
        self.head_pos = field(32);
        if self.max_size <= 0
            || self.data_size < 0
            || self.data_size > self.max_size
            || self.head_pos < 0
            || self.head_pos >= self.max_size
            || self.file_offset < 0
        {
            return Err(PtyFileError::Corrupt(format!(
                "inconsistent header: max_size={} file_offset={} data_size={} head_pos={}",
                self.max_size, self.file_offset, self.data_size, self.head_pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn create_open_and_stat_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = temp_path(&dir, "t.cf");
        CirFile::create(&path, 1024).expect("create");

        let stat = CirFile::stat_path(&path).expect("stat");
        assert_eq!(stat.max_size, 1024);
        assert_eq!(stat.file_offset, 0);
        assert_eq!(stat.data_size, 0);
    }

    #[test]
    fn open_missing_file_reports_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            CirFile::open(temp_path(&dir, "absent.cf")),
            Err(PtyFileError::NotFound)
        ));
    }

    #[test]
    fn open_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = temp_path(&dir, "junk.cf");
        std::fs::write(&path, b"definitely not a cirfile").expect("write junk");
        assert!(matches!(
            CirFile::open(&path),
            Err(PtyFileError::Corrupt(_))
        ));
    }

    #[test]
    fn sequential_appends_read_back_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = temp_path(&dir, "t.cf");
        {
            let mut cf = CirFile::create(&path, 4096).expect("create");
            cf.write_at(b"hello ", 0).expect("write");
            cf.write_at(b"world", 6).expect("write");
        }
        let mut cf = CirFile::open(&path).expect("reopen");
        let (real_offset, data) = cf.read_all().expect("read all");
        assert_eq!(real_offset, 0);
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn window_slides_and_reads_report_real_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = temp_path(&dir, "t.cf");
        let mut cf = CirFile::create(&path, 10).expect("create");

        let payload = b"abcdefghijklmnop"; // 16 bytes through a 10-byte ring
        let mut pos = 0i64;
        for chunk in payload.chunks(3) {
            cf.write_at(chunk, pos).expect("write chunk");
            pos += chunk.len() as i64;
        }

        let stat = cf.stat();
        assert_eq!(stat.data_size, 10);
        assert_eq!(stat.file_offset, 6);

        let (real_offset, data) = cf.read_all().expect("read all");
        assert_eq!(real_offset, 6);
        assert_eq!(data, &payload[6..]);

        // offset inside the window reads from there
        let (real_offset, data) = cf.read_at_with_max(9, 4).expect("partial read");
        assert_eq!(real_offset, 9);
        assert_eq!(data, &payload[9..13]);

        // offset before the window snaps to the window head
        let (real_offset, data) = cf.read_at_with_max(0, 4).expect("stale read");
        assert_eq!(real_offset, 6);
        assert_eq!(data, &payload[6..10]);
    }

    #[test]
    fn reads_past_the_end_return_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cf = CirFile::create(temp_path(&dir, "t.cf"), 64).expect("create");
        cf.write_at(b"abc", 0).expect("write");
        let (real_offset, data) = cf.read_at_with_max(3, 10).expect("read at end");
        assert_eq!(real_offset, 3);
        assert!(data.is_empty());
        let (real_offset, data) = cf.read_at_with_max(100, 10).expect("read far past end");
        assert_eq!(real_offset, 100);
        assert!(data.is_empty());
    }

    #[test]
    fn gap_writes_zero_fill() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cf = CirFile::create(temp_path(&dir, "t.cf"), 64).expect("create");
        cf.write_at(b"ab", 0).expect("write");
        cf.write_at(b"cd", 6).expect("gap write");

        let (real_offset, data) = cf.read_all().expect("read all");
        assert_eq!(real_offset, 0);
        assert_eq!(data, b"ab\0\0\0\0cd");
    }

    #[test]
    fn huge_gap_restarts_the_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cf = CirFile::create(temp_path(&dir, "t.cf"), 16).expect("create");
        cf.write_at(b"old", 0).expect("write");
        cf.write_at(b"new", 1000).expect("far write");

        let stat = cf.stat();
        assert_eq!(stat.file_offset, 1000);
        assert_eq!(stat.data_size, 3);
        let (real_offset, data) = cf.read_all().expect("read all");
        assert_eq!(real_offset, 1000);
        assert_eq!(data, b"new");
    }

    #[test]
    fn oversized_write_keeps_trailing_max_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cf = CirFile::create(temp_path(&dir, "t.cf"), 8).expect("create");
        cf.write_at(b"0123456789abcdef", 0).expect("oversized write");

        let stat = cf.stat();
        assert_eq!(stat.data_size, 8);
        assert_eq!(stat.file_offset, 8);
        let (real_offset, data) = cf.read_all().expect("read all");
        assert_eq!(real_offset, 8);
        assert_eq!(data, b"89abcdef");
    }

    #[test]
    fn write_before_window_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cf = CirFile::create(temp_path(&dir, "t.cf"), 8).expect("create");
        cf.write_at(b"0123456789abcdef", 0).expect("oversized write");
        assert!(matches!(
            cf.write_at(b"x", 0),
            Err(PtyFileError::InvalidArg(_))
        ));
    }
}
