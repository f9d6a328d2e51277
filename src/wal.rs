use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Largest payload a record may declare. A longer length prefix can only
/// come from a torn or corrupt write.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`. Returns the
/// number of bytes written.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large for WAL record"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + u64::from(len))
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// What a replay recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the intact prefix of the log.
    pub valid_len: u64,
    /// Bytes after `valid_len` that did not form a whole, checksummed record.
    pub discarded_bytes: u64,
}

/// Append-only event log behind the engine's durable state.
///
/// Records are length-prefixed and CRC-checked. A crash mid-write leaves a
/// torn tail, which replay stops at and [`Wal::open`] cuts off before new
/// records are appended.
///
/// A failed append or flush rolls the log back to its last durable length,
/// so a batch reported as failed never reaches disk later.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful `flush_sync`.
    durable_len: u64,
    pending_bytes: u64,
    pending_appends: u64,
    appends_since_compact: u64,
    /// Set when a rollback could not truncate the file. Every later write
    /// fails until the log is reopened, which replays up to the torn tail.
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the log at `path`, truncated to `valid_len` bytes
    /// when a previous replay found a torn tail.
    pub fn open(path: &Path, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        if len > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len: len.min(valid_len),
            pending_bytes: 0,
            pending_appends: 0,
            appends_since_compact: 0,
            poisoned: false,
        })
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL poisoned by a failed rollback"));
        }
        Ok(())
    }

    /// Append and fsync one event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event; it is durable only after [`Wal::flush_sync`].
    /// On error everything since the last flush is rolled back.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        match encode_record(&mut self.writer, event) {
            Ok(written) => {
                self.pending_bytes += written;
                self.pending_appends += 1;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Write and fsync everything buffered. On error the buffered records
    /// are discarded and the file is cut back to its last durable length.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        let result = self.writer.flush().and_then(|()| self.writer.get_ref().sync_all());
        match result {
            Ok(()) => {
                self.durable_len += self.pending_bytes;
                self.appends_since_compact += self.pending_appends;
                self.pending_bytes = 0;
                self.pending_appends = 0;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Drop buffered records and truncate whatever part of them reached the
    /// file.
    fn rollback(&mut self) {
        self.pending_bytes = 0;
        self.pending_appends = 0;
        let file = match self.writer.get_ref().try_clone() {
            Ok(file) => file,
            Err(e) => {
                error!("WAL {}: cannot reopen for rollback: {e}", self.path.display());
                self.poisoned = true;
                return;
            }
        };
        // into_parts hands back the buffer without writing it.
        let (_, _discarded) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        let truncated = self
            .writer
            .get_ref()
            .set_len(self.durable_len)
            .and_then(|()| self.writer.get_ref().sync_all());
        if let Err(e) = truncated {
            error!(
                "WAL {}: cannot truncate to {} bytes after failed write: {e}",
                self.path.display(),
                self.durable_len
            );
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `events` to the side file that [`Wal::swap_compact_file`] installs.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_bytes = 0;
        self.pending_appends = 0;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact record. Replay stops at the first short, oversized
    /// or checksum-failing record; everything from there on is reported as
    /// discarded.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                break;
            }

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            let Ok(event) = bincode::deserialize::<Event>(&payload) else {
                break;
            };

            replay.events.push(event);
            replay.valid_len += 8 + len as u64;
        }

        replay.discarded_bytes = total_len.saturating_sub(replay.valid_len);
        if replay.discarded_bytes > 0 {
            warn!(
                "WAL {}: discarding {} trailing bytes after {} intact events",
                path.display(),
                replay.discarded_bytes,
                replay.events.len()
            );
        }
        Ok(replay)
    }
}
