use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Bytes of framing around each payload: u32 length + u32 crc.
const FRAME_OVERHEAD: u64 = 8;

/// Upper bound on a single payload. A larger length prefix is corruption.
const MAX_FRAME_LEN: u32 = 1 << 20;

/// Write one event as `[u32 len][bincode payload][u32 crc32]`, little endian.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large for WAL frame"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact frame. `None` at end of file, on a torn frame, on a
/// CRC mismatch or on an undecodable payload: everything after is untrusted.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word);
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, u64::from(len) + FRAME_OVERHEAD)))
}

/// Result of scanning a log file.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Length of the intact prefix. Anything past it is a torn or corrupt tail.
    pub valid_len: u64,
}

/// Append-only reservation log.
///
/// A crash can leave a half-written last frame; [`Wal::recover`] drops it so
/// new appends never land behind garbage. A failed append is cut back the same
/// way while running.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful sync.
    committed_len: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log for appending, without scanning it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            appends_since_compact: 0,
        })
    }

    /// Replay the log, cut off any damaged tail, and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let Replay { events, valid_len } = Self::replay(path)?;
        let on_disk = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if on_disk > valid_len {
            warn!(
                path = %path.display(),
                dropped_bytes = on_disk - valid_len,
                "truncating damaged WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, events))
    }

    /// Scan the log from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some((event, frame_len)) = read_frame(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += frame_len;
        }
        Ok(replay)
    }

    /// Write one event and fsync it. On failure the file is cut back to the
    /// last committed length, so an unacknowledged frame never replays.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        match write_frame(&mut self.writer, event).and_then(|()| self.flush_sync()) {
            Ok(()) => {
                self.committed_len = self.writer.get_ref().metadata()?.len();
                self.appends_since_compact += 1;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    error!(path = %self.path.display(), error = %rollback, "WAL rollback failed");
                }
                Err(e)
            }
        }
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Drop whatever is buffered and truncate to `committed_len`.
    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // Discard the buffer instead of flushing it on drop.
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a synced temp file, then rename it
    /// over the live one and reopen.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                write_frame(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        self.flush_sync()?;
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }
}
