use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::engine::EngineError;
use crate::journal::Journal;
use crate::model::JournalEntry;

/// Commands queued for the writer task.
const QUEUE_DEPTH: usize = 4096;

/// Larger length words are treated as corruption.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// Frame layout, little endian: [u32 payload len][bincode JournalEntry][u32 crc32 of payload].

fn write_frame(out: &mut impl Write, entry: &JournalEntry) -> io::Result<()> {
    let payload =
        bincode::serialize(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf`; `false` if the input ended first.
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact entry, or `None` at the end of the log or at a torn or corrupt frame.
fn read_frame(input: &mut impl Read) -> io::Result<Option<JournalEntry>> {
    let mut word = [0u8; 4];
    if !read_full(input, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(input, &mut payload)? || !read_full(input, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

/// Every intact entry in the log at `path`. A missing file is an empty log.
pub fn replay(path: &Path) -> io::Result<Vec<JournalEntry>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut input = BufReader::new(file);
    let mut entries = Vec::new();
    while let Some(entry) = read_frame(&mut input)? {
        entries.push(entry);
    }
    Ok(entries)
}

/// The open log file, owned by the writer task.
struct LogFile {
    out: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl LogFile {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Write a batch and fsync once. Buffered bytes are flushed even when an
    /// encode fails so they never leak into the next batch.
    fn commit(&mut self, entries: &[&JournalEntry]) -> io::Result<()> {
        let mut written = Ok(());
        for entry in entries {
            if let Err(e) = write_frame(&mut self.out, entry) {
                written = Err(e);
                break;
            }
            self.appends_since_compact += 1;
        }
        let synced = self.out.flush().and_then(|()| self.out.get_ref().sync_all());
        written.and(synced)
    }

    /// Replace the log with `entries`: write a temp file, fsync, rename over, reopen.
    fn compact(&mut self, entries: &[JournalEntry]) -> io::Result<()> {
        let tmp = self.path.with_extension("wal.tmp");
        let mut out = BufWriter::new(File::create(&tmp)?);
        for entry in entries {
            write_frame(&mut out, entry)?;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
        fs::rename(&tmp, &self.path)?;
        *self = Self::open(&self.path)?;
        Ok(())
    }
}

enum WalCommand {
    Append {
        entry: JournalEntry,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        entries: Vec<JournalEntry>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (JournalEntry, oneshot::Sender<io::Result<()>>);

/// Group commit: every append already queued behind the first one shares its fsync.
fn commit_batch(log: &mut LogFile, batch: Vec<Pending>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let entries: Vec<&JournalEntry> = batch.iter().map(|(entry, _)| entry).collect();
    let result = log.commit(&entries);
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, response) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

async fn writer_loop(mut log: LogFile, mut rx: mpsc::Receiver<WalCommand>) {
    let mut deferred = None;
    loop {
        let cmd = match deferred.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            WalCommand::Append { entry, response } => {
                let mut batch = vec![(entry, response)];
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { entry, response } => batch.push((entry, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                commit_batch(&mut log, batch);
            }
            WalCommand::Compact { entries, response } => {
                let _ = response.send(log.compact(&entries));
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(log.appends_since_compact);
            }
        }
    }
}

/// [`Journal`] backed by a WAL file and a background group-commit writer.
pub struct WalJournal {
    tx: mpsc::Sender<WalCommand>,
}

impl WalJournal {
    /// Replay `path`, then start the writer. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<JournalEntry>)> {
        let entries = replay(path)?;
        let log = LogFile::open(path)?;
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(writer_loop(log, rx));
        Ok((Self { tx }, entries))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}

#[async_trait]
impl Journal for WalJournal {
    async fn append(&self, entry: &JournalEntry) -> Result<(), EngineError> {
        let entry = entry.clone();
        self.request(|response| WalCommand::Append { entry, response })
            .await?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    async fn compact(&self, snapshot: Vec<JournalEntry>) -> Result<(), EngineError> {
        self.request(|response| WalCommand::Compact { entries: snapshot, response })
            .await?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    async fn appends_since_compact(&self) -> u64 {
        self.request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}
