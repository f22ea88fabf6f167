//! File-tailing ingestor: follows a JSON-lines audit log, resuming from a
//! byte offset and inode, and re-opening the file from the start when
//! rotation is detected (the inode changes under the watched path).

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::ingest::{Ingestor, EVENT_CHANNEL_CAPACITY};
use crate::model::checkpoint::Checkpoint;
use crate::model::event::{AuditEvent, Provenance, RawAuditEvent, SourceType};

#[cfg(unix)]
async fn file_inode(path: &PathBuf) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.ino())
}

/// No portable inode equivalent off Unix; stat only to confirm the path
/// still resolves. Rotation then can't be told apart from an in-place
/// write by inode alone, so the read loop instead falls back to treating
/// a not-found stat as the rotation signal (see its `missing` tracking).
#[cfg(not(unix))]
async fn file_inode(path: &PathBuf) -> std::io::Result<u64> {
    tokio::fs::metadata(path).await?;
    Ok(0)
}

/// Shared, lock-free resume state updated by the tail task and read back by
/// `checkpoint()` from the supervisor's flush loop.
struct TailState {
    offset: AtomicU64,
    inode: AtomicU64,
    last_timestamp: std::sync::Mutex<Option<chrono::DateTime<chrono::Utc>>>,
}

pub struct FileIngestor {
    path: PathBuf,
    resume: Option<(u64, u64)>,
    state: Arc<TailState>,
}

impl FileIngestor {
    pub fn new(path: impl Into<PathBuf>, resume: Option<(u64, u64)>) -> Self {
        Self {
            path: path.into(),
            resume,
            state: Arc::new(TailState {
                offset: AtomicU64::new(0),
                inode: AtomicU64::new(0),
                last_timestamp: std::sync::Mutex::new(None),
            }),
        }
    }

    async fn open_from(&self, offset: u64) -> Result<(File, u64), IngestError> {
        let inode = file_inode(&self.path).await?;
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok((file, inode))
    }
}

async fn reopen_from_start(path: &PathBuf, reader: &mut BufReader<File>, state: &TailState, new_inode: u64) {
    match File::open(path).await {
        Ok(new_file) => {
            *reader = BufReader::new(new_file);
            state.inode.store(new_inode, Ordering::SeqCst);
            state.offset.store(0, Ordering::SeqCst);
        }
        Err(e) => {
            warn!(error = %e, "failed to reopen rotated audit log");
        }
    }
}

#[async_trait::async_trait]
impl Ingestor for FileIngestor {
    async fn start(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<AuditEvent>, IngestError> {
        let (starting_offset, starting_inode) = match self.resume {
            Some((offset, inode)) => {
                let actual_inode = file_inode(&self.path).await.unwrap_or(inode);
                if actual_inode == inode {
                    (offset, inode)
                } else {
                    // Rotated since we last checkpointed: start fresh.
                    (0, actual_inode)
                }
            }
            None => (0, file_inode(&self.path).await?),
        };

        let (file, inode) = self.open_from(starting_offset).await?;
        self.state.offset.store(starting_offset, Ordering::SeqCst);
        self.state.inode.store(inode, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let path = self.path.clone();
        let state = self.state.clone();

        // notify's watcher must stay alive for the duration of the task;
        // its change signal just wakes the read loop, which re-checks the
        // inode and re-reads to EOF either way.
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })
        .map_err(|e| IngestError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        if let Some(parent) = path.parent() {
            let _ = watcher.watch(parent, RecursiveMode::NonRecursive);
        }

        tokio::spawn(async move {
            let _watcher = watcher;
            let mut reader = BufReader::new(file);
            let mut line = String::new();
            #[cfg(not(unix))]
            let mut missing_since_last_check = false;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(path = %path.display(), "file ingestor shutting down");
                        return;
                    }
                    changed = notify_rx.recv() => {
                        if changed.is_none() {
                            return;
                        }
                        // A filesystem event fired; fall through to the
                        // read attempt below rather than acting on it
                        // directly, since writes and rotations both just
                        // mean "try reading again".
                    }
                    read_result = reader.read_line(&mut line) => {
                        match read_result {
                            Ok(0) => {
                                // EOF: check whether the file was rotated
                                // out from under us before waiting again.
                                match file_inode(&path).await {
                                    Ok(current_inode) if current_inode != state.inode.load(Ordering::SeqCst) => {
                                        reopen_from_start(&path, &mut reader, &state, current_inode).await;
                                    }
                                    #[cfg(not(unix))]
                                    Ok(current_inode) if missing_since_last_check => {
                                        // Stat succeeded again after a prior
                                        // not-found; with no inode to compare,
                                        // treat any reappearance as rotation.
                                        missing_since_last_check = false;
                                        reopen_from_start(&path, &mut reader, &state, current_inode).await;
                                    }
                                    Ok(_) => {
                                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                                    }
                                    Err(_) => {
                                        #[cfg(not(unix))]
                                        {
                                            missing_since_last_check = true;
                                        }
                                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                                    }
                                }
                                continue;
                            }
                            Ok(n) => {
                                state.offset.fetch_add(n as u64, Ordering::SeqCst);
                                let trimmed = line.trim_end();
                                if !trimmed.is_empty() {
                                    match serde_json::from_str::<RawAuditEvent>(trimmed) {
                                        Ok(raw) => {
                                            let timestamp = raw.request_received_timestamp;
                                            let event = AuditEvent::from_raw(
                                                raw,
                                                Provenance {
                                                    source_type: SourceType::File,
                                                    partition: None,
                                                },
                                            );
                                            *state.last_timestamp.lock().unwrap() = Some(timestamp);
                                            if tx.send(event).await.is_err() {
                                                return;
                                            }
                                        }
                                        Err(e) => {
                                            warn!(error = %e, line = %trimmed, "skipping malformed audit record");
                                        }
                                    }
                                }
                                line.clear();
                            }
                            Err(e) => {
                                warn!(error = %e, "file read error, retrying");
                                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint::File {
            file_offset: self.state.offset.load(Ordering::SeqCst),
            inode: self.state.inode.load(Ordering::SeqCst),
            last_timestamp: *self.state.last_timestamp.lock().unwrap(),
        }
    }
}
