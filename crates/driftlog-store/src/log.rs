//! Durable, line-framed JSON log.
//!
//! Every record is a single JSON object on its own line. Records are only ever
//! appended, so every line but the last is known to be complete. A crash in
//! the middle of an append leaves at most one torn record at the tail, which
//! the next write-mode scan truncates away.
//!
//! ## File format
//!
//! ```text
//! {"id":"a","ts":1}\n
//! {"id":"b","ts":2}\n
//! {"id":"c","t        <- torn write, removed on the next write-mode open
//! ```
//!
//! ## Serialization
//!
//! All operations on one [`AppendOnlyLog`] go through a FIFO queue (a
//! `tokio::sync::Mutex`), so scans, appends and close are totally ordered.
//! File I/O runs on the blocking pool. Separate instances do not coordinate.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

/// One record: a JSON object.
pub type LogRecord = Map<String, Value>;

const READ_CHUNK_BYTES: usize = 8 * 1024;
const RECORD_BUF_BYTES: usize = 4 * 1024;
const LINE_DELIMITER: u8 = b'\n';

/// How a log is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Never mutates the file. A missing file reads as an empty log.
    Read,
    /// Creates the file (and parent directories) if needed. Torn tails are
    /// truncated during the initial scan.
    Write,
}

/// Lifecycle of a log instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPhase {
    Closed,
    Opening,
    Scanning,
    Ready,
}

/// An append-only log of JSON records.
pub struct AppendOnlyLog {
    path: PathBuf,
    mode: OpenMode,
    state: Arc<Mutex<LogFile>>,
}

impl AppendOnlyLog {
    /// Create a handle. Nothing touches the disk until [`open`](Self::open).
    pub fn new(path: impl AsRef<Path>, mode: OpenMode) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            state: Arc::new(Mutex::new(LogFile::new(path.clone(), mode))),
            path,
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Open the file and run the initial scan, returning every intact record.
    ///
    /// Opening an already open log is a no-op that returns no records.
    pub async fn open(&self) -> Result<Vec<LogRecord>> {
        self.open_with_progress(|_| {}).await
    }

    /// Like [`open`](Self::open), reporting the fraction of bytes scanned.
    pub async fn open_with_progress<F>(&self, mut progress: F) -> Result<Vec<LogRecord>>
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.run(move |log| {
            if !log.open()? {
                return Ok(Vec::new());
            }
            let mut records = Vec::new();
            log.scan_forward(
                &mut |record: LogRecord| {
                    records.push(record);
                    ControlFlow::Continue(())
                },
                Some(&mut progress as &mut dyn FnMut(f64)),
            )?;
            Ok(records)
        })
        .await
    }

    /// Scan the whole log from the start.
    pub async fn scan(&self) -> Result<Vec<LogRecord>> {
        self.run(|log| {
            let mut records = Vec::new();
            log.scan_forward(
                &mut |record: LogRecord| {
                    records.push(record);
                    ControlFlow::Continue(())
                },
                None,
            )?;
            Ok(records)
        })
        .await
    }

    /// Like [`scan`](Self::scan), reporting the fraction of bytes consumed.
    pub async fn scan_with_progress<F>(&self, mut progress: F) -> Result<Vec<LogRecord>>
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.run(move |log| {
            let mut records = Vec::new();
            log.scan_forward(
                &mut |record: LogRecord| {
                    records.push(record);
                    ControlFlow::Continue(())
                },
                Some(&mut progress as &mut dyn FnMut(f64)),
            )?;
            Ok(records)
        })
        .await
    }

    /// Scan from the end of the file towards the start.
    ///
    /// Unparsable records are skipped; the file is never modified.
    pub async fn reverse_scan(&self) -> Result<Vec<LogRecord>> {
        self.run(|log| {
            let mut records = Vec::new();
            log.scan_backward(&mut |record: LogRecord| {
                records.push(record);
                ControlFlow::Continue(())
            })?;
            Ok(records)
        })
        .await
    }

    /// Return up to `limit` records matching `predicate`, newest first.
    ///
    /// Reads backwards from the end and stops once the limit is reached.
    pub async fn reverse_query<P>(&self, mut predicate: P, limit: usize) -> Result<Vec<LogRecord>>
    where
        P: FnMut(&LogRecord) -> bool + Send + 'static,
    {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.run(move |log| {
            let mut matches = Vec::new();
            log.scan_backward(&mut |record: LogRecord| {
                if predicate(&record) {
                    matches.push(record);
                    if matches.len() >= limit {
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            })?;
            Ok(matches)
        })
        .await
    }

    /// Return up to `limit` records matching `predicate`, in file order.
    ///
    /// Scanning stops as soon as the limit is reached.
    pub async fn query<P>(&self, mut predicate: P, limit: usize) -> Result<Vec<LogRecord>>
    where
        P: FnMut(&LogRecord) -> bool + Send + 'static,
    {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.run(move |log| {
            let mut matches = Vec::new();
            log.scan_forward(
                &mut |record: LogRecord| {
                    if predicate(&record) {
                        matches.push(record);
                        if matches.len() >= limit {
                            return ControlFlow::Break(());
                        }
                    }
                    ControlFlow::Continue(())
                },
                None,
            )?;
            Ok(matches)
        })
        .await
    }

    /// Append records at the end of the file.
    ///
    /// Fails with [`StoreError::ReadOnly`] on a read-mode log and with
    /// [`StoreError::NotScanned`] before the initial scan completed.
    pub async fn append(&self, entries: Vec<LogRecord>) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(StoreError::ReadOnly(self.path.clone()));
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.run(move |log| log.append(&entries)).await
    }

    /// Close the file. A later [`open`](Self::open) rescans it.
    pub async fn close(&self) -> Result<()> {
        self.run(|log| {
            log.close();
            Ok(())
        })
        .await
    }

    pub async fn phase(&self) -> LogPhase {
        self.state.lock().await.phase
    }

    /// Byte offset just past the last record known to be intact.
    pub async fn last_good_offset(&self) -> u64 {
        self.state.lock().await.last_good_offset
    }

    pub async fn did_scan(&self) -> bool {
        self.state.lock().await.did_scan
    }

    async fn run<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut LogFile) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = Arc::clone(&self.state).lock_owned().await;
        tokio::task::spawn_blocking(move || op(&mut guard))
            .await
            .map_err(|e| StoreError::Io(io::Error::other(e)))?
    }
}

/// State owned by the serial queue.
struct LogFile {
    path: PathBuf,
    mode: OpenMode,
    file: Option<File>,
    phase: LogPhase,
    did_scan: bool,
    last_good_offset: u64,
}

impl LogFile {
    fn new(path: PathBuf, mode: OpenMode) -> Self {
        Self {
            path,
            mode,
            file: None,
            phase: LogPhase::Closed,
            did_scan: false,
            last_good_offset: 0,
        }
    }

    /// Returns true if a freshly opened file needs its initial scan.
    fn open(&mut self) -> Result<bool> {
        if self.file.is_some() {
            debug!(path = %self.path.display(), "log already open");
            return Ok(false);
        }
        self.phase = LogPhase::Opening;
        let file = match self.mode {
            OpenMode::Write => {
                if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)?;
                }
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&self.path)?
            }
            OpenMode::Read => match File::open(&self.path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "log missing, treating as empty");
                    self.phase = LogPhase::Ready;
                    self.did_scan = true;
                    return Ok(false);
                }
                Err(e) => {
                    self.phase = LogPhase::Closed;
                    return Err(e.into());
                }
            },
        };
        self.file = Some(file);
        Ok(true)
    }

    fn close(&mut self) {
        self.file = None;
        self.phase = LogPhase::Closed;
        self.did_scan = false;
    }

    fn scan_forward(
        &mut self,
        visit: &mut dyn FnMut(LogRecord) -> ControlFlow<()>,
        mut progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        self.phase = LogPhase::Scanning;

        let total = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut record: Vec<u8> = Vec::with_capacity(RECORD_BUF_BYTES);
        let mut offset: u64 = 0;
        let mut last_good: u64 = 0;
        let mut corrupt = false;
        let mut stopped = false;

        'read: loop {
            let n = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let mut start = 0;
            while start < n {
                let Some(rel) = chunk[start..n].iter().position(|&b| b == LINE_DELIMITER) else {
                    record.extend_from_slice(&chunk[start..n]);
                    offset += (n - start) as u64;
                    break;
                };
                let end = start + rel;
                record.extend_from_slice(&chunk[start..end]);
                offset += (rel + 1) as u64;
                start = end + 1;

                if record.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<LogRecord>(&record) {
                    Ok(parsed) => {
                        last_good = offset;
                        record.clear();
                        if let Some(report) = progress.as_deref_mut() {
                            report(offset as f64 / total.max(1) as f64);
                        }
                        if visit(parsed).is_break() {
                            stopped = true;
                            break 'read;
                        }
                    }
                    Err(e) => {
                        warn!(
                            path = %self.path.display(),
                            offset = last_good,
                            error = %e,
                            "unparsable log record"
                        );
                        corrupt = true;
                        break 'read;
                    }
                }
            }
        }

        if !stopped {
            if corrupt || !record.is_empty() {
                if self.mode == OpenMode::Write {
                    file.set_len(last_good)?;
                    file.sync_data()?;
                    info!(
                        path = %self.path.display(),
                        truncated_to = last_good,
                        dropped_bytes = total - last_good,
                        "truncated torn log tail"
                    );
                }
            }
            self.last_good_offset = last_good;
        }
        self.did_scan = true;
        self.phase = LogPhase::Ready;
        Ok(())
    }

    fn scan_backward(&mut self, visit: &mut dyn FnMut(LogRecord) -> ControlFlow<()>) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let mut pos = file.seek(SeekFrom::End(0))?;
        let mut carry: Vec<u8> = Vec::new();
        // Bytes after the final delimiter are never a complete record.
        let mut at_tail = true;

        while pos > 0 {
            let n = (READ_CHUNK_BYTES as u64).min(pos) as usize;
            pos -= n as u64;
            file.seek(SeekFrom::Start(pos))?;
            let mut data = vec![0u8; n];
            file.read_exact(&mut data)?;
            data.extend_from_slice(&carry);

            let mut end = data.len();
            while let Some(nl) = data[..end].iter().rposition(|&b| b == LINE_DELIMITER) {
                if at_tail {
                    at_tail = false;
                } else if visit_reverse_line(&self.path, &data[nl + 1..end], visit).is_break() {
                    return Ok(());
                }
                end = nl;
            }
            carry = data[..end].to_vec();
        }
        if !at_tail {
            let _ = visit_reverse_line(&self.path, &carry, visit);
        }
        Ok(())
    }

    fn append(&mut self, entries: &[LogRecord]) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(StoreError::ReadOnly(self.path.clone()));
        }
        let Some(file) = self.file.as_mut() else {
            return Err(StoreError::Closed(self.path.clone()));
        };
        if !self.did_scan {
            return Err(StoreError::NotScanned(self.path.clone()));
        }

        let mut encoded = Vec::with_capacity(entries.len() * 128);
        for entry in entries {
            serde_json::to_writer(&mut encoded, entry)?;
            encoded.push(LINE_DELIMITER);
        }
        file.seek(SeekFrom::End(0))?;
        file.write_all(&encoded)?;
        file.flush()?;
        file.sync_data()?;
        self.last_good_offset = file.stream_position()?;
        debug!(
            path = %self.path.display(),
            count = entries.len(),
            bytes = encoded.len(),
            "appended log records"
        );
        Ok(())
    }
}

fn visit_reverse_line(
    path: &Path,
    line: &[u8],
    visit: &mut dyn FnMut(LogRecord) -> ControlFlow<()>,
) -> ControlFlow<()> {
    if line.is_empty() {
        return ControlFlow::Continue(());
    }
    match serde_json::from_slice::<LogRecord>(line) {
        Ok(record) => visit(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping corrupt record in reverse scan");
            ControlFlow::Continue(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(v: Value) -> LogRecord {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn numbered(n: usize) -> Vec<LogRecord> {
        (0..n).map(|i| record(json!({ "id": format!("r{}", i), "n": i }))).collect()
    }

    #[tokio::test]
    async fn test_append_then_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/log.jsonl");

        let log = AppendOnlyLog::new(&path, OpenMode::Write);
        assert!(log.open().await.unwrap().is_empty());
        let entries = vec![
            record(json!({"id": "e1", "body": "hello"})),
            record(json!({"id": "e2", "body": "world"})),
        ];
        log.append(entries.clone()).await.unwrap();
        log.close().await.unwrap();

        let reopened = AppendOnlyLog::new(&path, OpenMode::Write);
        let scanned = reopened.open().await.unwrap();
        assert_eq!(scanned, entries);
        assert_eq!(reopened.phase().await, LogPhase::Ready);
    }

    #[tokio::test]
    async fn test_records_span_read_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.jsonl");
        let big = "x".repeat(READ_CHUNK_BYTES * 2 + 17);
        let entries = vec![
            record(json!({"id": "a", "pad": big})),
            record(json!({"id": "b"})),
        ];

        let log = AppendOnlyLog::new(&path, OpenMode::Write);
        log.open().await.unwrap();
        log.append(entries.clone()).await.unwrap();

        assert_eq!(log.scan().await.unwrap(), entries);
    }

    #[tokio::test]
    async fn test_torn_tail_truncated_in_write_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("torn.jsonl");

        let log = AppendOnlyLog::new(&path, OpenMode::Write);
        log.open().await.unwrap();
        log.append(numbered(3)).await.unwrap();
        let good_len = std::fs::metadata(&path).unwrap().len();
        log.close().await.unwrap();

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"id":"r3","n":"#).unwrap();
        drop(f);

        let reopened = AppendOnlyLog::new(&path, OpenMode::Write);
        let scanned = reopened.open().await.unwrap();
        assert_eq!(scanned, numbered(3));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(reopened.last_good_offset().await, good_len);

        // Appends continue cleanly after recovery.
        reopened.append(vec![record(json!({"id": "r3", "n": 3}))]).await.unwrap();
        assert_eq!(reopened.scan().await.unwrap(), numbered(4));
    }

    #[tokio::test]
    async fn test_garbage_line_truncates_rest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.jsonl");
        std::fs::write(&path, b"{\"id\":\"a\"}\nnot json\n{\"id\":\"b\"}\n").unwrap();

        let log = AppendOnlyLog::new(&path, OpenMode::Write);
        let scanned = log.open().await.unwrap();
        assert_eq!(scanned, vec![record(json!({"id": "a"}))]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 11);
    }

    #[tokio::test]
    async fn test_read_mode_never_mutates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.jsonl");
        let contents = b"{\"id\":\"a\"}\n{\"id\":\"b\"}\n{\"id\":";
        std::fs::write(&path, contents).unwrap();

        let log = AppendOnlyLog::new(&path, OpenMode::Read);
        let scanned = log.open().await.unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(std::fs::read(&path).unwrap(), contents.to_vec());

        let err = log.append(numbered(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly(_)));
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_read_mode_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.jsonl");

        let log = AppendOnlyLog::new(&path, OpenMode::Read);
        assert!(log.open().await.unwrap().is_empty());
        assert!(log.scan().await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_append_before_open_rejected() {
        let dir = TempDir::new().unwrap();
        let log = AppendOnlyLog::new(dir.path().join("early.jsonl"), OpenMode::Write);
        let err = log.append(numbered(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed(_)));
    }

    #[tokio::test]
    async fn test_reverse_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rev.jsonl");
        let log = AppendOnlyLog::new(&path, OpenMode::Write);
        log.open().await.unwrap();
        let a = record(json!({"id": "a"}));
        let b = record(json!({"id": "b"}));
        let c = record(json!({"id": "c"}));
        log.append(vec![a.clone(), b.clone(), c.clone()]).await.unwrap();

        assert_eq!(log.reverse_scan().await.unwrap(), vec![c, b, a]);
    }

    #[tokio::test]
    async fn test_reverse_scan_skips_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rev-corrupt.jsonl");
        let big = "y".repeat(READ_CHUNK_BYTES + 5);
        let contents = format!(
            "{{\"id\":\"a\"}}\n{{broken\n{{\"id\":\"b\",\"pad\":\"{}\"}}\n{{\"id\":\"torn",
            big
        );
        std::fs::write(&path, &contents).unwrap();

        let log = AppendOnlyLog::new(&path, OpenMode::Read);
        log.open().await.unwrap();
        let ids: Vec<_> = log
            .reverse_scan()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["id"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
    }

    #[tokio::test]
    async fn test_reverse_query_stops_at_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rev-limit.jsonl");
        let log = AppendOnlyLog::new(&path, OpenMode::Write);
        log.open().await.unwrap();
        log.append(numbered(10)).await.unwrap();

        let visited = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = visited.clone();
        let newest = log
            .reverse_query(
                move |_| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    true
                },
                3,
            )
            .await
            .unwrap();
        assert_eq!(newest, numbered(10).into_iter().rev().take(3).collect::<Vec<_>>());
        assert_eq!(visited.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(log.reverse_query(|_| true, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_limit_and_order() {
        let dir = TempDir::new().unwrap();
        let log = AppendOnlyLog::new(dir.path().join("q.jsonl"), OpenMode::Write);
        log.open().await.unwrap();
        log.append(numbered(20)).await.unwrap();

        let visited = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&visited);
        let evens = log
            .query(
                move |r| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    r["n"].as_u64().unwrap() % 2 == 0
                },
                3,
            )
            .await
            .unwrap();

        let ns: Vec<u64> = evens.iter().map(|r| r["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![0, 2, 4]);
        // Records 0..=4 were visited; nothing after the third match.
        assert_eq!(visited.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_progress_reaches_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.jsonl");
        let log = AppendOnlyLog::new(&path, OpenMode::Write);
        log.open().await.unwrap();
        log.append(numbered(10)).await.unwrap();
        log.close().await.unwrap();

        let last = Arc::new(std::sync::Mutex::new(0.0f64));
        let sink = Arc::clone(&last);
        log.open_with_progress(move |p| *sink.lock().unwrap() = p)
            .await
            .unwrap();
        assert!((*last.lock().unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("concurrent.jsonl");
        let log = Arc::new(AppendOnlyLog::new(&path, OpenMode::Write));
        log.open().await.unwrap();

        let mut handles = Vec::new();
        for t in 0..8 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                let batch: Vec<LogRecord> = (0..25)
                    .map(|i| record(json!({"id": format!("t{}-{}", t, i), "pad": "z".repeat(300)})))
                    .collect();
                log.append(batch).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let reopened = AppendOnlyLog::new(&path, OpenMode::Read);
        assert_eq!(reopened.open().await.unwrap().len(), 200);
    }

    proptest::proptest! {
        #[test]
        fn cut_anywhere_keeps_complete_records(
            ids in proptest::collection::vec("[a-z0-9]{1,12}", 1..20),
            cut in 0.0f64..1.0,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("cut.jsonl");
            let records: Vec<LogRecord> = ids.iter().map(|id| record(json!({ "id": id }))).collect();

            rt.block_on(async {
                let log = AppendOnlyLog::new(&path, OpenMode::Write);
                log.open().await.unwrap();
                log.append(records.clone()).await.unwrap();
            });

            let bytes = std::fs::read(&path).unwrap();
            let at = (bytes.len() as f64 * cut) as usize;
            std::fs::write(&path, &bytes[..at]).unwrap();

            let mut end = 0;
            let mut kept = 0;
            for r in &records {
                end += serde_json::to_vec(r).unwrap().len() + 1;
                if end > at {
                    break;
                }
                kept += 1;
            }

            let scanned = rt.block_on(async {
                AppendOnlyLog::new(&path, OpenMode::Write).open().await.unwrap()
            });
            proptest::prop_assert_eq!(&scanned[..], &records[..kept]);
        }
    }
}
