use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use clap::crate_version;
use serde::{Deserialize, Serialize};
use serde_json::Deserializer;
use tracing::{debug, info, instrument};

use super::{glob_match, Entry, KvsEngine};
use crate::{Result, SwapError};

// the size threshold (in bytes) that will trigger a log compaction
const COMPACTION_THRESHOLD: u64 = 1024 * 1024;

/// A log-structured storage engine.
///
/// Every mutation is appended, as a serialized JSON [`Command`], to a "command log" kept in
/// the "working dir" given when the store is opened. An in-memory index maps each key to the
/// position of its latest entry in the logs. Sets are written as whole entries, so a SADD
/// appends the complete, updated set.
///
/// Once the size of "stale" data in the logs hits the COMPACTION THRESHOLD, the live entries
/// are copied into a new log and the old log files are deleted.
///
/// Clones share the same underlying logs; commands are serialized through a mutex.
#[derive(Debug, Clone)]
pub struct LogStore {
    inner: Arc<Mutex<LogInner>>,
}

#[derive(Debug)]
struct LogInner {
    // path to the directory containing the command log files
    working_dir: PathBuf,

    // the current log generation number that is in use
    current_log_gen: u64,

    // maps generation numbers to a file Reader that will read from the log file
    readers: HashMap<u64, BufReaderWithPos<File>>,

    // writer of the current command log.
    writer: BufWriterWithPos<File>,

    // maps keys to their position within a log file.
    index: BTreeMap<String, CommandPos>,

    // number of bytes representing "stale" commands that could be
    // deleted during a compaction.
    uncompacted: u64,
}

impl LogStore {
    /// opens a [`LogStore`] using the given `working_dir` as the directory where the store's
    /// data will be kept. If the `working_dir` does not exist it will be created.
    #[instrument]
    pub fn open(working_dir: &Path) -> Result<LogStore> {
        info!("opening log engine version {}", crate_version!());
        fs::create_dir_all(working_dir)?;
        debug!("working_dir absolute path= {:?}", working_dir.canonicalize()?);

        // get all log gen numbers in the working dir
        let log_gens = get_log_gens(working_dir)?.unwrap_or_default();
        debug!(?log_gens);

        let mut readers: HashMap<u64, BufReaderWithPos<File>> = HashMap::new();
        let mut index = BTreeMap::new();
        let mut uncompacted = 0_u64;

        // build buffered readers for all log files
        for gen in &log_gens {
            let mut reader =
                BufReaderWithPos::new(File::open(build_log_path(working_dir, *gen))?)?;
            // load data from the reader into the index
            uncompacted += load(*gen, &mut reader, &mut index)?;
            readers.insert(*gen, reader);
        }
        debug!(uncompacted);

        // build a writer into the current gen log
        let current_log_gen = log_gens.last().unwrap_or(&0) + 1;
        debug!(current_log_gen);
        let writer = new_log_file(working_dir, current_log_gen, &mut readers)?;

        let inner = LogInner {
            index,
            readers,
            writer,
            working_dir: working_dir.to_path_buf(),
            current_log_gen,
            uncompacted,
        };
        Ok(LogStore {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Clears stale entries in the command log.
    pub fn compact(&self) -> Result<()> {
        self.lock()?.compact()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogInner>> {
        self.inner
            .lock()
            .map_err(|_| SwapError::StoreUnavailable("log store lock poisoned".to_string()))
    }
}

impl LogInner {
    /// reads the latest entry for `key` from the logs
    fn read(&mut self, key: &str) -> Result<Option<Entry>> {
        let CommandPos { gen, pos, len } = match self.index.get(key) {
            Some(cmd_pos) => *cmd_pos,
            None => return Ok(None),
        };
        let reader = self
            .readers
            .get_mut(&gen)
            .ok_or_else(|| SwapError::Parsing(format!("no log reader for generation {}", gen)))?;

        reader.seek(SeekFrom::Start(pos))?;
        let cmd_reader = reader.take(len);
        match serde_json::from_reader(cmd_reader)? {
            Command::Put { entry, .. } => Ok(Some(entry)),
            Command::Remove { .. } => Err(SwapError::Parsing(format!(
                "invalid command in logs for key: {} gen: {} pos: {} len: {}",
                key, gen, pos, len
            ))),
        }
    }

    /// appends `entry` for `key` to the current log and points the index at it
    fn write(&mut self, key: String, entry: Entry) -> Result<()> {
        let cmd = Command::Put { key, entry };
        let pos = self.writer.pos;
        serde_json::to_writer(&mut self.writer, &cmd)?;
        self.writer.flush()?;

        // insert the command into the index
        if let Command::Put { key, .. } = cmd {
            if let Some(old_command) = self
                .index
                .insert(key, (self.current_log_gen, pos..self.writer.pos).into())
            {
                self.uncompacted += old_command.len;
            }
        }

        self.maybe_compact()
    }

    /// appends a removal of `key`, returning whether it existed
    fn delete(&mut self, key: String) -> Result<bool> {
        let old_command = match self.index.remove(&key) {
            Some(old) => old,
            None => return Ok(false),
        };
        let pos = self.writer.pos;
        serde_json::to_writer(&mut self.writer, &Command::Remove { key })?;
        self.writer.flush()?;

        // both the replaced entry and the removal itself are stale from now on
        self.uncompacted += old_command.len + (self.writer.pos - pos);
        self.maybe_compact()?;
        Ok(true)
    }

    fn maybe_compact(&mut self) -> Result<()> {
        if self.uncompacted > COMPACTION_THRESHOLD {
            self.compact()?;
        }
        Ok(())
    }

    /// Create a new log file with given generation number and adds its reader to the readers map.
    ///
    /// Returns a writer to the newly create log file.
    fn new_log_file(&mut self, gen: u64) -> Result<BufWriterWithPos<File>> {
        new_log_file(&self.working_dir, gen, &mut self.readers)
    }

    /// Copies every live entry into a fresh log and deletes the older logs.
    fn compact(&mut self) -> Result<()> {
        // increase current gen by 2. current_gen + 1 is for the compaction file.
        let compaction_gen = self.current_log_gen + 1;
        self.current_log_gen += 2;
        self.writer = self.new_log_file(self.current_log_gen)?;

        let mut compaction_writer = self.new_log_file(compaction_gen)?;

        let mut new_pos = 0; // pos in the new log file.

        for cmd_pos in self.index.values_mut() {
            // get the reader for the generation log file the commandPos is pointing to
            let reader = self.readers.get_mut(&cmd_pos.gen).ok_or_else(|| {
                SwapError::Parsing(format!("no log reader for generation {}", cmd_pos.gen))
            })?;
            if reader.pos != cmd_pos.pos {
                reader.seek(SeekFrom::Start(cmd_pos.pos))?;
            }

            // copy the command into the compaction log and re-point the index at it
            let mut entry_reader = reader.take(cmd_pos.len);
            let len = io::copy(&mut entry_reader, &mut compaction_writer)?;
            *cmd_pos = (compaction_gen, new_pos..new_pos + len).into();
            new_pos += len;
        }

        compaction_writer.flush()?;

        // remove stale log files by comparing gen numbers with the current compaction gen
        let stale_gens: Vec<_> = self
            .readers
            .keys()
            .filter(|&&gen| gen < compaction_gen)
            .cloned()
            .collect();
        for stale_gen in stale_gens {
            self.readers.remove(&stale_gen);
            fs::remove_file(build_log_path(&self.working_dir, stale_gen))?;
        }
        info!(compaction_gen, "compacted command logs");
        self.uncompacted = 0;

        Ok(())
    }
}

impl KvsEngine for LogStore {
    fn set(&self, key: String, value: String) -> Result<()> {
        self.lock()?.write(key, Entry::Text(value))
    }

    fn get(&self, key: String) -> Result<Option<String>> {
        let entry = self.lock()?.read(&key)?;
        Entry::text(&key, entry)
    }

    fn remove(&self, key: String) -> Result<bool> {
        self.lock()?.delete(key)
    }

    fn set_add(&self, key: String, member: String) -> Result<bool> {
        let mut inner = self.lock()?;
        let mut members = Entry::members(&key, inner.read(&key)?)?;
        if !members.insert(member) {
            return Ok(false);
        }
        inner.write(key, Entry::Set(members))?;
        Ok(true)
    }

    fn set_remove(&self, key: String, member: String) -> Result<bool> {
        let mut inner = self.lock()?;
        let mut members = Entry::members(&key, inner.read(&key)?)?;
        if !members.remove(&member) {
            return Ok(false);
        }
        if members.is_empty() {
            inner.delete(key)?;
        } else {
            inner.write(key, Entry::Set(members))?;
        }
        Ok(true)
    }

    fn set_members(&self, key: String) -> Result<Vec<String>> {
        let entry = self.lock()?.read(&key)?;
        Ok(Entry::members(&key, entry)?.into_iter().collect())
    }

    fn set_cardinality(&self, key: String) -> Result<u64> {
        let entry = self.lock()?.read(&key)?;
        Ok(Entry::members(&key, entry)?.len() as u64)
    }

    fn set_is_member(&self, key: String, member: String) -> Result<bool> {
        let entry = self.lock()?.read(&key)?;
        Ok(Entry::members(&key, entry)?.contains(&member))
    }

    fn keys(&self, pattern: String) -> Result<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .index
            .keys()
            .filter(|key| glob_match(&pattern, key))
            .cloned()
            .collect())
    }

    fn compare_and_swap(
        &self,
        key: String,
        expected: Option<String>,
        value: String,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        let current = Entry::text(&key, inner.read(&key)?)?;
        if current != expected {
            return Ok(false);
        }
        inner.write(key, Entry::Text(value))?;
        Ok(true)
    }
}

/// loads the commands from the given reader into the given `index` map
/// returns the amount of bytes that could be compacted.
/// `gen` is the generation number of the file being read by `reader`
///
/// # Errors
/// IO Errors will be returned if any log file could not be opened/read
fn load(
    gen: u64,
    reader: &mut BufReaderWithPos<File>,
    index: &mut BTreeMap<String, CommandPos>,
) -> Result<u64> {
    let mut pos = reader.seek(SeekFrom::Start(0))?;
    let mut uncompacted = 0_u64;
    let mut stream = Deserializer::from_reader(reader).into_iter::<Command>();

    while let Some(command) = stream.next() {
        let length = stream.byte_offset() as u64 - pos; // length of the command
        match command? {
            Command::Put { key, .. } => {
                if let Some(old_command) = index.insert(key, CommandPos::new(gen, pos, length)) {
                    uncompacted += old_command.len;
                }
            }
            Command::Remove { key } => {
                if let Some(old_command) = index.remove(&key) {
                    uncompacted += old_command.len;
                }
                // this "remove" command itself can be deleted in the next compaction
                uncompacted += length;
            }
        }
        pos = stream.byte_offset() as u64;
    }

    Ok(uncompacted)
}

/// Constructs a log file path using the `gen` number as the file stem and the appending the
/// suffix ".log" to it. The log file name is then joined to the current working directory path
fn build_log_path(dir: &Path, gen: u64) -> PathBuf {
    dir.join(format!("{}.log", gen))
}

/// Create a new log file with given generation number and add the reader to the readers map.
///
/// Returns the writer to the log.
fn new_log_file(
    path: &Path,
    gen: u64,
    readers: &mut HashMap<u64, BufReaderWithPos<File>>,
) -> Result<BufWriterWithPos<File>> {
    let path = build_log_path(path, gen);
    let writer = BufWriterWithPos::new(
        OpenOptions::new()
            .create(true)
            .write(true)
            .append(true)
            .open(&path)?,
    )?;

    readers.insert(gen, BufReaderWithPos::new(File::open(&path)?)?);
    Ok(writer)
}

/// These are the command types that will be recorded in the command log(s)
#[derive(Serialize, Deserialize, Debug)]
enum Command {
    Put { key: String, entry: Entry },
    Remove { key: String },
}

/// Holds position data for commands that have been written into a command log.
#[derive(Debug, Copy, Clone)]
struct CommandPos {
    // the log generation number
    gen: u64,
    // position of the command with the log (byte offset)
    pos: u64,
    // the total length of the command data
    len: u64,
}

impl CommandPos {
    fn new(gen: u64, pos: u64, len: u64) -> Self {
        CommandPos { gen, pos, len }
    }
}

/// enables conversion from a tuple of (generation number, pos_start..pos_end) into
/// a `CommandPos`. The len of the command pos will be computed from the range
impl From<(u64, Range<u64>)> for CommandPos {
    fn from((gen, range): (u64, Range<u64>)) -> Self {
        CommandPos {
            gen,
            pos: range.start,
            len: range.end - range.start,
        }
    }
}

/// returns the log generation numbers located in the given `dir` path, sorted in ascending order
/// This function expects that the logs will end in `.log` and that the file names (stems) will be
/// integer strings.
///
/// # Errors
/// returns an IO Error if the given `dir` and/or log files in that dir could not be read,
/// or a Parsing error if a file stem could not be converted to an integer
fn get_log_gens(dir: &Path) -> Result<Option<Vec<u64>>> {
    let mut logs: Vec<u64> = vec![];
    for entry in (fs::read_dir(dir)?).flatten() {
        let path = entry.path();
        if entry.file_type()?.is_file()
            && path.extension().map_or(false, |ext| ext.to_str() == Some("log"))
        {
            let gen_str = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| {
                    SwapError::Parsing(format!("could not read log file stem for {:?}", &path))
                })?;
            let gen = gen_str.parse::<u64>().map_err(|_| {
                SwapError::Parsing(format!(
                    "could not parse the file stem: {} into a u64",
                    gen_str
                ))
            })?;
            logs.push(gen);
        }
    }
    if !logs.is_empty() {
        logs.sort_unstable();
        Ok(Some(logs))
    } else {
        Ok(None)
    }
}

/// A struct that holds a BufferedReader along with the current seek `pos` of that BufferedReader
#[derive(Debug)]
struct BufReaderWithPos<R: Read + Seek> {
    reader: BufReader<R>,
    pos: u64,
}

impl<R: Read + Seek> BufReaderWithPos<R> {
    fn new(mut inner: R) -> Result<Self> {
        let pos = inner.seek(SeekFrom::Current(0))?;
        Ok(BufReaderWithPos {
            reader: BufReader::new(inner),
            pos,
        })
    }
}

impl<R: Read + Seek> Read for BufReaderWithPos<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.reader.read(buf)?;
        self.pos += len as u64;
        Ok(len)
    }
}

impl<R: Read + Seek> Seek for BufReaderWithPos<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = self.reader.seek(pos)?;
        Ok(self.pos)
    }
}

#[derive(Debug)]
struct BufWriterWithPos<W: Write + Seek> {
    writer: BufWriter<W>,
    pos: u64,
}

impl<W: Write + Seek> BufWriterWithPos<W> {
    fn new(mut inner: W) -> Result<Self> {
        let pos = inner.seek(SeekFrom::Current(0))?;
        Ok(BufWriterWithPos {
            writer: BufWriter::new(inner),
            pos,
        })
    }
}

impl<W: Write + Seek> Write for BufWriterWithPos<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.writer.write(buf)?;
        self.pos += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write + Seek> Seek for BufWriterWithPos<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = self.writer.seek(pos)?;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn entries_survive_a_reopen() -> Result<()> {
        let temp_dir = TempDir::new()?;
        {
            let store = LogStore::open(temp_dir.path())?;
            store.set("listing:1".into(), "{}".into())?;
            store.set_add("listings:all".into(), "1".into())?;
            store.set_add("listings:all".into(), "2".into())?;
            store.set_remove("listings:all".into(), "2".into())?;
            store.set("gone".into(), "x".into())?;
            assert!(store.remove("gone".into())?);
        }

        let store = LogStore::open(temp_dir.path())?;
        assert_eq!(store.get("listing:1".into())?.as_deref(), Some("{}"));
        assert_eq!(store.set_members("listings:all".into())?, vec!["1".to_string()]);
        assert_eq!(store.get("gone".into())?, None);
        assert!(!store.remove("gone".into())?);
        Ok(())
    }

    #[test]
    fn compaction_keeps_live_entries() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = LogStore::open(temp_dir.path())?;
        for iter in 0..50 {
            store.set("key".into(), format!("value{}", iter))?;
            store.set_add("set".into(), format!("m{}", iter % 5))?;
        }
        store.compact()?;

        let logs = get_log_gens(temp_dir.path())?.unwrap_or_default();
        assert_eq!(logs.len(), 2, "only the compaction log and the active log remain");

        drop(store);
        let store = LogStore::open(temp_dir.path())?;
        assert_eq!(store.get("key".into())?.as_deref(), Some("value49"));
        assert_eq!(store.set_cardinality("set".into())?, 5);
        Ok(())
    }
}
