//! Lazily read JSON-lines manifests
//!
//! A `LazyJsonl` holds paths, not items. Every call to `iter` reopens the
//! files and decodes one line at a time, so iteration can be restarted and
//! large manifests never have to fit in memory. Files ending in `.gz` are
//! transparently (de)compressed.
//!
//! `LazyPipeline` chains `map`, `filter`, `repeat` and `shuffle` on top of a
//! manifest. The chain is rebuilt from the source on every `iter`, so a
//! pipeline restarts the same way a plain manifest does.

use crate::cut::Cut;
use crate::error::{Error, Result};
use crate::manifest::Recording;
use crate::supervision::SupervisionSegment;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Items yielded by a lazy pipeline
pub type ItemIter<T> = Box<dyn Iterator<Item = Result<T>>>;

type Source<T> = Arc<dyn Fn() -> ItemIter<T> + Send + Sync>;

/// Default number of items held by `shuffle`
pub const DEFAULT_SHUFFLE_BUFFER: usize = 10_000;

/// Restartable lazy view over one or more JSON-lines files
#[derive(Debug, Clone)]
pub struct LazyJsonl<T> {
    paths: Vec<PathBuf>,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> LazyJsonl<T> {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::from_paths(vec![path.into()])
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        LazyJsonl {
            paths,
            _item: PhantomData,
        }
    }

    /// Concatenation of several manifests, iterated in the given order
    pub fn combine(manifests: impl IntoIterator<Item = LazyJsonl<T>>) -> Self {
        Self::from_paths(manifests.into_iter().flat_map(|m| m.paths).collect())
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Fresh iterator from the first line of the first file
    pub fn iter(&self) -> JsonlIter<T> {
        JsonlIter {
            pending: self.paths.iter().cloned().collect(),
            current: None,
            line_no: 0,
            _item: PhantomData,
        }
    }

    /// Number of items; reads every file
    pub fn count(&self) -> Result<usize> {
        self.iter().try_fold(0, |n, item| item.map(|_| n + 1))
    }

    /// First `n` items
    pub fn subset_first(&self, n: usize) -> Result<Vec<T>> {
        self.iter().take(n).collect()
    }

    /// Last `n` items, keeping at most `n` in memory
    pub fn subset_last(&self, n: usize) -> Result<Vec<T>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut tail = VecDeque::with_capacity(n);
        for item in self.iter() {
            if tail.len() == n {
                tail.pop_front();
            }
            tail.push_back(item?);
        }
        Ok(tail.into())
    }

    /// Every item, read into memory
    pub fn to_eager(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }
}

impl<T: DeserializeOwned + 'static> LazyJsonl<T> {
    /// Restartable pipeline reading this manifest
    pub fn pipeline(&self) -> LazyPipeline<T> {
        let paths = self.paths.clone();
        LazyPipeline::new(move || Box::new(LazyJsonl::<T>::from_paths(paths.clone()).iter()))
    }
}

impl<T: DeserializeOwned> IntoIterator for &LazyJsonl<T> {
    type Item = Result<T>;
    type IntoIter = JsonlIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the items of a `LazyJsonl`
pub struct JsonlIter<T> {
    pending: VecDeque<PathBuf>,
    current: Option<(PathBuf, Lines<Box<dyn BufRead>>)>,
    line_no: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Iterator for JsonlIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        loop {
            if let Some((path, lines)) = &mut self.current {
                match lines.next() {
                    Some(Ok(line)) => {
                        self.line_no += 1;
                        if line.trim().is_empty() {
                            continue;
                        }
                        return Some(serde_json::from_str(&line).map_err(|e| {
                            Error::Load(format!("{}:{}: {}", path.display(), self.line_no, e))
                        }));
                    }
                    Some(Err(e)) => {
                        self.current = None;
                        return Some(Err(e.into()));
                    }
                    None => self.current = None,
                }
            }
            let path = self.pending.pop_front()?;
            match open_text(&path) {
                Ok(reader) => {
                    debug!("Reading manifest {}", path.display());
                    self.line_no = 0;
                    self.current = Some((path, reader.lines()));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

// ============================================================================
// Pipelines
// ============================================================================

/// Item carrying a string id that `repeat` can rewrite
pub trait Identified {
    fn id(&self) -> &str;
    fn with_id(self, id: String) -> Self;
}

impl Identified for Cut {
    fn id(&self) -> &str {
        Cut::id(self)
    }

    fn with_id(mut self, id: String) -> Self {
        match &mut self {
            Cut::Mono(c) | Cut::Multi(c) => c.id = id,
            Cut::Padding(p) => p.id = id,
            Cut::Mixed(m) => m.id = id,
        }
        self
    }
}

impl Identified for Recording {
    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }
}

impl Identified for SupervisionSegment {
    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }
}

/// Restartable chain of lazy operations over a manifest
///
/// Errors from the source pass through every stage untouched.
pub struct LazyPipeline<T> {
    source: Source<T>,
}

impl<T> Clone for LazyPipeline<T> {
    fn clone(&self) -> Self {
        LazyPipeline {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: 'static> LazyPipeline<T> {
    /// Pipeline whose items come from a fresh call to `make` on every `iter`
    pub fn new(make: impl Fn() -> ItemIter<T> + Send + Sync + 'static) -> Self {
        LazyPipeline { source: Arc::new(make) }
    }

    /// Pipeline over items already in memory
    pub fn from_items(items: Vec<T>) -> Self
    where
        T: Clone + Send + Sync,
    {
        let items = Arc::new(items);
        Self::new(move || {
            let items = Arc::clone(&items);
            Box::new((0..items.len()).map(move |i| Ok(items[i].clone())))
        })
    }

    pub fn iter(&self) -> ItemIter<T> {
        (self.source)()
    }

    /// Every item, read into memory
    pub fn to_eager(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }

    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> LazyPipeline<U> {
        let source = self.source;
        let f = Arc::new(f);
        LazyPipeline::new(move || {
            let f = Arc::clone(&f);
            Box::new(source().map(move |item| item.map(|x| f(x))))
        })
    }

    /// Keep the items for which `predicate` holds
    pub fn filter(self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        let source = self.source;
        let predicate = Arc::new(predicate);
        Self::new(move || {
            let predicate = Arc::clone(&predicate);
            Box::new(source().filter(move |item| item.as_ref().map_or(true, |x| predicate(x))))
        })
    }

    /// Iterate the source `times` times, or forever when `times` is `None`
    ///
    /// Without `preserve_id` every id gets a `_repeat{epoch}` suffix. An empty
    /// source ends the iteration even when repeating forever.
    pub fn repeat(self, times: Option<usize>, preserve_id: bool) -> Self
    where
        T: Identified,
    {
        let source = self.source;
        Self::new(move || {
            Box::new(RepeatIter {
                source: Arc::clone(&source),
                current: None,
                epoch: 0,
                times,
                preserve_id,
                yielded: false,
            })
        })
    }

    /// Shuffle within consecutive chunks of `buffer_size` items
    ///
    /// The generator is reseeded with `seed` on every `iter`, so each pass
    /// yields the same order.
    pub fn shuffle(self, buffer_size: usize, seed: u64) -> Self {
        let source = self.source;
        let buffer_size = buffer_size.max(1);
        Self::new(move || {
            Box::new(ShuffleIter {
                inner: source(),
                buffer: Vec::with_capacity(buffer_size.min(DEFAULT_SHUFFLE_BUFFER)),
                buffer_size,
                rng: StdRng::seed_from_u64(seed),
                exhausted: false,
            })
        })
    }
}

impl<T: DeserializeOwned + 'static> From<LazyJsonl<T>> for LazyPipeline<T> {
    fn from(lazy: LazyJsonl<T>) -> Self {
        lazy.pipeline()
    }
}

struct RepeatIter<T> {
    source: Source<T>,
    current: Option<ItemIter<T>>,
    epoch: usize,
    times: Option<usize>,
    preserve_id: bool,
    yielded: bool,
}

impl<T: Identified> Iterator for RepeatIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        loop {
            if self.times.is_some_and(|times| self.epoch >= times) {
                return None;
            }
            let current = self.current.get_or_insert_with(|| (self.source)());
            match current.next() {
                Some(item) => {
                    self.yielded = true;
                    if self.preserve_id {
                        return Some(item);
                    }
                    let epoch = self.epoch;
                    return Some(item.map(|x| {
                        let id = format!("{}_repeat{}", x.id(), epoch);
                        x.with_id(id)
                    }));
                }
                None => {
                    if !self.yielded {
                        return None;
                    }
                    self.epoch += 1;
                    self.yielded = false;
                    self.current = None;
                }
            }
        }
    }
}

struct ShuffleIter<T> {
    inner: ItemIter<T>,
    /// Shuffled chunk, drained from the back
    buffer: Vec<T>,
    buffer_size: usize,
    rng: StdRng,
    exhausted: bool,
}

impl<T> Iterator for ShuffleIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if let Some(item) = self.buffer.pop() {
            return Some(Ok(item));
        }
        if self.exhausted {
            return None;
        }
        while self.buffer.len() < self.buffer_size {
            match self.inner.next() {
                Some(Ok(item)) => self.buffer.push(item),
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        self.buffer.shuffle(&mut self.rng);
        self.buffer.pop().map(Ok)
    }
}

/// Buffered reader of a text file, gunzipped when the name ends in `.gz`
pub(crate) fn open_text(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| Error::Load(format!("Cannot open {}: {}", path.display(), e)))?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Write `items` as JSON lines to `path`, gzipped when the name ends in `.gz`
///
/// # Returns
/// Number of items written
pub fn write_jsonl<'a, T: Serialize + 'a>(path: &Path, items: impl IntoIterator<Item = &'a T>) -> Result<usize> {
    let file = BufWriter::new(File::create(path)?);
    let count = if is_gzip(path) {
        let mut encoder = GzEncoder::new(file, flate2::Compression::default());
        let count = write_lines(&mut encoder, items)?;
        encoder.finish()?.flush()?;
        count
    } else {
        let mut file = file;
        let count = write_lines(&mut file, items)?;
        file.flush()?;
        count
    };
    debug!("Wrote {} items to {}", count, path.display());
    Ok(count)
}

fn write_lines<'a, T: Serialize + 'a, W: Write>(out: &mut W, items: impl IntoIterator<Item = &'a T>) -> Result<usize> {
    let mut count = 0;
    for item in items {
        serde_json::to_writer(&mut *out, item)?;
        out.write_all(b"\n")?;
        count += 1;
    }
    Ok(count)
}
