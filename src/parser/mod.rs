//! Offset-driven COS byte parser
//!
//! Every operation takes an absolute byte offset into an immutable buffer and
//! yields either a typed [`ParserResult`] or `None` when nothing parseable sits
//! at that offset. Leading whitespace and comments are skipped before a token,
//! so `start` in a result always points at the token itself. All `end`
//! offsets are inclusive.
//!
//! Two strategies implement [`DataParser`]: [`SyncDataParser`] runs on the
//! caller's thread and [`BgDataParser`] runs on a dedicated worker thread. Both
//! return a [`ParseTask`], so callers never branch on the strategy in use.

mod tokenizer;
mod sync;
#[cfg(feature = "background-parser")]
mod background;

pub use tokenizer::Tokenizer;
pub use sync::SyncDataParser;
#[cfg(feature = "background-parser")]
pub use background::BgDataParser;

use std::fmt;
use std::ops::Range;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CosError, CosResult};
use crate::pdf::Reference;

/// A parsed value together with the inclusive byte range it occupied
#[derive(Debug, Clone, PartialEq)]
pub struct ParserResult<T> {
    pub value: T,
    pub start: usize,
    pub end: usize,
}

impl<T> ParserResult<T> {
    pub fn new(value: T, start: usize, end: usize) -> Self {
        Self { value, start, end }
    }

    /// Offset of the first byte after the value
    pub fn next(&self) -> usize {
        self.end + 1
    }
}

/// Byte bounds of a value; `content_*` delimit a container's interior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserBounds {
    pub start: usize,
    pub end: usize,
    pub content_start: Option<usize>,
    pub content_end: Option<usize>,
}

impl ParserBounds {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            content_start: None,
            content_end: None,
        }
    }

    pub fn with_content(start: usize, end: usize, content_start: usize, content_end: usize) -> Self {
        Self {
            start,
            end,
            content_start: Some(content_start),
            content_end: Some(content_end),
        }
    }

    /// Half-open range of the whole value
    pub fn range(&self) -> Range<usize> {
        self.start..self.end + 1
    }

    /// Half-open range of the interior; empty when the container is empty
    pub fn content_range(&self) -> Option<Range<usize>> {
        match (self.content_start, self.content_end) {
            (Some(start), Some(end)) => Some(start..(end + 1).max(start)),
            _ => None,
        }
    }

    /// The same bounds expressed relative to `start`
    pub fn rebased(&self) -> Self {
        let base = self.start;
        Self {
            start: 0,
            end: self.end - base,
            content_start: self.content_start.map(|s| s - base),
            content_end: self.content_end.map(|e| e.saturating_sub(base)),
        }
    }
}

/// COS value kinds detectable from leading delimiters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Dictionary,
    Array,
    StringLiteral,
    StringHex,
    Number,
    Name,
    Boolean,
    Null,
    Reference,
    Stream,
}

/// Which execution context parse operations run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserStrategy {
    /// Background worker when available, otherwise synchronous
    #[default]
    Auto,
    Sync,
    Background,
}

/// A pending or already resolved parse operation
///
/// Dropping a task cancels interest in it; the parser never writes anything
/// on behalf of a task, so cancellation has no side effect.
#[must_use = "parse tasks do nothing unless waited on"]
pub struct ParseTask<T> {
    state: TaskState<T>,
}

enum TaskState<T> {
    Ready(T),
    Pending(Receiver<T>),
}

impl<T> ParseTask<T> {
    /// Task that already holds its result
    pub fn ready(value: T) -> Self {
        Self {
            state: TaskState::Ready(value),
        }
    }

    pub(crate) fn pending(receiver: Receiver<T>) -> Self {
        Self {
            state: TaskState::Pending(receiver),
        }
    }

    /// Whether the result is available without blocking
    pub fn is_ready(&self) -> bool {
        matches!(self.state, TaskState::Ready(_))
    }

    /// Block until the result is available
    pub fn wait(self) -> CosResult<T> {
        match self.state {
            TaskState::Ready(value) => Ok(value),
            TaskState::Pending(receiver) => receiver.recv().map_err(|_| CosError::ParserDisconnected),
        }
    }

    /// Wait for a batch of independently issued tasks, preserving order
    pub fn join_all(tasks: Vec<ParseTask<T>>) -> CosResult<Vec<T>> {
        tasks.into_iter().map(ParseTask::wait).collect()
    }
}

impl<T> fmt::Debug for ParseTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseTask")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Unit of work shipped to a parser's execution context
pub type ParseJob = Box<dyn FnOnce(&Tokenizer<'_>) + Send + 'static>;

/// Parse-at-offset contract shared by every parser strategy
pub trait DataParser: Send + Sync + fmt::Debug {
    /// The immutable buffer this parser reads
    fn buffer(&self) -> &Arc<[u8]>;

    /// Strategy this parser was built with
    fn strategy(&self) -> ParserStrategy;

    /// Queue a job on the execution context; hands the job back if the
    /// context can no longer accept work
    fn submit(&self, job: ParseJob) -> Result<(), ParseJob>;

    fn len(&self) -> usize {
        self.buffer().len()
    }

    fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    fn get_value_type_at(&self, offset: usize) -> ParseTask<Option<ValueType>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.get_value_type_at(offset))
    }

    fn parse_number_at(
        &self,
        offset: usize,
        allow_float: bool,
        allow_negative: bool,
    ) -> ParseTask<Option<ParserResult<f64>>> {
        dispatch(self, move |t: &Tokenizer<'_>| {
            t.parse_number_at(offset, allow_float, allow_negative)
        })
    }

    fn parse_bool_at(&self, offset: usize) -> ParseTask<Option<ParserResult<bool>>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.parse_bool_at(offset))
    }

    fn parse_name_at(&self, offset: usize, include_slash: bool) -> ParseTask<Option<ParserResult<String>>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.parse_name_at(offset, include_slash))
    }

    fn parse_name_array_at(
        &self,
        offset: usize,
        include_slash: bool,
    ) -> ParseTask<Option<ParserResult<Vec<String>>>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.parse_name_array_at(offset, include_slash))
    }

    fn parse_number_array_at(
        &self,
        offset: usize,
        allow_float: bool,
        allow_negative: bool,
    ) -> ParseTask<Option<ParserResult<Vec<f64>>>> {
        dispatch(self, move |t: &Tokenizer<'_>| {
            t.parse_number_array_at(offset, allow_float, allow_negative)
        })
    }

    fn parse_ref_at(&self, offset: usize) -> ParseTask<Option<ParserResult<Reference>>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.parse_ref_at(offset))
    }

    fn parse_ref_array_at(&self, offset: usize) -> ParseTask<Option<ParserResult<Vec<Reference>>>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.parse_ref_array_at(offset))
    }

    fn parse_literal_at(&self, offset: usize) -> ParseTask<Option<ParserResult<Vec<u8>>>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.parse_literal_at(offset))
    }

    fn parse_hex_at(&self, offset: usize) -> ParseTask<Option<ParserResult<Vec<u8>>>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.parse_hex_at(offset))
    }

    fn parse_indirect_header_at(&self, offset: usize) -> ParseTask<Option<ParserResult<Reference>>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.parse_indirect_header_at(offset))
    }

    fn get_dict_bounds_at(&self, offset: usize) -> ParseTask<Option<ParserBounds>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.get_dict_bounds_at(offset))
    }

    fn get_array_bounds_at(&self, offset: usize) -> ParseTask<Option<ParserBounds>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.get_array_bounds_at(offset))
    }

    fn get_literal_bounds_at(&self, offset: usize) -> ParseTask<Option<ParserBounds>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.get_literal_bounds_at(offset))
    }

    fn get_hex_bounds_at(&self, offset: usize) -> ParseTask<Option<ParserBounds>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.get_hex_bounds_at(offset))
    }

    fn get_stream_bounds_at(&self, offset: usize) -> ParseTask<Option<ParserBounds>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.get_stream_bounds_at(offset))
    }

    /// Bounds of whatever value starts at `offset`
    fn get_value_bounds_at(&self, offset: usize) -> ParseTask<Option<ParserBounds>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.get_value_bounds_at(offset))
    }

    fn skip_value_at(&self, offset: usize) -> ParseTask<Option<usize>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.skip_value_at(offset))
    }

    fn skip_to_next_name_at(&self, from: usize, limit: usize) -> ParseTask<Option<usize>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.skip_to_next_name_at(from, limit))
    }

    fn find_bytes_at(&self, needle: &'static [u8], from: usize) -> ParseTask<Option<usize>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.find_bytes_at(needle, from))
    }

    fn find_bytes_backward_at(&self, needle: &'static [u8], from: usize) -> ParseTask<Option<usize>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.find_bytes_backward_at(needle, from))
    }

    /// Copy of the inclusive range `start..=end`
    fn slice_char_codes_at(&self, start: usize, end: usize) -> ParseTask<Vec<u8>> {
        dispatch(self, move |t: &Tokenizer<'_>| t.slice_char_codes_at(start, end))
    }
}

fn dispatch<P, T, F>(parser: &P, op: F) -> ParseTask<T>
where
    P: DataParser + ?Sized,
    T: Send + 'static,
    F: FnOnce(&Tokenizer<'_>) -> T + Send + 'static,
{
    if parser.strategy() == ParserStrategy::Sync {
        return ParseTask::ready(op(&Tokenizer::new(parser.buffer())));
    }

    let (tx, rx) = mpsc::sync_channel(1);
    let job: ParseJob = Box::new(move |t: &Tokenizer<'_>| {
        // receiver may already be gone if the caller lost interest
        let _ = tx.send(op(t));
    });
    if let Err(job) = parser.submit(job) {
        job(&Tokenizer::new(parser.buffer()));
    }
    ParseTask::pending(rx)
}

/// Build a parser over `data`, preferring the background strategy
pub fn get_data_parser(data: impl Into<Arc<[u8]>>, strategy: ParserStrategy) -> Arc<dyn DataParser> {
    let data = data.into();
    if strategy == ParserStrategy::Sync {
        return Arc::new(SyncDataParser::new(data));
    }

    #[cfg(feature = "background-parser")]
    match BgDataParser::spawn(Arc::clone(&data)) {
        Ok(parser) => return Arc::new(parser),
        Err(e) => debug!("Background parser unavailable, using sync parser: {}", e),
    }
    #[cfg(not(feature = "background-parser"))]
    debug!("Background parser not compiled in, using sync parser");

    Arc::new(SyncDataParser::new(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_bounds_ranges() {
        let bounds = ParserBounds::with_content(10, 20, 12, 18);
        assert_eq!(bounds.range(), 10..21);
        assert_eq!(bounds.content_range(), Some(12..19));

        let rebased = bounds.rebased();
        assert_eq!(rebased, ParserBounds::with_content(0, 10, 2, 8));
    }

    #[test]
    fn test_empty_content_range() {
        // "<<>>" at offset 4
        let bounds = ParserBounds::with_content(4, 7, 6, 5);
        assert_eq!(bounds.content_range(), Some(6..6));
    }

    #[test]
    fn test_sync_factory() {
        let parser = get_data_parser(b"1 0 R".to_vec(), ParserStrategy::Sync);
        assert_eq!(parser.strategy(), ParserStrategy::Sync);
        let task = parser.parse_ref_at(0);
        assert!(task.is_ready());
        assert_eq!(task.wait().unwrap().unwrap().value, Reference::new(1, 0));
    }

    #[test]
    fn test_auto_factory_resolves_results() {
        let parser = get_data_parser(b"<< /A 1 >>".to_vec(), ParserStrategy::Auto);
        let bounds = parser.get_dict_bounds_at(0).wait().unwrap().unwrap();
        assert_eq!(bounds.end, 9);
    }

    #[test]
    fn test_join_all_preserves_order() {
        let parser = get_data_parser(b"1 2 3".to_vec(), ParserStrategy::Auto);
        let tasks = vec![
            parser.parse_number_at(4, false, false),
            parser.parse_number_at(0, false, false),
            parser.parse_number_at(2, false, false),
        ];
        let values: Vec<f64> = ParseTask::join_all(tasks)
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap().value)
            .collect();
        assert_eq!(values, vec![3.0, 1.0, 2.0]);
    }
}
