//! Parser strategy that runs on a dedicated worker thread

use std::fmt;
use std::io;
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{trace, warn};

use super::{DataParser, ParseJob, ParserStrategy, Tokenizer};

const QUEUE_DEPTH: usize = 64;

/// Background parser owning one worker thread
///
/// Jobs are executed in submission order. If the worker is gone, jobs run
/// inline on the caller's thread so results stay identical.
pub struct BgDataParser {
    data: Arc<[u8]>,
    sender: Option<SyncSender<ParseJob>>,
    worker: Option<JoinHandle<()>>,
}

impl BgDataParser {
    /// Spawn the worker thread for `data`
    pub fn spawn(data: Arc<[u8]>) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<ParseJob>(QUEUE_DEPTH);
        let worker_data = Arc::clone(&data);
        let worker = thread::Builder::new()
            .name("pdf-cos-parser".to_string())
            .spawn(move || {
                let tokenizer = Tokenizer::new(&worker_data);
                for job in rx {
                    job(&tokenizer);
                }
                trace!("Parser worker exiting");
            })?;

        Ok(Self {
            data,
            sender: Some(tx),
            worker: Some(worker),
        })
    }
}

impl DataParser for BgDataParser {
    fn buffer(&self) -> &Arc<[u8]> {
        &self.data
    }

    fn strategy(&self) -> ParserStrategy {
        ParserStrategy::Background
    }

    fn submit(&self, job: ParseJob) -> Result<(), ParseJob> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|e| {
                warn!("Parser worker unavailable, running job inline");
                e.0
            }),
            None => Err(job),
        }
    }
}

impl Drop for BgDataParser {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Parser worker panicked");
            }
        }
    }
}

impl fmt::Debug for BgDataParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BgDataParser")
            .field("len", &self.data.len())
            .field("running", &self.sender.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::Reference;
    use test_log::test;

    #[test]
    fn test_results_come_from_worker() {
        let parser = BgDataParser::spawn(Arc::from(&b"[1 0 R 2 0 R]"[..])).unwrap();
        let task = parser.parse_ref_array_at(0);
        assert!(!task.is_ready());
        let refs = task.wait().unwrap().unwrap().value;
        assert_eq!(refs, vec![Reference::new(1, 0), Reference::new(2, 0)]);
    }

    #[test]
    fn test_dropped_task_does_not_block_worker() {
        let parser = BgDataParser::spawn(Arc::from(&b"(abc) (def)"[..])).unwrap();
        drop(parser.parse_literal_at(0));
        let second = parser.parse_literal_at(5).wait().unwrap().unwrap();
        assert_eq!(second.value, b"def".to_vec());
    }

    #[test]
    fn test_many_concurrent_tasks() {
        let data: Vec<u8> = (0..200).map(|i| format!("{} ", i)).collect::<String>().into_bytes();
        let parser = BgDataParser::spawn(Arc::from(data.clone())).unwrap();
        let mut offsets = Vec::new();
        let mut pos = 0;
        for i in 0..200 {
            offsets.push(pos);
            pos += format!("{} ", i).len();
        }
        let tasks: Vec<_> = offsets
            .iter()
            .map(|&o| parser.parse_number_at(o, false, false))
            .collect();
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.wait().unwrap().unwrap().value, i as f64);
        }
    }
}
