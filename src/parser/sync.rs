//! Parser strategy that runs on the caller's thread

use std::fmt;
use std::sync::Arc;

use super::{DataParser, ParseJob, ParserStrategy, Tokenizer};

/// Synchronous parser; always available
#[derive(Clone)]
pub struct SyncDataParser {
    data: Arc<[u8]>,
}

impl SyncDataParser {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl DataParser for SyncDataParser {
    fn buffer(&self) -> &Arc<[u8]> {
        &self.data
    }

    fn strategy(&self) -> ParserStrategy {
        ParserStrategy::Sync
    }

    fn submit(&self, job: ParseJob) -> Result<(), ParseJob> {
        job(&Tokenizer::new(&self.data));
        Ok(())
    }
}

impl fmt::Debug for SyncDataParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncDataParser")
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_tasks_are_ready_immediately() {
        let parser = SyncDataParser::new(b"<< /Type /Page >>".to_vec());
        let task = parser.get_dict_bounds_at(0);
        assert!(task.is_ready());
        let bounds = task.wait().unwrap().unwrap();
        assert_eq!((bounds.start, bounds.end), (0, 16));
    }

    #[test]
    fn test_submit_runs_inline() {
        let parser = SyncDataParser::new(b"abc".to_vec());
        let (tx, rx) = std::sync::mpsc::channel();
        let submitted = parser.submit(Box::new(move |t: &Tokenizer<'_>| tx.send(t.len()).unwrap()));
        assert!(submitted.is_ok());
        assert_eq!(rx.try_recv().unwrap(), 3);
    }
}
