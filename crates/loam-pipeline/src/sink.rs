use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use loam_chunk::Chunk;

/// Fan-out of finished chunks. Every subscriber gets its own unbounded
/// lane, so publishing never blocks the scheduler; lanes whose receiver is
/// gone are dropped at the next publish.
#[derive(Default)]
pub struct ResultSink {
    listeners: Mutex<Vec<Sender<Arc<Chunk>>>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Arc<Chunk>> {
        let (tx, rx) = unbounded();
        self.listeners.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, chunk: &Arc<Chunk>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|tx| tx.send(Arc::clone(chunk)).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}
