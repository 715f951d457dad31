use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool over a shared job queue. Flushes, compactions and
/// reclamation all run here. Dropping the pool closes the queue and joins
/// every worker, so in-flight jobs finish before shutdown completes.
pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(worker_num: usize) -> Self {
        assert!(worker_num >= 1, "pool needs at least one worker");
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..worker_num)
            .map(|_| {
                let receiver = receiver.clone();
                thread::spawn(move || worker_loop(receiver))
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            // send only fails once the pool is shutting down; jobs submitted
            // past that point are dropped on purpose.
            let _ = sender.send(Box::new(job));
        }
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        job();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
