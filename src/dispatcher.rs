//! Coalesces requests submitted in the same scheduling window into one bulk
//! SFU call.
//!
//! Browsers run this over a microtask queue: every synchronous call in one
//! tick lands in the same batch. There is no equivalent queue on a thread
//! pool, so the window is approximated by yielding once and draining
//! whatever else is immediately ready -- wide enough to catch everything a
//! caller fires from the same `tokio::spawn`'d unit of work, without
//! stalling a lone request behind a fixed timer.
//!
//! A batch also flushes as soon as it reaches `capacity`, rather than
//! waiting out the rest of the draining window. Capacity is not a hard
//! ceiling enforced with an error: a caller whose item arrives after the
//! batch is already full simply opens the next batch.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

type Flush<I, O> = Box<dyn Fn(Vec<I>) -> Pin<Box<dyn Future<Output = Vec<O>> + Send>> + Send + Sync>;

pub struct BulkRequestDispatcher<I, O> {
    tx: mpsc::UnboundedSender<(I, oneshot::Sender<O>)>,
}

impl<I, O> BulkRequestDispatcher<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// `capacity` bounds how many items one batch absorbs: once a batch
    /// reaches it, the batch flushes immediately instead of waiting out the
    /// rest of the draining window, and any further item starts a fresh
    /// batch of its own.
    pub fn new<F, Fut>(capacity: usize, flush: F) -> Self
    where
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<O>> + Send + 'static,
    {
        let capacity = capacity.max(1);
        let flush: Flush<I, O> = Box::new(move |items| Box::pin(flush(items)));
        let (tx, mut rx) = mpsc::unbounded_channel::<(I, oneshot::Sender<O>)>();

        tokio::spawn(async move {
            while let Some((item, responder)) = rx.recv().await {
                let mut items = vec![item];
                let mut responders = vec![responder];

                if items.len() < capacity {
                    tokio::task::yield_now().await;
                    while items.len() < capacity {
                        match rx.try_recv() {
                            Ok((item, responder)) => {
                                items.push(item);
                                responders.push(responder);
                            }
                            Err(_) => break,
                        }
                    }
                }

                let results = flush(items).await;
                for (responder, result) in responders.into_iter().zip(results) {
                    let _ = responder.send(result);
                }
            }
        });

        Self { tx }
    }

    pub async fn dispatch(&self, item: I) -> O {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send((item, resp_tx)).ok();
        resp_rx.await.expect("dispatcher task dropped without flushing the batch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn concurrent_dispatches_land_in_one_flush_call() {
        let flush_calls = Arc::new(AtomicU32::new(0));
        let flush_calls_inner = flush_calls.clone();
        let dispatcher: Arc<BulkRequestDispatcher<u32, u32>> =
            Arc::new(BulkRequestDispatcher::new(10, move |items: Vec<u32>| {
                flush_calls_inner.fetch_add(1, Ordering::SeqCst);
                async move { items.into_iter().map(|i| i * 10).collect() }
            }));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move { dispatcher.dispatch(i).await }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        results.sort_unstable();
        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert_eq!(flush_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_dispatches_can_land_in_separate_flushes() {
        let flush_calls = Arc::new(AtomicU32::new(0));
        let flush_calls_inner = flush_calls.clone();
        let dispatcher = BulkRequestDispatcher::new(10, move |items: Vec<u32>| {
            flush_calls_inner.fetch_add(1, Ordering::SeqCst);
            async move { items }
        });

        assert_eq!(dispatcher.dispatch(1).await, 1);
        assert_eq!(dispatcher.dispatch(2).await, 2);
        assert_eq!(flush_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_full_batch_flushes_immediately_and_opens_a_new_one_for_the_overflow() {
        let flush_batches = Arc::new(Mutex::new(Vec::<Vec<u32>>::new()));
        let flush_batches_inner = flush_batches.clone();
        let dispatcher: Arc<BulkRequestDispatcher<u32, u32>> =
            Arc::new(BulkRequestDispatcher::new(2, move |items: Vec<u32>| {
                flush_batches_inner.lock().unwrap().push(items.clone());
                async move { items }
            }));

        let mut handles = Vec::new();
        for i in 0..3u32 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move { dispatcher.dispatch(i).await }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let batches = flush_batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }
}
