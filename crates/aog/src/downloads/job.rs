//! Progress fan-out for download jobs
//!
//! A single producer publishes ordered progress frames to any number of
//! subscribers. Every subscriber has its own bounded queue with drop-oldest
//! overflow, so a slow reader can never stall the downloader; the terminal
//! frame is always delivered because it is published last and overflow only
//! evicts from the front.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::Stream;
use tokio::sync::Notify;

use super::ProgressFrame;

pub struct ProgressFanout {
    capacity: usize,
    subscribers: std::sync::Mutex<Vec<Arc<SubscriberQueue>>>,
}

impl ProgressFanout {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            subscribers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Attach a new subscriber receiving every frame from now on.
    pub fn subscribe(&self) -> ProgressSubscription {
        let queue = Arc::new(SubscriberQueue::new(self.capacity));
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(queue.clone());
        ProgressSubscription { queue }
    }

    /// Publish one frame to all live subscribers, detaching closed ones.
    pub fn publish(&self, frame: ProgressFrame) {
        let mut subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        subscribers.retain(|queue| !queue.closed.load(Ordering::SeqCst));
        for queue in subscribers.iter() {
            queue.push(frame.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .len()
    }
}

struct SubscriberQueue {
    frames: std::sync::Mutex<VecDeque<ProgressFrame>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: std::sync::Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, frame: ProgressFrame) {
        {
            let mut frames = self.frames.lock().expect("frame queue poisoned");
            while frames.len() >= self.capacity {
                frames.pop_front();
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    async fn pop(&self) -> ProgressFrame {
        loop {
            if let Some(frame) = self
                .frames
                .lock()
                .expect("frame queue poisoned")
                .pop_front()
            {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

/// One subscriber's view of the job's progress.
pub struct ProgressSubscription {
    queue: Arc<SubscriberQueue>,
}

impl ProgressSubscription {
    /// Consume as a stream; ends after the terminal frame.
    pub fn into_stream(self) -> impl Stream<Item = ProgressFrame> + Send {
        async_stream::stream! {
            loop {
                let frame = self.queue.pop().await;
                let terminal = frame.is_terminal();
                yield frame;
                if terminal {
                    break;
                }
            }
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.queue.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn every_subscriber_sees_ordered_frames() {
        let fanout = ProgressFanout::new(16);
        let a = fanout.subscribe();
        let b = fanout.subscribe();

        fanout.publish(ProgressFrame::status("pulling a"));
        fanout.publish(ProgressFrame::status("pulling b"));
        fanout.publish(ProgressFrame::success());

        for sub in [a, b] {
            let frames: Vec<_> = sub.into_stream().collect().await;
            assert_eq!(frames.len(), 3);
            assert_eq!(frames[0].status, "pulling a");
            assert_eq!(frames[1].status, "pulling b");
            assert!(frames[2].is_terminal());
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_but_keeps_terminal() {
        let fanout = ProgressFanout::new(2);
        let sub = fanout.subscribe();

        for index in 0..10 {
            fanout.publish(ProgressFrame::status(format!("pulling {index}")));
        }
        fanout.publish(ProgressFrame::success());

        let frames: Vec<_> = sub.into_stream().collect().await;
        // Bounded queue: only the freshest survive, terminal frame last.
        assert!(frames.len() <= 2);
        assert!(frames.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_detached() {
        let fanout = ProgressFanout::new(4);
        let sub = fanout.subscribe();
        drop(sub);
        fanout.publish(ProgressFrame::status("pulling x"));
        assert_eq!(fanout.subscriber_count(), 0);
    }
}
