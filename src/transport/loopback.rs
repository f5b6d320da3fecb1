//! In-process transport: every subscription on an `(address, stream)` pair gets
//! its own bounded queue, and the publication copies each fragment into all of
//! them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::core::Result;
use crate::transport::{Publication, SendOutcome, Subscription, Transport};

pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

type Queue = Mutex<VecDeque<Vec<u8>>>;

#[derive(Default)]
struct LoopbackChannel {
    subscribers: Mutex<Vec<(u32, Weak<Queue>)>>,
    publisher_attached: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct LoopbackTransport {
    channels: Arc<Mutex<HashMap<(String, i32), Arc<LoopbackChannel>>>>,
    queue_depth: usize,
    opened_subscriptions: Arc<AtomicUsize>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl LoopbackTransport {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            queue_depth: queue_depth.max(1),
            opened_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Total subscriptions opened through this transport (and its clones).
    pub fn opened_subscriptions(&self) -> usize {
        self.opened_subscriptions.load(Ordering::Acquire)
    }

    fn channel(&self, address: &str, stream_id: i32) -> Arc<LoopbackChannel> {
        let mut channels = lock(&self.channels);
        Arc::clone(
            channels
                .entry((address.to_string(), stream_id))
                .or_default(),
        )
    }
}

impl Transport for LoopbackTransport {
    type Publication = LoopbackPublication;
    type Subscription = LoopbackSubscription;

    fn open_publish_endpoint(&self, address: &str, stream_id: i32) -> Result<LoopbackPublication> {
        let channel = self.channel(address, stream_id);
        channel.publisher_attached.store(true, Ordering::Release);
        Ok(LoopbackPublication {
            channel,
            queue_depth: self.queue_depth,
        })
    }

    fn open_subscribe_endpoint(
        &self,
        address: &str,
        stream_id: i32,
        ordinal: u32,
    ) -> Result<LoopbackSubscription> {
        let channel = self.channel(address, stream_id);
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        lock(&channel.subscribers).push((ordinal, Arc::downgrade(&queue)));
        self.opened_subscriptions.fetch_add(1, Ordering::AcqRel);
        Ok(LoopbackSubscription {
            channel,
            queue,
            ordinal,
        })
    }
}

pub struct LoopbackPublication {
    channel: Arc<LoopbackChannel>,
    queue_depth: usize,
}

impl Publication for LoopbackPublication {
    fn is_connected(&self) -> bool {
        let mut subscribers = lock(&self.channel.subscribers);
        subscribers.retain(|(_, queue)| queue.strong_count() > 0);
        !subscribers.is_empty()
    }

    fn try_send(&mut self, payload: &[u8]) -> Result<SendOutcome> {
        let mut subscribers = lock(&self.channel.subscribers);
        subscribers.retain(|(_, queue)| queue.strong_count() > 0);
        let queues: Vec<Arc<Queue>> = subscribers
            .iter()
            .filter_map(|(_, queue)| queue.upgrade())
            .collect();
        if queues.is_empty() {
            return Ok(SendOutcome::NotConnected);
        }
        if queues.iter().any(|queue| lock(queue).len() >= self.queue_depth) {
            return Ok(SendOutcome::Congested);
        }
        for queue in queues {
            lock(&queue).push_back(payload.to_vec());
        }
        Ok(SendOutcome::Sent)
    }
}

impl Drop for LoopbackPublication {
    fn drop(&mut self) {
        self.channel
            .publisher_attached
            .store(false, Ordering::Release);
    }
}

pub struct LoopbackSubscription {
    channel: Arc<LoopbackChannel>,
    queue: Arc<Queue>,
    ordinal: u32,
}

impl LoopbackSubscription {
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

impl Subscription for LoopbackSubscription {
    fn is_connected(&self) -> bool {
        self.channel.publisher_attached.load(Ordering::Acquire)
    }

    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]), max_fragments: usize) -> usize {
        let mut handled = 0;
        while handled < max_fragments {
            let Some(fragment) = lock(&self.queue).pop_front() else {
                break;
            };
            handler(&fragment);
            handled += 1;
        }
        handled
    }
}
