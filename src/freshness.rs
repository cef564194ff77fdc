use crate::types::{Cam, Denm};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Single-slot "freshest wins" buffer
///
/// Holds at most one value. Publishing never blocks: an unread value is
/// evicted and replaced. Consuming removes the value, waiting for a publish
/// when the slot is empty.
#[derive(Debug)]
pub struct FreshnessBuffer<T> {
    slot: Mutex<Option<T>>,
    published: Notify,
}

impl<T> FreshnessBuffer<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            published: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // A poisoned slot still holds a valid Option, keep serving it
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `value`, returning the evicted occupant if there was one
    pub fn publish(&self, value: T) -> Option<T> {
        let evicted = self.lock().replace(value);
        self.published.notify_one();
        evicted
    }

    /// Remove and return the held value without waiting
    pub fn try_consume(&self) -> Option<T> {
        self.lock().take()
    }

    /// Remove and return the held value, waiting until one is published
    pub async fn consume(&self) -> T {
        loop {
            let notified = self.published.notified();
            if let Some(value) = self.try_consume() {
                return value;
            }
            notified.await;
        }
    }

    /// Like [`consume`](Self::consume) but gives up after `timeout`
    pub async fn consume_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.consume()).await.ok()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}

impl<T> Default for FreshnessBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The two independent per-kind buffers shared by capture and request handlers
#[derive(Debug, Default)]
pub struct MessageBuffers {
    pub cam: FreshnessBuffer<Cam>,
    pub denm: FreshnessBuffer<Denm>,
}

impl MessageBuffers {
    pub fn new() -> Self {
        Self::default()
    }
}

/// How a request-driven reader waits on an empty buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Wait indefinitely for the next publish
    Blocking,
    /// Wait at most this long
    Bounded(Duration),
}

impl ReadPolicy {
    /// `0` means unbounded
    pub fn from_millis(timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            ReadPolicy::Blocking
        } else {
            ReadPolicy::Bounded(Duration::from_millis(timeout_ms))
        }
    }

    pub async fn read<T>(&self, buffer: &FreshnessBuffer<T>) -> Option<T> {
        match self {
            ReadPolicy::Blocking => Some(buffer.consume().await),
            ReadPolicy::Bounded(timeout) => buffer.consume_timeout(*timeout).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_latest_publish_wins() {
        let buffer = FreshnessBuffer::new();
        assert_eq!(buffer.publish(1), None);
        assert_eq!(buffer.publish(2), Some(1));
        assert_eq!(buffer.publish(3), Some(2));

        assert_eq!(buffer.try_consume(), Some(3));
        assert!(buffer.is_empty());
        assert_eq!(buffer.try_consume(), None);
    }

    #[tokio::test]
    async fn test_consume_returns_pending_value() {
        let buffer = FreshnessBuffer::new();
        buffer.publish("a");
        buffer.publish("b");
        assert_eq!(buffer.consume().await, "b");
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_consume_waits_for_publish() {
        let buffer = Arc::new(FreshnessBuffer::new());
        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.consume().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        buffer.publish(42u32);
        let value = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 42);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_stale_notification_does_not_return_nothing() {
        let buffer = FreshnessBuffer::new();
        // publish leaves a permit behind once its value is taken
        buffer.publish(1);
        assert_eq!(buffer.try_consume(), Some(1));

        let timed_out = buffer.consume_timeout(Duration::from_millis(30)).await;
        assert_eq!(timed_out, None);
    }

    #[tokio::test]
    async fn test_read_policy() {
        let buffer = FreshnessBuffer::new();
        assert_eq!(ReadPolicy::from_millis(0), ReadPolicy::Blocking);

        let bounded = ReadPolicy::from_millis(10);
        assert_eq!(bounded.read(&buffer).await, None);

        buffer.publish(5);
        assert_eq!(ReadPolicy::Blocking.read(&buffer).await, Some(5));
    }
}
