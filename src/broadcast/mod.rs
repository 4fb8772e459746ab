//! Publisher/subscriber registry and media fan-out
//!
//! The broadcaster is the only state shared across connections. It maps
//! each stream key to its single live publisher entry: the subscriber set
//! and the cached AAC/AVC sequence headers late-joining players need
//! before any sample frame is decodable.
//!
//! ```text
//!                       Arc<Broadcaster>
//!              ┌───────────────────────────────┐
//!              │ streams: RwLock<HashMap<      │
//!              │   stream_key,                 │
//!              │   Arc<RwLock<StreamEntry>>>>  │
//!              └──────────────┬────────────────┘
//!                             │
//!        ┌────────────────────┼────────────────────┐
//!        ▼                    ▼                    ▼
//!   [publisher]          [subscriber]         [subscriber]
//!   broadcast_video()    queue.recv()         queue.recv()
//!        │                    │                    │
//!        └── try_send ───► bounded mpsc ───► session writes to TCP
//! ```
//!
//! Fan-out snapshots the subscriber handles under a read lock, releases,
//! then delivers with `try_send`: a slow subscriber never blocks the
//! publisher. A full queue drops that subscriber instead.
//!
//! `Bytes` payloads are reference-counted, so fanning a frame out to N
//! subscribers copies nothing.

pub mod guard;

pub use guard::SessionGuard;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::amf::Metadata;
use crate::error::BroadcastError;
use crate::protocol::constants::SUBSCRIBER_QUEUE_CAPACITY;

/// An event delivered to a subscriber's queue.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Audio payload, tag byte included, with the publisher's timestamp.
    Audio { payload: Bytes, timestamp: u32 },
    /// Video payload, tag byte included, with the publisher's timestamp.
    Video { payload: Bytes, timestamp: u32 },
    /// Stream metadata (`onMetaData`), unknown keys preserved.
    Metadata(Metadata),
    /// The publisher is gone; the subscriber should be told the stream
    /// stopped.
    EndOfStream,
}

/// A subscriber's registration: its session id plus the sending side of
/// its bounded frame queue.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    session_id: String,
    tx: mpsc::Sender<StreamEvent>,
}

impl SubscriberHandle {
    /// Create a handle and the receiving side for the subscriber session.
    pub fn new(session_id: impl Into<String>) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        (
            Self {
                session_id: session_id.into(),
                tx,
            },
            rx,
        )
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Per-stream-key state while a publisher is live.
#[derive(Default)]
struct StreamEntry {
    /// Subscribers keyed by session id; re-registering replaces the prior
    /// handle.
    subscribers: HashMap<String, SubscriberHandle>,
    /// Cached AAC decoder configuration frame.
    aac_sequence_header: Option<Bytes>,
    /// Cached AVC decoder configuration frame.
    avc_sequence_header: Option<Bytes>,
}

/// Registry of publishers and subscribers, shared by every session.
pub struct Broadcaster {
    app_name: String,
    streams: RwLock<HashMap<String, Arc<RwLock<StreamEntry>>>>,
    session_guard: std::sync::RwLock<Option<Arc<dyn SessionGuard>>>,
}

impl Broadcaster {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            streams: RwLock::new(HashMap::new()),
            session_guard: std::sync::RwLock::new(None),
        }
    }

    /// The single application name this relay accepts on `connect`.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Install the publish-admission guard.
    pub fn set_session_guard(&self, guard: Arc<dyn SessionGuard>) {
        *self.session_guard.write().unwrap() = Some(guard);
    }

    pub fn session_guard(&self) -> Option<Arc<dyn SessionGuard>> {
        self.session_guard.read().unwrap().clone()
    }

    /// Claim a stream key for a new publisher.
    ///
    /// At most one publisher may hold a key at a time.
    pub async fn register_publisher(&self, stream_key: &str) -> Result<(), BroadcastError> {
        let mut streams = self.streams.write().await;
        if streams.contains_key(stream_key) {
            return Err(BroadcastError::AlreadyPublishing(stream_key.to_string()));
        }
        streams.insert(
            stream_key.to_string(),
            Arc::new(RwLock::new(StreamEntry::default())),
        );
        tracing::info!(stream_key, "publisher registered");
        Ok(())
    }

    /// Remove a publisher entry, its subscriber set and cached headers.
    ///
    /// Callers broadcast end-of-stream *before* this; dropping the entry
    /// closes every remaining subscriber queue.
    pub async fn destroy_publisher(&self, stream_key: &str) {
        let removed = self.streams.write().await.remove(stream_key);
        match removed {
            Some(_) => tracing::info!(stream_key, "publisher destroyed"),
            None => tracing::debug!(stream_key, "destroy for unknown publisher"),
        }
    }

    /// Attach a subscriber to a live stream.
    ///
    /// Fails with [`BroadcastError::StreamNotFound`] when no publisher
    /// holds the key. Idempotent per session id: re-registering replaces
    /// the previous handle.
    pub async fn register_subscriber(
        &self,
        stream_key: &str,
        subscriber: SubscriberHandle,
    ) -> Result<(), BroadcastError> {
        let streams = self.streams.read().await;
        let entry = streams
            .get(stream_key)
            .ok_or_else(|| BroadcastError::StreamNotFound(stream_key.to_string()))?;

        let mut entry = entry.write().await;
        let session_id = subscriber.session_id.clone();
        entry.subscribers.insert(session_id.clone(), subscriber);
        tracing::info!(
            stream_key,
            session_id = %session_id,
            subscribers = entry.subscribers.len(),
            "subscriber registered"
        );
        Ok(())
    }

    /// Detach a subscriber; no-op if the key or session is unknown.
    pub async fn destroy_subscriber(&self, stream_key: &str, session_id: &str) {
        let streams = self.streams.read().await;
        if let Some(entry) = streams.get(stream_key) {
            let mut entry = entry.write().await;
            if entry.subscribers.remove(session_id).is_some() {
                tracing::debug!(stream_key, session_id, "subscriber destroyed");
            }
        }
    }

    /// Whether a publisher currently holds the key.
    pub async fn stream_exists(&self, stream_key: &str) -> bool {
        self.streams.read().await.contains_key(stream_key)
    }

    /// Cache the AVC decoder configuration for late joiners.
    pub async fn set_avc_sequence_header(&self, stream_key: &str, payload: Bytes) {
        let streams = self.streams.read().await;
        if let Some(entry) = streams.get(stream_key) {
            entry.write().await.avc_sequence_header = Some(payload);
            tracing::debug!(stream_key, "avc sequence header cached");
        }
    }

    /// Cache the AAC decoder configuration for late joiners.
    pub async fn set_aac_sequence_header(&self, stream_key: &str, payload: Bytes) {
        let streams = self.streams.read().await;
        if let Some(entry) = streams.get(stream_key) {
            entry.write().await.aac_sequence_header = Some(payload);
            tracing::debug!(stream_key, "aac sequence header cached");
        }
    }

    /// Snapshot of the cached AVC sequence header.
    pub async fn avc_sequence_header(&self, stream_key: &str) -> Option<Bytes> {
        let streams = self.streams.read().await;
        let entry = streams.get(stream_key)?;
        let entry = entry.read().await;
        entry.avc_sequence_header.clone()
    }

    /// Snapshot of the cached AAC sequence header.
    pub async fn aac_sequence_header(&self, stream_key: &str) -> Option<Bytes> {
        let streams = self.streams.read().await;
        let entry = streams.get(stream_key)?;
        let entry = entry.read().await;
        entry.aac_sequence_header.clone()
    }

    /// Fan an audio frame out to every subscriber.
    pub async fn broadcast_audio(&self, stream_key: &str, payload: Bytes, timestamp: u32) {
        self.broadcast(stream_key, StreamEvent::Audio { payload, timestamp })
            .await;
    }

    /// Fan a video frame out to every subscriber.
    pub async fn broadcast_video(&self, stream_key: &str, payload: Bytes, timestamp: u32) {
        self.broadcast(stream_key, StreamEvent::Video { payload, timestamp })
            .await;
    }

    /// Fan stream metadata out to every subscriber.
    pub async fn broadcast_metadata(&self, stream_key: &str, metadata: Metadata) {
        self.broadcast(stream_key, StreamEvent::Metadata(metadata))
            .await;
    }

    /// Tell every subscriber the stream ended. Called before
    /// [`destroy_publisher`](Self::destroy_publisher).
    pub async fn broadcast_end_of_stream(&self, stream_key: &str) {
        self.broadcast(stream_key, StreamEvent::EndOfStream).await;
    }

    /// Deliver an event to the current subscriber set.
    ///
    /// Handles are snapshotted under the read lock and the lock released
    /// before delivery. Send failures are logged and the offending
    /// subscriber is dropped; the fan-out continues for the rest.
    async fn broadcast(&self, stream_key: &str, event: StreamEvent) {
        let handles: Vec<SubscriberHandle> = {
            let streams = self.streams.read().await;
            let Some(entry) = streams.get(stream_key) else {
                return;
            };
            let entry = entry.read().await;
            entry.subscribers.values().cloned().collect()
        };

        let mut dropped: Vec<String> = Vec::new();
        for handle in &handles {
            if let Err(e) = handle.tx.try_send(event.clone()) {
                tracing::warn!(
                    stream_key,
                    session_id = %handle.session_id,
                    error = %e,
                    "dropping slow subscriber"
                );
                dropped.push(handle.session_id.clone());
            }
        }

        for session_id in dropped {
            self.destroy_subscriber(stream_key, &session_id).await;
        }
    }

    /// Number of subscribers currently attached to a stream.
    pub async fn subscriber_count(&self, stream_key: &str) -> usize {
        let streams = self.streams.read().await;
        match streams.get(stream_key) {
            Some(entry) => entry.read().await.subscribers.len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_publisher_per_key() {
        let b = Broadcaster::new("app");
        b.register_publisher("live").await.unwrap();

        let err = b.register_publisher("live").await.unwrap_err();
        assert!(matches!(err, BroadcastError::AlreadyPublishing(_)));

        // A different key is free.
        b.register_publisher("other").await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_frees_the_key() {
        let b = Broadcaster::new("app");
        b.register_publisher("live").await.unwrap();
        b.destroy_publisher("live").await;
        assert!(!b.stream_exists("live").await);
        b.register_publisher("live").await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_requires_publisher() {
        let b = Broadcaster::new("app");
        let (handle, _rx) = SubscriberHandle::new("s1");
        let err = b.register_subscriber("nope", handle).await.unwrap_err();
        assert!(matches!(err, BroadcastError::StreamNotFound(_)));

        // After destroy, the same error returns until a new publisher
        // registers.
        b.register_publisher("live").await.unwrap();
        b.destroy_publisher("live").await;
        let (handle, _rx) = SubscriberHandle::new("s1");
        let err = b.register_subscriber("live", handle).await.unwrap_err();
        assert!(matches!(err, BroadcastError::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn test_subscriber_reregistration_replaces() {
        let b = Broadcaster::new("app");
        b.register_publisher("live").await.unwrap();

        let (h1, mut rx1) = SubscriberHandle::new("s1");
        b.register_subscriber("live", h1).await.unwrap();
        let (h2, mut rx2) = SubscriberHandle::new("s1");
        b.register_subscriber("live", h2).await.unwrap();
        assert_eq!(b.subscriber_count("live").await, 1);

        b.broadcast_audio("live", Bytes::from_static(&[0xAF, 0x01]), 10)
            .await;

        // Only the replacement receives; the stale queue is closed.
        assert!(matches!(
            rx2.recv().await,
            Some(StreamEvent::Audio { timestamp: 10, .. })
        ));
        assert!(rx1.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fanout_order_and_isolation() {
        let b = Broadcaster::new("app");
        b.register_publisher("live").await.unwrap();

        let (h1, mut rx1) = SubscriberHandle::new("s1");
        let (h2, mut rx2) = SubscriberHandle::new("s2");
        b.register_subscriber("live", h1).await.unwrap();
        b.register_subscriber("live", h2).await.unwrap();

        b.broadcast_video("live", Bytes::from_static(&[0x17, 0x00]), 0)
            .await;
        b.broadcast_video("live", Bytes::from_static(&[0x17, 0x01]), 33)
            .await;

        for rx in [&mut rx1, &mut rx2] {
            let StreamEvent::Video { timestamp, .. } = rx.recv().await.unwrap() else {
                panic!("expected video");
            };
            assert_eq!(timestamp, 0);
            let StreamEvent::Video { timestamp, .. } = rx.recv().await.unwrap() else {
                panic!("expected video");
            };
            assert_eq!(timestamp, 33);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped_without_blocking() {
        let b = Broadcaster::new("app");
        b.register_publisher("live").await.unwrap();

        let (slow, _rx_kept_full) = SubscriberHandle::new("slow");
        let (fast, mut fast_rx) = SubscriberHandle::new("fast");
        b.register_subscriber("live", slow).await.unwrap();
        b.register_subscriber("live", fast).await.unwrap();

        // Overflow the slow subscriber's queue; the fast one keeps
        // draining.
        let payload = Bytes::from_static(&[0x27, 0x01]);
        for i in 0..(SUBSCRIBER_QUEUE_CAPACITY as u32 + 2) {
            b.broadcast_video("live", payload.clone(), i).await;
            // Drain the fast subscriber so only the slow one backs up.
            while let Ok(_ev) = fast_rx.try_recv() {}
        }

        assert_eq!(b.subscriber_count("live").await, 1);
    }

    #[tokio::test]
    async fn test_sequence_header_cache() {
        let b = Broadcaster::new("app");

        // Setting a header for an unknown key is a no-op.
        b.set_avc_sequence_header("live", Bytes::from_static(&[0x17, 0x00]))
            .await;
        assert!(b.avc_sequence_header("live").await.is_none());

        b.register_publisher("live").await.unwrap();
        b.set_avc_sequence_header("live", Bytes::from_static(&[0x17, 0x00, 0x01]))
            .await;
        b.set_aac_sequence_header("live", Bytes::from_static(&[0xAF, 0x00, 0x12]))
            .await;

        assert_eq!(
            b.avc_sequence_header("live").await.unwrap().as_ref(),
            &[0x17, 0x00, 0x01]
        );
        assert_eq!(
            b.aac_sequence_header("live").await.unwrap().as_ref(),
            &[0xAF, 0x00, 0x12]
        );

        // Destroying the publisher clears the caches with the entry.
        b.destroy_publisher("live").await;
        b.register_publisher("live").await.unwrap();
        assert!(b.avc_sequence_header("live").await.is_none());
        assert!(b.aac_sequence_header("live").await.is_none());
    }

    #[tokio::test]
    async fn test_end_of_stream_reaches_subscribers() {
        let b = Broadcaster::new("app");
        b.register_publisher("live").await.unwrap();

        let (h1, mut rx1) = SubscriberHandle::new("s1");
        b.register_subscriber("live", h1).await.unwrap();

        b.broadcast_end_of_stream("live").await;
        b.destroy_publisher("live").await;

        assert!(matches!(rx1.recv().await, Some(StreamEvent::EndOfStream)));
        // Entry dropped: the queue closes afterwards.
        assert!(rx1.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_metadata_fanout() {
        let b = Broadcaster::new("app");
        b.register_publisher("live").await.unwrap();

        let (h1, mut rx1) = SubscriberHandle::new("s1");
        b.register_subscriber("live", h1).await.unwrap();

        let meta = Metadata::from_value(&crate::amf_object! {
            "width" => 1280.0,
            "customKey" => "kept",
        })
        .unwrap();
        b.broadcast_metadata("live", meta).await;

        let StreamEvent::Metadata(meta) = rx1.recv().await.unwrap() else {
            panic!("expected metadata");
        };
        assert_eq!(meta.get_number("width"), Some(1280.0));
        assert_eq!(meta.get_str("customkey"), Some("kept"));
    }
}
