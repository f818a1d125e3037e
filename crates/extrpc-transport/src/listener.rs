//! Listener registration and native response handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Poll;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{TransportError, TransportResult};

/// What a listener did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The message was not for this listener; it will not respond.
    NotHandled,
    /// The listener consumed the message (and responded synchronously, if
    /// it had anything to say).
    Handled,
    /// The listener will respond later; the response channel must stay open.
    RespondLater,
}

/// A message delivered to a listener.
#[derive(Debug)]
pub struct Inbound {
    /// The raw message.
    pub message: Value,
    /// Response handle, present on native transports only.
    pub responder: Option<Responder>,
}

/// A listener callback.
pub type Listener = Arc<dyn Fn(Inbound) -> Disposition + Send + Sync>;

/// Wraps a closure into a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(Inbound) -> Disposition + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identifies an installed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Response handle for one native message.
///
/// Clones share one slot: the first `respond` wins, later ones fail with
/// [`TransportError::ResponseChannelClosed`]. When every clone is dropped
/// without responding, the sender sees [`TransportError::NoResponse`].
#[derive(Debug, Clone)]
pub struct Responder {
    slot: Arc<Mutex<Option<oneshot::Sender<Value>>>>,
}

impl Responder {
    /// Creates a responder and the receiver its response arrives on.
    pub(crate) fn pair() -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        let responder = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (responder, rx)
    }

    /// Creates a responder for a message nobody awaits.
    pub(crate) fn detached() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Sends the response.
    pub fn respond(&self, value: Value) -> TransportResult<()> {
        let sender = self.lock().take();
        match sender {
            Some(tx) => tx
                .send(value)
                .map_err(|_| TransportError::ResponseChannelClosed),
            None => Err(TransportError::ResponseChannelClosed),
        }
    }

    /// Returns true if a response can still be delivered.
    pub fn is_open(&self) -> bool {
        self.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Resolves once the requester stops waiting, or at once if this handle
    /// can no longer respond.
    ///
    /// A `respond` through another clone does not wake a pending `closed`.
    pub async fn closed(&self) {
        std::future::poll_fn(|cx| match self.lock().as_mut() {
            Some(tx) => tx.poll_closed(cx),
            None => Poll::Ready(()),
        })
        .await
    }

    /// Closes the channel without responding.
    pub(crate) fn close(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<oneshot::Sender<Value>>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Listeners installed on one transport.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Copies the current listeners so callbacks run without the lock held;
    /// a listener may add or remove listeners while being called.
    pub(crate) fn snapshot(&self) -> Vec<Listener> {
        self.lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn first_response_wins() {
        let (responder, rx) = Responder::pair();
        let clone = responder.clone();

        assert!(responder.is_open());
        responder.respond(json!(1)).unwrap();
        assert_eq!(
            clone.respond(json!(2)),
            Err(TransportError::ResponseChannelClosed)
        );
        assert!(!clone.is_open());
        assert_eq!(rx.await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn dropping_every_clone_closes_the_channel() {
        let (responder, rx) = Responder::pair();
        let clone = responder.clone();
        drop(responder);
        drop(clone);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn closed_resolves_when_the_requester_gives_up() {
        let (responder, rx) = Responder::pair();
        let watcher = tokio::spawn({
            let responder = responder.clone();
            async move { responder.closed().await }
        });
        tokio::task::yield_now().await;
        assert!(!watcher.is_finished());

        drop(rx);
        watcher.await.unwrap();
        assert!(!responder.is_open());
    }

    #[test]
    fn detached_responder_is_closed() {
        let responder = Responder::detached();
        assert!(!responder.is_open());
        assert!(responder.respond(json!(null)).is_err());
    }

    #[test]
    fn listener_set_add_remove() {
        let set = ListenerSet::default();
        let a = set.add(listener(|_| Disposition::NotHandled));
        let b = set.add(listener(|_| Disposition::Handled));
        assert_ne!(a, b);
        assert_eq!(set.snapshot().len(), 2);

        assert!(set.remove(a));
        assert!(!set.remove(a));
        assert_eq!(set.len(), 1);
    }
}
