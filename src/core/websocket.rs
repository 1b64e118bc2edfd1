/// Connection actor: one per physical connection, with a dedicated read loop
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::core::network::{Conn, Message, MessageKind};
use crate::error::Result;

/// Handler invoked with the raw `data` of an inbound message.
pub type Action = Arc<dyn Fn(String) + Send + Sync>;

/// Read-side tuning of a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline set on the stream before every read.
    pub read_timeout: Duration,
    /// Failed reads tolerated in a row before the connection is given up.
    pub retry_count: u32,
    /// Pause between a failed read and the next attempt.
    pub retry_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(120),
            retry_count: 3,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// A logical session over one message connection.
///
/// Inbound messages are dispatched by kind to registered actions, strictly
/// in arrival order. Actions run on the read loop and must not block; any
/// slow work is spawned by the action itself.
pub struct Client {
    id: String,
    conn: Arc<dyn Conn>,
    options: ClientOptions,
    actions: RwLock<HashMap<MessageKind, Action>>,
    close_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Client {
    /// Creates a handle for `conn`. Nothing is read until [`Client::start`].
    pub fn new(conn: Arc<dyn Conn>, options: ClientOptions) -> Arc<Self> {
        let id = client_id(&conn.remote_addr(), SystemTime::now());
        Arc::new(Self {
            id,
            conn,
            options,
            actions: RwLock::new(HashMap::new()),
            close_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawns the read loop. It runs until the retry budget is exhausted or
    /// the client is closed, and closes the client on its way out.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).read_loop())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Registers `action` for `kind`. The last registration for a kind wins.
    pub fn on_message<F>(&self, kind: MessageKind, action: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(action));
    }

    /// Writes one message. Transport errors are handed back untouched.
    pub async fn send_message(&self, kind: MessageKind, data: impl Into<String>) -> Result<()> {
        self.conn.write_message(&Message::new(kind, data)).await
    }

    /// Closes the connection once and fires the `disconnect` action.
    ///
    /// Only the first caller sees the error of the underlying close, later
    /// calls return `Ok(())`. Actions are dropped afterwards.
    pub async fn close(&self) -> Result<()> {
        let result = {
            let _guard = self.close_lock.lock().await;
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            self.conn.close().await
        };
        self.dispatch(MessageKind::Disconnect, String::new());
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        result
    }

    /// Runs the action registered for `kind`, if any.
    pub fn dispatch(&self, kind: MessageKind, data: String) {
        let action = self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();
        if let Some(action) = action {
            trace!(client = %self.id, %kind, "invoking action");
            action(data);
            trace!(client = %self.id, %kind, "invoking action is done");
        }
    }

    async fn read_loop(self: Arc<Self>) {
        let mut retries = 0;
        loop {
            if self.is_closed() {
                break;
            }
            let deadline = Instant::now() + self.options.read_timeout;
            if let Err(e) = self.conn.set_read_deadline(deadline).await {
                debug!(client = %self.id, error = %e, "cannot set read deadline");
                break;
            }
            match self.conn.read_message().await {
                Ok(message) => {
                    retries = 0;
                    match message.kind() {
                        Some(kind) => self.dispatch(kind, message.data),
                        None => trace!(client = %self.id, name = %message.name, "ignoring unknown message"),
                    }
                }
                Err(e) => {
                    if retries == self.options.retry_count {
                        debug!(client = %self.id, error = %e, "giving up on connection");
                        break;
                    }
                    debug!(client = %self.id, error = %e, retries, "error reading message, retrying");
                    tokio::time::sleep(self.options.retry_interval).await;
                    retries += 1;
                }
            }
        }

        if let Err(e) = self.close().await {
            warn!(client = %self.id, error = %e, "error closing client");
        }
    }
}

/// URL-safe token derived from the remote address and the creation time.
fn client_id(remote: &str, created: SystemTime) -> String {
    let nanos = created
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{remote}{nanos}").as_bytes());
    URL_SAFE.encode(digest)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{mpsc, Notify};

    /// Scripted [`Conn`]: serves queued reads, then fails (or hangs) forever.
    pub(crate) struct FakeConn {
        reads: StdMutex<VecDeque<Result<Message>>>,
        hang_when_empty: bool,
        fail_deadline: AtomicBool,
        pub(crate) read_calls: AtomicUsize,
        pub(crate) close_calls: AtomicUsize,
        close_error: StdMutex<Option<Error>>,
        write_error: StdMutex<Option<Error>>,
        pub(crate) written: StdMutex<Vec<Message>>,
        pub(crate) closed: Notify,
    }

    impl FakeConn {
        pub(crate) fn failing() -> Self {
            Self::new(false)
        }

        pub(crate) fn idle() -> Self {
            Self::new(true)
        }

        fn new(hang_when_empty: bool) -> Self {
            Self {
                reads: StdMutex::new(VecDeque::new()),
                hang_when_empty,
                fail_deadline: AtomicBool::new(false),
                read_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                close_error: StdMutex::new(None),
                write_error: StdMutex::new(None),
                written: StdMutex::new(Vec::new()),
                closed: Notify::new(),
            }
        }

        pub(crate) fn push_read(&self, read: Result<Message>) {
            self.reads.lock().unwrap().push_back(read);
        }

        fn fail_deadline(&self) {
            self.fail_deadline.store(true, Ordering::SeqCst);
        }

        fn fail_close_with(&self, error: Error) {
            *self.close_error.lock().unwrap() = Some(error);
        }

        fn fail_write_with(&self, error: Error) {
            *self.write_error.lock().unwrap() = Some(error);
        }

        pub(crate) async fn wait_closed(&self) {
            tokio::time::timeout(Duration::from_secs(5), self.closed.notified())
                .await
                .expect("connection was not closed");
        }
    }

    #[async_trait]
    impl Conn for FakeConn {
        async fn set_read_deadline(&self, _deadline: Instant) -> Result<()> {
            if self.fail_deadline.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            Ok(())
        }

        async fn write_message(&self, message: &Message) -> Result<()> {
            if let Some(e) = self.write_error.lock().unwrap().take() {
                return Err(e);
            }
            self.written.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn read_message(&self) -> Result<Message> {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.reads.lock().unwrap().pop_front();
            match next {
                Some(read) => read,
                None if self.hang_when_empty => std::future::pending().await,
                None => Err(Error::Closed),
            }
        }

        fn remote_addr(&self) -> String {
            "addr".to_string()
        }

        async fn close(&self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.notify_one();
            match self.close_error.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn quick(retry_count: u32) -> ClientOptions {
        ClientOptions {
            read_timeout: Duration::from_secs(1),
            retry_count,
            retry_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_client_id_is_url_safe_and_time_dependent() {
        let at = UNIX_EPOCH + Duration::from_nanos(42);
        let id = client_id("127.0.0.1:9000", at);
        assert!(!id.is_empty());
        assert!(!id.contains('+') && !id.contains('/'));
        assert_eq!(id, client_id("127.0.0.1:9000", at));
        assert_ne!(id, client_id("127.0.0.1:9000", at + Duration::from_nanos(1)));
    }

    #[tokio::test]
    async fn test_send_message_writes_envelope() {
        let conn = Arc::new(FakeConn::idle());
        let client = Client::new(conn.clone(), quick(3));

        client.send_message(MessageKind::Name, "data").await.unwrap();

        let written = conn.written.lock().unwrap().clone();
        assert_eq!(written, vec![Message::new(MessageKind::Name, "data")]);
    }

    #[tokio::test]
    async fn test_send_message_returns_transport_error() {
        let conn = Arc::new(FakeConn::idle());
        conn.fail_write_with(Error::Closed);
        let client = Client::new(conn.clone(), quick(3));

        let err = client.send_message(MessageKind::Tell, "will error").await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn test_registered_action_receives_payload() {
        let conn = Arc::new(FakeConn::idle());
        conn.push_read(Ok(Message {
            name: "chat".to_string(),
            data: "ignored".to_string(),
        }));
        conn.push_read(Ok(Message::new(MessageKind::Name, "Ω")));
        let client = Client::new(conn.clone(), quick(3));
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on_message(MessageKind::Name, move |data| {
            let _ = tx.send(data);
        });
        client.start();

        let data = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data, "Ω");
    }

    #[tokio::test]
    async fn test_broken_connection_is_closed_and_disconnect_fires() {
        let conn = Arc::new(FakeConn::failing());
        let client = Client::new(conn.clone(), quick(0));
        let disconnected = Arc::new(Notify::new());
        let notify = disconnected.clone();
        client.on_message(MessageKind::Disconnect, move |data| {
            assert!(data.is_empty());
            notify.notify_one();
        });
        client.start();

        conn.wait_closed().await;
        tokio::time::timeout(Duration::from_secs(1), disconnected.notified())
            .await
            .unwrap();
        assert_eq!(conn.read_calls.load(Ordering::SeqCst), 1);
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_retry_count_bounds_read_attempts() {
        for n in [0, 1, 4] {
            let conn = Arc::new(FakeConn::failing());
            let client = Client::new(conn.clone(), quick(n));
            client.start().await.unwrap();

            // first attempt is not a retry, it is just a try
            assert_eq!(conn.read_calls.load(Ordering::SeqCst), n as usize + 1);
            assert_eq!(conn.close_calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_successful_read_resets_retries() {
        let conn = Arc::new(FakeConn::failing());
        conn.push_read(Err(Error::DeadlineExceeded));
        conn.push_read(Ok(Message::new(MessageKind::Name, "x")));
        let client = Client::new(conn.clone(), quick(2));
        client.start().await.unwrap();

        // 1 failure + 1 success + (1 try + 2 retries)
        assert_eq!(conn.read_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_deadline_failure_closes_without_reading() {
        let conn = Arc::new(FakeConn::idle());
        conn.fail_deadline();
        let client = Client::new(conn.clone(), quick(3));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = disconnects.clone();
        client.on_message(MessageKind::Disconnect, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::timeout(Duration::from_secs(1), client.start())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conn.read_calls.load(Ordering::SeqCst), 0);
        assert_eq!(conn.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_close_twice_closes_once() {
        let conn = Arc::new(FakeConn::idle());
        conn.fail_close_with(Error::Closed);
        let client = Client::new(conn.clone(), quick(3));

        assert!(matches!(client.close().await, Err(Error::Closed)));
        assert!(client.close().await.is_ok());
        assert_eq!(conn.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_close_runs_cleanup_once() {
        let conn = Arc::new(FakeConn::idle());
        let client = Client::new(conn.clone(), quick(3));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = disconnects.clone();
        client.on_message(MessageKind::Disconnect, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (a, b) = tokio::join!(client.close(), client.close());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(conn.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_close_stops_read_loop() {
        let conn = Arc::new(FakeConn::failing());
        let client = Client::new(
            conn.clone(),
            ClientOptions {
                retry_interval: Duration::from_millis(50),
                ..quick(100)
            },
        );
        let handle = client.start();
        client.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conn.close_calls.load(Ordering::SeqCst), 1);
    }
}
