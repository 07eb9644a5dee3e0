//! Tokio driver for one write session.
//!
//! The driver owns the socket, the partition writer handle and the owner channel
//! handle. It executes the session's effects in order, turns collaborator replies
//! into events, and feeds them back one at a time. Client frames are read by a
//! separate task that only reads when the session asked for a message, so a
//! paused session applies backpressure all the way to the producer's socket.
use anyhow::{Result, anyhow};
use bytes::BytesMut;
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::auth::Authenticator;
use crate::binding::BindingStore;
use crate::config::SessionConfig;
use crate::directory::MetadataDirectory;
use crate::owner::{OwnerChannel, OwnerConnector, OwnerEvent};
use crate::partition::{PartitionWriter, PartitionWriterFactory, WriterEvent};
use crate::registry::SessionRegistry;
use crate::session::{CloseReason, Effect, Event, Session};
use crate::transport::{read_client_message, write_server_message};

/// Shared services every session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn MetadataDirectory>,
    pub authenticator: Arc<dyn Authenticator>,
    pub bindings: Arc<dyn BindingStore>,
    pub owners: Arc<dyn OwnerConnector>,
    pub writers: Arc<dyn PartitionWriterFactory>,
    pub registry: Arc<SessionRegistry>,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

// Deregisters the session and stops the reader on every exit path.
struct SessionGuard {
    id: u64,
    registry: Arc<SessionRegistry>,
    reader: JoinHandle<()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.reader.abort();
        self.registry.remove(self.id);
        metrics::gauge!("sluice_write_sessions_active").decrement(1.0);
    }
}

fn spawn_reader<R>(
    mut reader: R,
    max_frame_bytes: usize,
    mut permits: mpsc::UnboundedReceiver<()>,
    events: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut scratch = BytesMut::new();
        while permits.recv().await.is_some() {
            let event = match read_client_message(&mut reader, max_frame_bytes, &mut scratch).await
            {
                Ok(Some(message)) => Event::Client(message),
                Ok(None) => Event::ClientDone,
                Err(err) => Event::ClientFailed(format!("{err:#}")),
            };
            let last = !matches!(event, Event::Client(_));
            if events.send(event).is_err() || last {
                break;
            }
        }
    })
}

struct Driver<W> {
    session_id: u64,
    socket: W,
    collaborators: Collaborators,
    events: mpsc::UnboundedSender<Event>,
    read_permits: mpsc::UnboundedSender<()>,
    writer_events: mpsc::UnboundedSender<WriterEvent>,
    owner_events: mpsc::UnboundedSender<OwnerEvent>,
    writer: Option<Box<dyn PartitionWriter>>,
    owner: Option<Box<dyn OwnerChannel>>,
    wakeup: Option<Instant>,
}

impl<W> Driver<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn spawn_reply<F>(&self, reply: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events.send(reply.await);
        });
    }

    /// Runs one effect; returns the close reason once the session ended.
    async fn apply(&mut self, effect: Effect) -> Result<Option<CloseReason>> {
        match effect {
            Effect::ReadNext => {
                let _ = self.read_permits.send(());
            }
            Effect::Send(message) => write_server_message(&mut self.socket, &message).await?,
            Effect::RegisterSource { topic, source_id } => self
                .collaborators
                .registry
                .set_source(self.session_id, &topic, &source_id),
            Effect::SetPreferredCluster(cluster) => self
                .collaborators
                .registry
                .set_preferred_cluster(self.session_id, &cluster),
            Effect::Describe { topic } => {
                let directory = Arc::clone(&self.collaborators.directory);
                self.spawn_reply(async move { Event::Described(directory.describe(&topic).await) });
            }
            Effect::Authenticate { token } => {
                let authenticator = Arc::clone(&self.collaborators.authenticator);
                self.spawn_reply(async move {
                    Event::Authenticated(authenticator.authenticate(&token).await)
                });
            }
            Effect::SelectBinding(key) => {
                let bindings = Arc::clone(&self.collaborators.bindings);
                self.spawn_reply(
                    async move { Event::BindingSelected(bindings.select(&key).await) },
                );
            }
            Effect::UpsertBinding(key, binding) => {
                let bindings = Arc::clone(&self.collaborators.bindings);
                self.spawn_reply(async move {
                    Event::BindingUpserted(bindings.upsert(&key, binding).await)
                });
            }
            Effect::ConnectOwner(target) => {
                let channel = self
                    .collaborators
                    .owners
                    .connect(target, self.owner_events.clone());
                self.owner = Some(channel);
            }
            Effect::RequestNextPartition => match self.owner.as_mut() {
                Some(owner) => owner.request_next_partition(),
                None => return Err(anyhow!("partition requested without owner channel")),
            },
            Effect::ReleaseOwner => self.owner = None,
            Effect::BindWriter(target) => {
                self.collaborators
                    .registry
                    .set_partition(self.session_id, target.partition);
                let writer = self
                    .collaborators
                    .writers
                    .bind(target, self.writer_events.clone());
                self.writer = Some(writer);
            }
            Effect::Write(batch) => match self.writer.as_mut() {
                Some(writer) => writer.write(batch),
                None => return Err(anyhow!("write batch without partition writer")),
            },
            Effect::ScheduleWakeup(after) => self.wakeup = Some(Instant::now() + after),
            Effect::Close(reason) => {
                self.writer = None;
                self.owner = None;
                let _ = self.socket.shutdown().await;
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }
}

/// Drives one write session over a split client stream until it closes.
pub async fn run_session<R, W>(
    reader: R,
    socket: W,
    peer: String,
    config: SessionConfig,
    max_frame_bytes: usize,
    collaborators: Collaborators,
) -> Result<CloseReason>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    let session_id = collaborators.registry.register(peer.clone());
    metrics::counter!("sluice_write_sessions_created_total").increment(1);
    metrics::gauge!("sluice_write_sessions_active").increment(1.0);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (permits_tx, permits_rx) = mpsc::unbounded_channel();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel();
    let (owner_tx, mut owner_rx) = mpsc::unbounded_channel();

    let _guard = SessionGuard {
        id: session_id,
        registry: Arc::clone(&collaborators.registry),
        reader: spawn_reader(reader, max_frame_bytes, permits_rx, events_tx.clone()),
    };
    let mut driver = Driver {
        session_id,
        socket,
        collaborators,
        events: events_tx,
        read_permits: permits_tx,
        writer_events: writer_tx,
        owner_events: owner_tx,
        writer: None,
        owner: None,
        wakeup: None,
    };
    let mut session = Session::new(session_id, peer, config);
    tracing::debug!(session_id, "write session started");

    let mut effects = session.start();
    loop {
        for effect in effects.drain(..) {
            if let Some(reason) = driver.apply(effect).await? {
                return Ok(reason);
            }
        }
        let deadline = driver.wakeup.unwrap_or_else(Instant::now);
        let event = tokio::select! {
            Some(event) = events_rx.recv() => event,
            Some(event) = writer_rx.recv() => Event::Writer(event),
            Some(event) = owner_rx.recv() => Event::Owner(event),
            _ = tokio::time::sleep_until(deadline), if driver.wakeup.is_some() => {
                driver.wakeup = None;
                Event::Wakeup
            }
            else => return Err(anyhow!("session {session_id} event sources closed")),
        };
        effects = session.handle(event, now_ms());
    }
}
