//! Per-connection write session state machine.
//!
//! The session owns no I/O. Every input (a client message, a collaborator reply, a
//! timer tick) arrives as an [`Event`] and is processed to completion by
//! [`Session::handle`], which returns the [`Effect`]s the driver must perform, in
//! order. Replies to those effects come back later as further events.
//!
//! ```text
//! Created -> AwaitingMetadata -> [AwaitingOwnerChannel] -> AwaitingBindingWrite
//!         -> AwaitingWriterInit -> Active -> Closed
//! ```
mod access;
pub mod assignment;
pub mod flow;
pub mod state;
pub mod validate;


use crate::auth::AuthError;
use crate::binding::{Binding, BindingKey, StoreError, StoreResult};
use crate::config::SessionConfig;
use crate::directory::{DirectoryError, TopicDescription};
use crate::owner::{OwnerEvent, OwnerTarget};
use crate::partition::{WriteBatch, WriterEvent, WriterInit, WriterTarget};
use access::AccessState;
use assignment::{SourceId, canonical_topic, default_partition, partition_hash};
use flow::FlowControl;
use sluice_authz::{Action, Identity};
use sluice_wire::{BLOCK_FORMAT_VERSION, ClientMessage, ServerMessage, StatusCode, WriteRequest};
use state::{BindingStep, SessionState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why a session ended; sent to the client as the final `Close` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: StatusCode,
    pub message: String,
}

#[derive(Debug)]
pub enum Event {
    Client(ClientMessage),
    // Client half-closed its side of the stream.
    ClientDone,
    ClientFailed(String),
    Described(Result<TopicDescription, DirectoryError>),
    Authenticated(Result<Identity, AuthError>),
    BindingSelected(StoreResult<Option<Binding>>),
    BindingUpserted(StoreResult<()>),
    Owner(OwnerEvent),
    Writer(WriterEvent),
    Wakeup,
}

#[derive(Debug)]
pub enum Effect {
    /// Deliver at most one more client message.
    ReadNext,
    Send(ServerMessage),
    RegisterSource { topic: String, source_id: String },
    SetPreferredCluster(String),
    Describe { topic: String },
    Authenticate { token: String },
    SelectBinding(BindingKey),
    UpsertBinding(BindingKey, Binding),
    ConnectOwner(OwnerTarget),
    RequestNextPartition,
    ReleaseOwner,
    BindWriter(WriterTarget),
    Write(WriteBatch),
    ScheduleWakeup(Duration),
    /// Terminal; the driver stops after executing it.
    Close(CloseReason),
}

pub struct Session {
    id: u64,
    peer: String,
    config: SessionConfig,
    state: SessionState,
    effects: Vec<Effect>,

    topic: String,
    source: Option<SourceId>,
    hash: u32,
    preferred_partition: Option<u32>,
    partition: Option<u32>,
    description: Option<TopicDescription>,
    meta: Arc<BTreeMap<String, String>>,
    owner_cookie: Option<String>,

    binding_create_time_ms: u64,
    binding_retries: u32,
    binding_refresh_in_flight: bool,
    last_binding_refresh_ms: u64,

    access: AccessState,
    flow: FlowControl,
    read_outstanding: bool,
    writes_done: bool,

    init_started_ms: u64,
    active_since_ms: u64,
    last_session_log_ms: u64,
}

impl Session {
    pub fn new(id: u64, peer: impl Into<String>, config: SessionConfig) -> Self {
        let flow = FlowControl::new(
            config.max_bytes_inflight,
            config.max_reserve_requests_inflight,
        );
        Self {
            id,
            peer: peer.into(),
            config,
            state: SessionState::Created,
            effects: Vec::new(),
            topic: String::new(),
            source: None,
            hash: 0,
            preferred_partition: None,
            partition: None,
            description: None,
            meta: Arc::new(BTreeMap::new()),
            owner_cookie: None,
            binding_create_time_ms: 0,
            binding_retries: 0,
            binding_refresh_in_flight: false,
            last_binding_refresh_ms: 0,
            access: AccessState::new(None),
            flow,
            read_outstanding: false,
            writes_done: false,
            init_started_ms: 0,
            active_since_ms: 0,
            last_session_log_ms: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn partition(&self) -> Option<u32> {
        self.partition
    }

    pub fn owner_cookie(&self) -> Option<&str> {
        self.owner_cookie.as_deref()
    }

    pub fn flow(&self) -> &FlowControl {
        &self.flow
    }

    /// Asks for the init message.
    pub fn start(&mut self) -> Vec<Effect> {
        self.request_read();
        std::mem::take(&mut self.effects)
    }

    pub fn handle(&mut self, event: Event, now_ms: u64) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            debug!(session_id = self.id, ?event, "event after close dropped");
            return Vec::new();
        }
        match event {
            Event::Client(message) => {
                self.read_outstanding = false;
                self.on_client(message, now_ms);
            }
            Event::ClientDone => {
                self.read_outstanding = false;
                self.on_writes_done();
            }
            Event::ClientFailed(reason) => {
                self.read_outstanding = false;
                self.close(StatusCode::BadRequest, reason);
            }
            Event::Described(result) => self.on_described(result, now_ms),
            Event::Authenticated(result) => self.on_authenticated(result, now_ms),
            Event::BindingSelected(result) => self.on_binding_selected(result, now_ms),
            Event::BindingUpserted(result) => self.on_binding_upserted(result, now_ms),
            Event::Owner(event) => self.on_owner(event, now_ms),
            Event::Writer(event) => self.on_writer(event, now_ms),
            Event::Wakeup => self.on_wakeup(now_ms),
        }
        std::mem::take(&mut self.effects)
    }

    fn on_client(&mut self, message: ClientMessage, now_ms: u64) {
        match (self.state, message) {
            (
                SessionState::Created,
                ClientMessage::Init {
                    topic,
                    source_id,
                    partition_group_id,
                    session_meta,
                    preferred_cluster,
                    auth_token,
                },
            ) => self.on_init(
                &topic,
                &source_id,
                partition_group_id,
                session_meta,
                preferred_cluster,
                auth_token,
                now_ms,
            ),
            (SessionState::Created, other) => self.close(
                StatusCode::BadRequest,
                format!("first message must be init, got {}", other.kind()),
            ),
            (_, ClientMessage::Init { .. }) => {
                self.close(StatusCode::BadRequest, "unexpected init request")
            }
            (_, ClientMessage::Write(request)) => self.on_write(&request),
            (_, ClientMessage::UpdateToken { token }) => self.on_update_token(token),
            (_, ClientMessage::WritesDone) => self.on_writes_done(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_init(
        &mut self,
        topic: &str,
        source_id: &str,
        partition_group_id: u32,
        session_meta: BTreeMap<String, String>,
        preferred_cluster: Option<String>,
        auth_token: Option<String>,
        now_ms: u64,
    ) {
        info!(
            session_id = self.id,
            peer = %self.peer,
            topic,
            source_id,
            partition_group_id,
            "write session requested"
        );
        let topic = canonical_topic(topic);
        if topic.is_empty() {
            self.close(StatusCode::BadRequest, "empty topic in init request");
            return;
        }
        let source = match SourceId::parse(source_id) {
            Ok(source) => source,
            Err(reason) => {
                self.close(StatusCode::BadRequest, format!("bad source id: {reason}"));
                return;
            }
        };

        self.topic = topic.to_string();
        self.hash = partition_hash(topic, &source);
        self.preferred_partition = partition_group_id.checked_sub(1);
        self.meta = Arc::new(session_meta);
        self.access = AccessState::new(auth_token);
        self.init_started_ms = now_ms;
        self.effects.push(Effect::RegisterSource {
            topic: self.topic.clone(),
            source_id: source.as_str().to_string(),
        });
        if let Some(cluster) = preferred_cluster.filter(|cluster| !cluster.is_empty()) {
            self.effects.push(Effect::SetPreferredCluster(cluster));
        }
        self.source = Some(source);
        self.state = SessionState::AwaitingMetadata;
        self.effects.push(Effect::Describe {
            topic: self.topic.clone(),
        });
    }

    fn on_described(&mut self, result: Result<TopicDescription, DirectoryError>, now_ms: u64) {
        match self.state {
            SessionState::AwaitingMetadata if self.description.is_none() => match result {
                Ok(description) if description.partition_count() > 0 => {
                    self.description = Some(description);
                    match self.access.token.clone() {
                        Some(token) => self.effects.push(Effect::Authenticate { token }),
                        None => self.check_acl(now_ms),
                    }
                }
                Ok(_) => self.close(
                    StatusCode::UnknownTopic,
                    format!("topic '{}' has no partitions", self.topic),
                ),
                Err(err) => self.close(StatusCode::UnknownTopic, err.to_string()),
            },
            SessionState::Active if self.access.check_in_flight => {
                self.access.check_in_flight = false;
                match result {
                    Ok(description) => {
                        if let Some(cached) = self.description.as_mut() {
                            cached.acl = description.acl;
                        }
                        self.check_acl(now_ms);
                    }
                    Err(err) => {
                        warn!(
                            session_id = self.id,
                            topic = %self.topic,
                            error = %err,
                            "access re-check failed, keeping session"
                        );
                    }
                }
            }
            _ => debug!(session_id = self.id, state = %self.state, "unexpected describe reply"),
        }
    }

    fn on_authenticated(&mut self, result: Result<Identity, AuthError>, now_ms: u64) {
        match self.state {
            SessionState::AwaitingMetadata => match result {
                Ok(identity) => {
                    self.access.identity = Some(identity);
                    self.check_acl(now_ms);
                }
                Err(err) => self.close(StatusCode::Unauthenticated, err.to_string()),
            },
            SessionState::Active if self.access.refresh.is_some() => match result {
                Ok(identity) => {
                    self.access.refresh_verified(identity);
                    if !self.access.check_in_flight {
                        self.access.start_check(now_ms);
                        self.effects.push(Effect::Describe {
                            topic: self.topic.clone(),
                        });
                    }
                }
                Err(err) => self.close(
                    StatusCode::Unauthenticated,
                    format!("token refresh failed: {err}"),
                ),
            },
            _ => debug!(session_id = self.id, state = %self.state, "unexpected auth reply"),
        }
    }

    fn check_acl(&mut self, now_ms: u64) {
        let Some(description) = self.description.as_ref() else {
            self.close(StatusCode::InternalError, "no topic description cached");
            return;
        };
        match self.access.identity.as_ref() {
            None if self.config.require_credentials => {
                self.close(
                    StatusCode::Unauthenticated,
                    "unauthenticated access is forbidden, provide credentials",
                );
                return;
            }
            None => {}
            Some(identity) => {
                if !description.acl.allows(identity, Action::TopicWrite) {
                    let message = format!(
                        "access to topic '{}' denied for '{}' due to 'no {} rights'",
                        description.name,
                        identity.subject,
                        Action::TopicWrite.right_name()
                    );
                    self.close(StatusCode::AccessDenied, message);
                    return;
                }
            }
        }

        self.access.last_check_ms = now_ms;
        if self.access.first_check {
            self.access.first_check = false;
            self.discover_partition(now_ms);
        }
        if self.access.refresh_authenticated && self.state != SessionState::Closed {
            self.access.refresh_acknowledged();
            self.effects.push(Effect::Send(ServerMessage::UpdateTokenAck));
        }
    }

    fn binding_key(&self) -> BindingKey {
        BindingKey {
            hash: self.hash,
            topic: self.topic.clone(),
            source_id: self
                .source
                .as_ref()
                .map(SourceId::escaped)
                .unwrap_or_default(),
        }
    }

    fn partition_count(&self) -> u32 {
        self.description
            .as_ref()
            .map(TopicDescription::partition_count)
            .unwrap_or(0)
    }

    fn hashed_partition(&self) -> u32 {
        self.preferred_partition
            .unwrap_or_else(|| default_partition(self.hash, self.partition_count()))
    }

    fn discover_partition(&mut self, now_ms: u64) {
        if !self.config.binding_store_enabled {
            let partition = self.hashed_partition();
            info!(
                session_id = self.id,
                topic = %self.topic,
                hash = self.hash,
                partition,
                partition_count = self.partition_count(),
                "partition chosen without binding store"
            );
            self.proceed_partition(partition);
            return;
        }
        debug!(session_id = self.id, now_ms, "selecting partition binding");
        self.state = SessionState::AwaitingBindingWrite(BindingStep::Select);
        self.effects.push(Effect::SelectBinding(self.binding_key()));
    }

    fn on_binding_selected(&mut self, result: StoreResult<Option<Binding>>, now_ms: u64) {
        if self.state != SessionState::AwaitingBindingWrite(BindingStep::Select) {
            debug!(session_id = self.id, state = %self.state, "unexpected binding select reply");
            return;
        }
        match result {
            Ok(Some(binding)) => {
                if let Some(preferred) = self.preferred_partition
                    && preferred != binding.partition
                {
                    let message = format!(
                        "source id '{}' is bound to partition group {}, requested partition group {} cannot be used",
                        self.source_name(),
                        binding.partition + 1,
                        preferred + 1
                    );
                    self.close(StatusCode::BadRequest, message);
                    return;
                }
                self.partition = Some(binding.partition);
                self.binding_create_time_ms = binding.create_time_ms;
                self.upsert_binding(now_ms);
            }
            Ok(None)
                if self.preferred_partition.is_some()
                    || !self.config.round_robin_partition_mapping =>
            {
                self.partition = Some(self.hashed_partition());
                self.binding_create_time_ms = now_ms;
                self.upsert_binding(now_ms);
            }
            Ok(None) => {
                let balancer = self
                    .description
                    .as_ref()
                    .map(|description| description.balancer.clone())
                    .unwrap_or_default();
                self.state = SessionState::AwaitingOwnerChannel;
                self.effects.push(Effect::ConnectOwner(OwnerTarget {
                    topic: self.topic.clone(),
                    balancer,
                    partition_count: self.partition_count(),
                }));
            }
            Err(StoreError::Aborted) => self.retry_resolution(now_ms),
            Err(err) => self.close(
                StatusCode::InternalError,
                format!("partition binding lookup failed: {err}"),
            ),
        }
    }

    fn upsert_binding(&mut self, now_ms: u64) {
        let Some(partition) = self.partition else {
            self.close(StatusCode::InternalError, "no partition to bind");
            return;
        };
        info!(
            session_id = self.id,
            topic = %self.topic,
            source_id = %self.source_name(),
            hash = self.hash,
            partition,
            partition_count = self.partition_count(),
            create_time_ms = self.binding_create_time_ms,
            "partition resolved"
        );
        self.state = SessionState::AwaitingBindingWrite(BindingStep::Upsert);
        self.effects.push(Effect::UpsertBinding(
            self.binding_key(),
            Binding {
                partition,
                create_time_ms: self.binding_create_time_ms,
                access_time_ms: now_ms,
            },
        ));
    }

    fn on_binding_upserted(&mut self, result: StoreResult<()>, now_ms: u64) {
        match self.state {
            SessionState::AwaitingBindingWrite(BindingStep::Upsert) => match result {
                Ok(()) => {
                    self.last_binding_refresh_ms = now_ms;
                    match self.partition {
                        Some(partition) => self.proceed_partition(partition),
                        None => self.close(
                            StatusCode::InternalError,
                            "binding stored without partition",
                        ),
                    }
                }
                Err(StoreError::Aborted) => self.retry_resolution(now_ms),
                Err(err) => self.close(
                    StatusCode::InternalError,
                    format!("partition binding write failed: {err}"),
                ),
            },
            SessionState::Active if self.binding_refresh_in_flight => {
                self.binding_refresh_in_flight = false;
                match result {
                    Ok(()) => self.last_binding_refresh_ms = now_ms,
                    Err(err) => warn!(
                        session_id = self.id,
                        topic = %self.topic,
                        error = %err,
                        "binding access time refresh failed"
                    ),
                }
            }
            _ => debug!(
                session_id = self.id,
                state = %self.state,
                "unexpected binding upsert reply"
            ),
        }
    }

    fn retry_resolution(&mut self, now_ms: u64) {
        self.binding_retries += 1;
        metrics::counter!("sluice_write_binding_races_total").increment(1);
        if self.binding_retries > self.config.max_binding_retries {
            let message = format!(
                "partition binding for source id '{}' aborted {} times",
                self.source_name(),
                self.binding_retries
            );
            self.close(StatusCode::InternalError, message);
            return;
        }
        info!(
            session_id = self.id,
            topic = %self.topic,
            attempt = self.binding_retries,
            "partition binding raced with another session, retrying"
        );
        self.partition = None;
        self.discover_partition(now_ms);
    }

    fn on_owner(&mut self, event: OwnerEvent, now_ms: u64) {
        if self.state != SessionState::AwaitingOwnerChannel {
            debug!(session_id = self.id, ?event, "owner event ignored");
            return;
        }
        match event {
            OwnerEvent::Connected => self.effects.push(Effect::RequestNextPartition),
            OwnerEvent::NextPartition(partition) => {
                self.effects.push(Effect::ReleaseOwner);
                self.partition = Some(partition);
                self.binding_create_time_ms = now_ms;
                self.upsert_binding(now_ms);
            }
            OwnerEvent::Aborted => {
                self.effects.push(Effect::ReleaseOwner);
                self.retry_resolution(now_ms);
            }
            OwnerEvent::ConnectFailed(reason) => self.close(
                StatusCode::InternalError,
                format!("cannot reach partition balancer: {reason}"),
            ),
            OwnerEvent::Destroyed => {
                self.close(StatusCode::InternalError, "partition balancer channel destroyed")
            }
        }
    }

    fn proceed_partition(&mut self, partition: u32) {
        let Some(description) = self.description.as_ref() else {
            self.close(StatusCode::InternalError, "no topic description cached");
            return;
        };
        let Some(location) = description.partitions.get(&partition) else {
            let message = format!("no partition {partition} in topic '{}'", description.name);
            self.close(StatusCode::UnknownTopic, message);
            return;
        };
        let target = WriterTarget {
            topic: description.name.clone(),
            partition,
            owner: location.owner.clone(),
            source_id: self.source_name().to_string(),
        };
        self.partition = Some(partition);
        self.state = SessionState::AwaitingWriterInit;
        self.effects.push(Effect::BindWriter(target));
    }

    fn on_writer(&mut self, event: WriterEvent, now_ms: u64) {
        match (self.state, event) {
            (SessionState::AwaitingWriterInit, WriterEvent::Init(Ok(init))) => {
                self.on_writer_ready(init, now_ms)
            }
            (
                SessionState::AwaitingWriterInit | SessionState::Active,
                WriterEvent::Init(Err(err)) | WriterEvent::Failed(err),
            ) => self.close(err.code.unwrap_or(StatusCode::InternalError), err.message),
            (
                SessionState::AwaitingWriterInit | SessionState::Active,
                WriterEvent::Disconnected,
            ) => self.close(StatusCode::InternalError, "partition writer disconnected"),
            (SessionState::Active, WriterEvent::Accepted { cookie }) => self.on_accepted(cookie),
            (SessionState::Active, WriterEvent::Ack { cookie, results }) => {
                self.on_ack(cookie, &results)
            }
            (state, event) => {
                error!(session_id = self.id, %state, ?event, "unexpected partition writer event");
                self.close(StatusCode::InternalError, "unexpected partition writer event");
            }
        }
    }

    fn on_writer_ready(&mut self, init: WriterInit, now_ms: u64) {
        let Some(description) = self.description.as_ref() else {
            self.close(StatusCode::InternalError, "no topic description cached");
            return;
        };
        let partition = self.partition.unwrap_or_default();
        let ack = ServerMessage::InitAck {
            session_id: init.owner_cookie.clone(),
            last_sequence_number: init.last_sequence_number,
            partition_id: partition,
            topic: description.name.clone(),
            cluster: self.config.cluster.clone(),
            block_format_version: BLOCK_FORMAT_VERSION,
            supported_codecs: description.supported_codecs(),
        };
        info!(
            session_id = self.id,
            topic = %self.topic,
            partition,
            last_sequence_number = init.last_sequence_number,
            owner_cookie = %init.owner_cookie,
            "write session inited"
        );
        metrics::histogram!("sluice_write_init_latency_ms")
            .record(now_ms.saturating_sub(self.init_started_ms) as f64);

        self.owner_cookie = Some(init.owner_cookie);
        self.state = SessionState::Active;
        self.active_since_ms = now_ms;
        self.last_session_log_ms = now_ms;
        self.effects.push(Effect::Send(ack));
        self.schedule_wakeup();
        self.request_read();
    }

    fn on_write(&mut self, request: &WriteRequest) {
        if self.state != SessionState::Active {
            self.close(StatusCode::BadRequest, "write in not inited session");
            return;
        }
        self.access.request_not_checked = true;
        let Some(description) = self.description.as_ref() else {
            self.close(StatusCode::InternalError, "no topic description cached");
            return;
        };
        let write = match validate::validate_write(request, description) {
            Ok(write) => write,
            Err(reason) => {
                self.close(StatusCode::BadRequest, reason);
                return;
            }
        };
        let bytes = write.byte_size as f64;
        metrics::gauge!("sluice_write_bytes_inflight").increment(bytes);
        metrics::gauge!("sluice_write_bytes_inflight_total").increment(bytes);
        self.flow.enqueue(write);
        if self.flow.below_byte_ceiling() {
            self.request_read();
        }
        self.try_form_batch();
    }

    fn try_form_batch(&mut self) {
        if let Some(batch) = self.flow.form_batch() {
            self.effects.push(Effect::Write(WriteBatch {
                cookie: batch.cookie,
                records: batch.records,
                meta: Arc::clone(&self.meta),
            }));
        }
    }

    fn on_accepted(&mut self, cookie: u64) {
        match self.flow.on_accepted(cookie) {
            Ok(released) => {
                metrics::gauge!("sluice_write_bytes_inflight").decrement(released as f64);
                if self.flow.below_byte_ceiling() {
                    self.request_read();
                }
                self.try_form_batch();
            }
            Err(err) => {
                error!(
                    session_id = self.id,
                    error = %err,
                    "partition writer acceptance out of order"
                );
                self.close(StatusCode::InternalError, err.to_string());
            }
        }
    }

    fn on_ack(&mut self, cookie: u64, results: &[crate::partition::WriteResult]) {
        match self.flow.on_ack(cookie, results) {
            Ok((acks, released)) => {
                metrics::gauge!("sluice_write_bytes_inflight_total").decrement(released as f64);
                let partition_id = self.partition.unwrap_or_default();
                for ack in acks {
                    self.effects.push(Effect::Send(ServerMessage::BatchAck {
                        partition_id,
                        records: ack.records,
                        stats: ack.stats,
                    }));
                }
                self.check_finish();
            }
            Err(err) => {
                error!(session_id = self.id, error = %err, "partition writer ack inconsistent");
                self.close(StatusCode::InternalError, err.to_string());
            }
        }
    }

    fn on_update_token(&mut self, token: String) {
        if self.state != SessionState::Active {
            self.close(StatusCode::BadRequest, "update token in not inited session");
            return;
        }
        if self.access.is_active_token(&token)
            || (token.is_empty() && !self.config.require_credentials)
        {
            self.effects.push(Effect::Send(ServerMessage::UpdateTokenAck));
            self.request_read();
            return;
        }
        if token.is_empty() {
            self.close(
                StatusCode::Unauthenticated,
                "empty token while credentials are required",
            );
            return;
        }
        if !self.access.begin_refresh(token.clone()) {
            self.close(StatusCode::Overload, "token refresh already in progress");
            return;
        }
        self.effects.push(Effect::Authenticate { token });
        self.request_read();
    }

    fn on_writes_done(&mut self) {
        if self.state != SessionState::Active {
            self.close(
                StatusCode::BadRequest,
                "out of order writes done before initialization",
            );
            return;
        }
        self.writes_done = true;
        self.check_finish();
    }

    fn check_finish(&mut self) {
        if self.writes_done && self.flow.is_drained() {
            self.close(StatusCode::Ok, "writes done");
        }
    }

    fn on_wakeup(&mut self, now_ms: u64) {
        if self.state != SessionState::Active {
            return;
        }
        self.schedule_wakeup();

        if self.access.recheck_due(now_ms, self.config.acl_retry_timeout) {
            self.access.start_check(now_ms);
            self.effects.push(Effect::Describe {
                topic: self.topic.clone(),
            });
        }

        let refresh_due = now_ms.saturating_sub(self.last_binding_refresh_ms)
            >= self.config.binding_refresh_interval.as_millis() as u64;
        if self.config.binding_store_enabled && !self.binding_refresh_in_flight && refresh_due {
            if let Some(partition) = self.partition {
                self.binding_refresh_in_flight = true;
                self.effects.push(Effect::UpsertBinding(
                    self.binding_key(),
                    Binding {
                        partition,
                        create_time_ms: self.binding_create_time_ms,
                        access_time_ms: now_ms,
                    },
                ));
            }
        }

        if now_ms.saturating_sub(self.last_session_log_ms)
            >= self.config.session_log_period.as_millis() as u64
        {
            self.last_session_log_ms = now_ms;
            info!(
                session_id = self.id,
                topic = %self.topic,
                owner_cookie = self.owner_cookie.as_deref().unwrap_or_default(),
                peer = %self.peer,
                active_ms = now_ms.saturating_sub(self.active_since_ms),
                "write session still active"
            );
        }
    }

    fn schedule_wakeup(&mut self) {
        self.effects
            .push(Effect::ScheduleWakeup(self.config.acl_check_interval));
    }

    fn request_read(&mut self) {
        let readable = matches!(self.state, SessionState::Created | SessionState::Active);
        if readable && !self.read_outstanding && !self.writes_done {
            self.read_outstanding = true;
            self.effects.push(Effect::ReadNext);
        }
    }

    fn source_name(&self) -> &str {
        self.source.as_ref().map(SourceId::as_str).unwrap_or_default()
    }

    fn close(&mut self, code: StatusCode, message: impl Into<String>) {
        if self.state == SessionState::Closed {
            return;
        }
        let message = message.into();
        let previous = self.state;
        self.state = SessionState::Closed;

        metrics::gauge!("sluice_write_bytes_inflight").decrement(self.flow.bytes_inflight() as f64);
        metrics::gauge!("sluice_write_bytes_inflight_total")
            .decrement(self.flow.bytes_inflight_total() as f64);
        if code == StatusCode::Ok {
            info!(session_id = self.id, topic = %self.topic, "write session closed");
        } else {
            metrics::counter!("sluice_write_session_errors_total", "code" => code.as_str())
                .increment(1);
            info!(
                session_id = self.id,
                topic = %self.topic,
                state = %previous,
                %code,
                reason = %message,
                "write session closed with error"
            );
        }

        self.effects.push(Effect::Send(ServerMessage::Close {
            code,
            message: message.clone(),
        }));
        self.effects.push(Effect::Close(CloseReason { code, message }));
    }
}
