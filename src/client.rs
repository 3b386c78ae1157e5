//! Connection manager: lifecycle, inbound dispatch, and sends.
//!
//! DESIGN
//! ======
//! A `ReliableClient` is a cheap handle over shared state. Each open
//! transport ("link") runs in its own task that owns the socket and selects
//! between inbound frames and commands (send, close) from the handle. All
//! session mutation happens under one mutex; the ack registry has its own and
//! is only ever locked after the session lock, never before.
//!
//! GENERATIONS
//! ===========
//! `epoch` is bumped by `connect()` and `close()`. An in-flight connect or a
//! resume loop captures the epoch it started under and drops its result if
//! the epoch moved. Each link also carries its own id so a link that was
//! replaced or closed by the handle cannot apply frames or its close to the
//! current session.
//!
//! ORDERING
//! ========
//! - A sequenced data frame writes its sequence ack before the payload event
//!   is emitted.
//! - A transport close rejects every pending send before any resume attempt.
//! - `close()` rejects every pending send before it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use frames::{Codec, Inbound, Outbound, WireMessage};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{AckError, ClientError};
use crate::negotiate::Negotiator;
use crate::reconnect::{self, CLOSE_ABNORMAL, CLOSE_CLIENT_ABORT, CLOSE_NORMAL, CloseDecision};
use crate::registry::{AckFuture, AckRegistry};
use crate::sequence::Observation;
use crate::session::{ConnectionStatus, ResumeInfo, Session};
use crate::transport::{self, WsStream};

/// Close code used when a close frame carries no status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Lifecycle and data notifications, delivered in order on the channel
/// returned by [`ReliableClient::new`].
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent<P> {
    /// The server established (or re-established) the session identity.
    Connected {
        connection_id: String,
        user_id: Option<String>,
    },
    /// The session ended and will not be resumed automatically.
    Disconnected { reason: String },
    /// Application data from the server.
    Message(P),
}

enum LinkCommand {
    Send(Message),
    Close(u16),
}

struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<LinkCommand>,
}

struct Shared<S> {
    session: Session<S>,
    link: Option<Link>,
    next_link_id: u64,
    epoch: u64,
    closed: bool,
    /// Negotiated endpoint of the current session, the base of resume URLs.
    endpoint: Option<Url>,
}

struct Inner<C: Codec> {
    codec: C,
    negotiator: Arc<dyn Negotiator>,
    config: ClientConfig,
    registry: AckRegistry<C::AckId>,
    shared: Mutex<Shared<C::SequenceId>>,
    events: mpsc::UnboundedSender<ClientEvent<C::Payload>>,
    ack_seed: AtomicU64,
}

/// Side effects of one inbound frame: at most one outbound frame and at most
/// one event.
#[derive(Debug)]
struct Effects<P> {
    outbound: Option<WireMessage>,
    event: Option<ClientEvent<P>>,
}

impl<P> Effects<P> {
    fn none() -> Self {
        Self {
            outbound: None,
            event: None,
        }
    }
}

/// Reliable pubsub client over codec `C`.
pub struct ReliableClient<C: Codec> {
    inner: Arc<Inner<C>>,
}

impl<C: Codec> Clone for ReliableClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec> ReliableClient<C> {
    /// Create a disconnected client and the receiver for its events.
    pub fn new(
        codec: C,
        negotiator: Arc<dyn Negotiator>,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent<C::Payload>>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            codec,
            negotiator,
            config,
            registry: AckRegistry::new(),
            shared: Mutex::new(Shared {
                session: Session::new(),
                link: None,
                next_link_id: 0,
                epoch: 0,
                closed: false,
                endpoint: None,
            }),
            events,
            ack_seed: AtomicU64::new(now_ms()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Start a fresh session, replacing any current one.
    ///
    /// Returns once the transport is open; the session identity arrives
    /// later as [`ClientEvent::Connected`].
    ///
    /// # Errors
    ///
    /// Returns the negotiation or transport failure of this attempt (status
    /// drops back to `Disconnected`; there is no automatic retry), or
    /// [`ClientError::Cancelled`] if `connect()` or `close()` was called again
    /// while this attempt was in flight.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let epoch = self.inner.begin_connect();
        info!(epoch, "client: connecting");

        match self.inner.open_fresh().await {
            Ok((endpoint, stream)) => {
                self.inner
                    .install(epoch, Some(endpoint), stream, ConnectionStatus::Connecting)
            }
            Err(error) => {
                warn!(%error, "client: connect failed");
                self.inner.fail_attempt(epoch);
                Err(error)
            }
        }
    }

    /// Force the transport to recycle.
    ///
    /// With a live transport this is [`abort`](Self::abort), which resumes
    /// a resumable session. While a resume is already under way this does
    /// nothing. Otherwise a fresh session is connected.
    ///
    /// # Errors
    ///
    /// Propagates [`connect`](Self::connect) failures when a fresh session
    /// is needed.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        enum Plan {
            Abort,
            AlreadyResuming,
            Fresh,
        }

        let plan = {
            let shared = self.inner.lock();
            if shared.link.is_some() {
                Plan::Abort
            } else if shared.session.status == ConnectionStatus::Reconnecting {
                Plan::AlreadyResuming
            } else {
                Plan::Fresh
            }
        };

        match plan {
            Plan::Abort => {
                self.abort();
                Ok(())
            }
            Plan::AlreadyResuming => Ok(()),
            Plan::Fresh => self.connect().await,
        }
    }

    /// Close the transport with the client-reset code. The close is then
    /// handled like any other drop: pending sends fail and a resumable
    /// session is resumed. No-op without a transport.
    pub fn abort(&self) {
        let link_id = self.inner.lock().link.as_ref().map(|link| link.id);
        if let Some(link_id) = link_id {
            self.inner.abort_link(link_id);
        } else {
            debug!("client: abort without transport");
        }
    }

    /// Terminal shutdown. Every pending send fails with [`AckError::Closed`]
    /// before this returns, and nothing is retried afterwards.
    pub fn close(&self) {
        let (link, was_live, reason) = {
            let mut shared = self.inner.lock();
            shared.closed = true;
            shared.epoch += 1;
            shared.endpoint = None;
            let link = shared.link.take();
            let was_live =
                link.is_some() || shared.session.status == ConnectionStatus::Reconnecting;
            let reason = shared.session.disconnect_reason.take();
            shared.session.reset(ConnectionStatus::Disconnected);
            (link, was_live, reason)
        };

        if let Some(link) = link {
            let _ = link.tx.send(LinkCommand::Close(CLOSE_NORMAL));
        }
        let rejected = self.inner.registry.reject_all(AckError::Closed);
        info!(rejected, "client: closed");

        if was_live {
            self.inner.emit(ClientEvent::Disconnected {
                reason: reason.unwrap_or_else(|| "closed by client".to_owned()),
            });
        }
    }

    /// Send an application event and get its completion.
    ///
    /// Without an open transport the completion resolves immediately with
    /// [`AckError::NotConnected`]. When the codec or the config sets an ack
    /// deadline, a send left unacknowledged past it aborts the transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateAckId`] if `ack_id` is already
    /// pending, or [`ClientError::Codec`] if the event cannot be encoded.
    pub fn send_event(
        &self,
        ack_id: C::AckId,
        event: C::Event,
    ) -> Result<AckFuture<C::AckId>, ClientError> {
        let message = self.inner.codec.encode(Outbound::Event {
            ack_id: ack_id.clone(),
            event,
        })?;

        let (future, link_id) = {
            let shared = self.inner.lock();
            let future = self.inner.registry.register(ack_id.clone())?;
            match &shared.link {
                Some(link) => {
                    let _ = link.tx.send(LinkCommand::Send(transport::to_ws(message)));
                    (future, Some(link.id))
                }
                None => {
                    self.inner.registry.fail(&ack_id, AckError::NotConnected);
                    (future, None)
                }
            }
        };
        debug!(%ack_id, "client: event sent");

        let deadline = self.inner.config.ack_timeout.resolve(C::ACK_TIMEOUT);
        if let (Some(link_id), Some(deadline)) = (link_id, deadline) {
            let inner = Arc::clone(&self.inner);
            let ticket = future.ticket();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                if inner.registry.is_pending(&ack_id, ticket) {
                    warn!(%ack_id, "client: ack deadline passed, resetting transport");
                    inner.abort_link(link_id);
                }
            });
        }
        Ok(future)
    }

    /// A fresh ack id, ordered after every id this client generated before.
    #[must_use]
    pub fn next_ack_id(&self) -> C::AckId {
        C::ack_id(self.inner.ack_seed.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().session.status
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.inner.lock().session.connection_id.clone()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.inner.lock().session.user_id.clone()
    }

    /// The resumption checkpoint: highest sequence id received this session.
    #[must_use]
    pub fn last_sequence_id(&self) -> C::SequenceId {
        self.inner.lock().session.sequence.last().clone()
    }

    /// Number of sends awaiting an ack.
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.inner.registry.len()
    }
}

impl<C: Codec> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, Shared<C::SequenceId>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ClientEvent<C::Payload>) {
        if self.events.send(event).is_err() {
            debug!("client: event receiver dropped");
        }
    }

    /// Start a new generation: tear down the current link and session.
    fn begin_connect(&self) -> u64 {
        let (epoch, link) = {
            let mut shared = self.lock();
            shared.closed = false;
            shared.epoch += 1;
            shared.endpoint = None;
            shared.session.reset(ConnectionStatus::Connecting);
            (shared.epoch, shared.link.take())
        };
        if let Some(link) = link {
            info!(link_id = link.id, "client: replacing existing transport");
            let _ = link.tx.send(LinkCommand::Close(CLOSE_NORMAL));
        }
        let rejected = self.registry.reject_all(AckError::Closed);
        if rejected > 0 {
            debug!(rejected, "client: pending sends failed by reconnect");
        }
        epoch
    }

    async fn open_fresh(&self) -> Result<(Url, WsStream), ClientError> {
        let negotiated = self.negotiator.negotiate().await?;
        let endpoint = transport::parse_endpoint(&negotiated.endpoint)?;
        let request =
            transport::handshake_request::<C>(&endpoint, negotiated.credential.as_deref())?;
        let stream = transport::open(request, self.config.connect_timeout).await?;
        Ok((endpoint, stream))
    }

    fn fail_attempt(&self, epoch: u64) {
        let mut shared = self.lock();
        if shared.epoch == epoch && shared.link.is_none() {
            shared.session.status = ConnectionStatus::Disconnected;
        }
    }

    /// Attach an opened socket to generation `epoch` and start its task.
    fn install(
        self: &Arc<Self>,
        epoch: u64,
        endpoint: Option<Url>,
        mut stream: WsStream,
        status: ConnectionStatus,
    ) -> Result<(), ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let link_id = {
            let mut shared = self.lock();
            if shared.closed || shared.epoch != epoch {
                None
            } else {
                shared.next_link_id += 1;
                let id = shared.next_link_id;
                shared.link = Some(Link { id, tx });
                if endpoint.is_some() {
                    shared.endpoint = endpoint;
                }
                shared.session.status = status;
                Some(id)
            }
        };

        let Some(link_id) = link_id else {
            debug!(epoch, "client: dropping superseded transport");
            tokio::spawn(async move {
                let _ = stream.send(transport::close_message(CLOSE_NORMAL)).await;
            });
            return Err(ClientError::Cancelled);
        };

        info!(link_id, %status, "client: transport open");
        tokio::spawn(run_link(Arc::clone(self), link_id, stream, rx));
        Ok(())
    }

    fn abort_link(&self, link_id: u64) {
        let shared = self.lock();
        match &shared.link {
            Some(link) if link.id == link_id => {
                info!(link_id, "client: aborting transport");
                let _ = link.tx.send(LinkCommand::Close(CLOSE_CLIENT_ABORT));
            }
            _ => debug!(link_id, "client: abort for stale transport ignored"),
        }
    }

    /// Classify one inbound message and apply it to the session.
    fn dispatch(&self, link_id: u64, message: &WireMessage) -> Effects<C::Payload> {
        let frame = match self.codec.decode(message) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, kind = message.kind(), "client: dropping undecodable frame");
                return Effects::none();
            }
        };

        let mut shared = self.lock();
        if shared.link.as_ref().map(|link| link.id) != Some(link_id) {
            debug!(link_id, "client: frame from stale transport ignored");
            return Effects::none();
        }

        match frame {
            Inbound::Connected {
                connection_id,
                user_id,
                reconnection_token,
            } => {
                info!(%connection_id, "client: connected");
                let session = &mut shared.session;
                session.status = ConnectionStatus::Connected;
                session.connection_id = Some(connection_id.clone());
                session.user_id.clone_from(&user_id);
                session.disconnect_reason = None;
                session.resume = reconnection_token.map(|reconnection_token| ResumeInfo {
                    connection_id: connection_id.clone(),
                    reconnection_token,
                });
                Effects {
                    outbound: None,
                    event: Some(ClientEvent::Connected {
                        connection_id,
                        user_id,
                    }),
                }
            }
            Inbound::Disconnected { reason } => {
                info!(%reason, "client: server announced disconnect");
                shared.session.disconnect_reason = Some(reason);
                Effects::none()
            }
            Inbound::Ack {
                ack_id,
                success,
                error,
            } => {
                drop(shared);
                self.registry.acknowledge(&ack_id, success, error);
                Effects::none()
            }
            Inbound::Data {
                sequence_id,
                payload,
            } => {
                let mut outbound = None;
                let mut deliver = true;
                if let Some(sequence_id) = sequence_id {
                    match shared.session.sequence.observe(&sequence_id) {
                        Observation::Advanced => {
                            match self.codec.encode(Outbound::SequenceAck {
                                sequence_id: sequence_id.clone(),
                            }) {
                                Ok(ack) => outbound = Some(ack),
                                Err(error) => {
                                    warn!(%error, ?sequence_id, "client: sequence ack encode failed");
                                }
                            }
                        }
                        Observation::Stale => {
                            debug!(?sequence_id, "client: stale sequence id");
                            deliver = !self.config.drop_stale_data;
                        }
                    }
                }
                Effects {
                    outbound,
                    event: deliver.then_some(ClientEvent::Message(payload)),
                }
            }
            Inbound::SequenceAck { sequence_id } => {
                debug!(?sequence_id, "client: sequence ack echoed");
                Effects::none()
            }
        }
    }

    /// Apply the close of link `link_id`.
    fn handle_close(self: &Arc<Self>, link_id: u64, code: u16) {
        let outcome = {
            let mut shared = self.lock();
            if shared.link.as_ref().map(|link| link.id) != Some(link_id) {
                debug!(link_id, code, "client: close of stale transport ignored");
                return;
            }
            shared.link = None;

            let decision = reconnect::decide(
                code,
                shared.closed,
                C::RESUMABLE,
                shared.session.resume.is_some(),
            );
            match decision {
                CloseDecision::Resume => {
                    shared.session.status = ConnectionStatus::Reconnecting;
                    Ok(shared.epoch)
                }
                CloseDecision::Disconnect => {
                    shared.session.status = ConnectionStatus::Disconnected;
                    shared.session.resume = None;
                    let reason = shared
                        .session
                        .disconnect_reason
                        .take()
                        .unwrap_or_else(|| reconnect::describe_close(code));
                    Err(reason)
                }
            }
        };

        let rejected = self.registry.reject_all(AckError::Timeout);
        match outcome {
            Ok(epoch) => {
                info!(link_id, code, rejected, "client: transport dropped, resuming");
                tokio::spawn(resume_loop(Arc::clone(self), epoch));
            }
            Err(reason) => {
                info!(link_id, code, rejected, %reason, "client: disconnected");
                self.emit(ClientEvent::Disconnected { reason });
            }
        }
    }

    /// End a resume loop that cannot continue.
    fn give_up(&self, epoch: u64, reason: String) {
        {
            let mut shared = self.lock();
            if shared.closed || shared.epoch != epoch {
                return;
            }
            shared.session.status = ConnectionStatus::Disconnected;
            shared.session.resume = None;
        }
        warn!(%reason, "client: giving up on session");
        self.emit(ClientEvent::Disconnected { reason });
    }
}

/// Own one socket until it closes, then hand the close to the session.
async fn run_link<C: Codec>(
    inner: Arc<Inner<C>>,
    link_id: u64,
    stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let (mut sink, mut stream) = stream.split();

    let code = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Send(message)) => {
                    if let Err(error) = sink.send(message).await {
                        warn!(link_id, %error, "link: write failed");
                        break CLOSE_ABNORMAL;
                    }
                }
                Some(LinkCommand::Close(code)) => {
                    let _ = sink.send(transport::close_message(code)).await;
                    break code;
                }
                None => {
                    let _ = sink.send(transport::close_message(CLOSE_NORMAL)).await;
                    break CLOSE_NORMAL;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Close(frame))) => {
                    break transport::close_code(frame.as_ref()).unwrap_or(CLOSE_NO_STATUS);
                }
                Some(Ok(message)) => {
                    let Some(wire) = transport::from_ws(&message) else {
                        continue;
                    };
                    let effects = inner.dispatch(link_id, &wire);
                    if let Some(outbound) = effects.outbound {
                        if let Err(error) = sink.send(transport::to_ws(outbound)).await {
                            warn!(link_id, %error, "link: sequence ack write failed");
                            break CLOSE_ABNORMAL;
                        }
                    }
                    if let Some(event) = effects.event {
                        inner.emit(event);
                    }
                }
                Some(Err(error)) => {
                    warn!(link_id, %error, "link: transport error");
                    break CLOSE_ABNORMAL;
                }
                None => break CLOSE_ABNORMAL,
            },
        }
    };

    debug!(link_id, code, "link: closed");
    inner.handle_close(link_id, code);
}

/// Reattach generation `epoch` after the reconnect delay, retrying until it
/// succeeds or the generation ends.
async fn resume_loop<C: Codec>(inner: Arc<Inner<C>>, epoch: u64) {
    let mut attempt: u32 = 0;
    loop {
        tokio::time::sleep(inner.config.reconnect_delay).await;
        attempt += 1;

        let target = {
            let shared = inner.lock();
            if shared.closed || shared.epoch != epoch {
                debug!(epoch, "client: resume loop superseded");
                return;
            }
            match (&shared.endpoint, &shared.session.resume) {
                (Some(endpoint), Some(resume)) => Some(reconnect::resume_url(endpoint, resume)),
                _ => None,
            }
        };
        let Some(url) = target else {
            inner.give_up(epoch, "no session to resume".to_owned());
            return;
        };

        let request = match transport::handshake_request::<C>(&url, None) {
            Ok(request) => request,
            Err(error) => {
                inner.give_up(epoch, error.to_string());
                return;
            }
        };

        match transport::open(request, inner.config.connect_timeout).await {
            Ok(stream) => {
                if inner
                    .install(epoch, None, stream, ConnectionStatus::Connected)
                    .is_ok()
                {
                    info!(attempt, "client: session resumed");
                }
                return;
            }
            Err(error) => {
                warn!(attempt, %error, "client: resume attempt failed");
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
