use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::conference::{
    ChairPolicy, Conference, ConferenceConfig, Origin, Outgoing, QueueSnapshot, Rejection,
};
use crate::error::{BfcpError, Result};
use crate::protocol::{
    Arguments, AttributeType, Direction, ErrorCode, ErrorValue, Primitive, build_message,
    parse_message,
};
use crate::transport::{
    Endpoint, MessageSink, SEND_TIMEOUT, TcpSink, TransportKind, UdpTransport, tcp, udp,
};
use crate::watchdog::{ExpiryHook, WatchdogKey, Watchdogs};

/// Invoked for every message the server parses or builds.
pub type MessageCallback = Arc<dyn Fn(&Arguments, Direction) + Send + Sync>;

/// Source address filter applied to TCP peers and UDP datagrams.
///
/// Parsed from a dotted quad where an octet of 0 matches anything, so
/// `192.168.0.0` admits the whole 192.168/16 range and `0.0.0.0` admits
/// every peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpRestriction {
    octets: [u8; 4],
}

impl IpRestriction {
    pub const UNRESTRICTED: Self = Self { octets: [0; 4] };

    /// Anything that is not four octets in `0..=254` yields
    /// [`UNRESTRICTED`](Self::UNRESTRICTED).
    pub fn parse(text: &str) -> Self {
        let mut octets = [0u8; 4];
        let mut parts = text.trim().split('.');
        for octet in &mut octets {
            match parts.next().map(str::parse::<u8>) {
                Some(Ok(value)) if value <= 254 => *octet = value,
                _ => return Self::UNRESTRICTED,
            }
        }
        if parts.next().is_some() {
            return Self::UNRESTRICTED;
        }
        Self { octets }
    }

    pub fn is_unrestricted(&self) -> bool {
        *self == Self::UNRESTRICTED
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let v4 = match ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => v4,
                None => return false,
            },
        };
        self.octets
            .iter()
            .zip(v4.octets())
            .all(|(&allowed, actual)| allowed == 0 || allowed == actual)
    }
}

impl fmt::Display for IpRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets;
        write!(f, "{}", Ipv4Addr::new(a, b, c, d))
    }
}

/// Server-wide limits and policies.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on simultaneously existing conferences.
    pub max_conferences: usize,
    pub allow: IpRestriction,
    /// Write timeout applied to every outbound message.
    pub send_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_conferences: 16,
            allow: IpRestriction::UNRESTRICTED,
            send_timeout: SEND_TIMEOUT,
        }
    }
}

struct ServerState {
    config: ServerConfig,
    conferences: Vec<Conference>,
}

impl ServerState {
    fn conference_mut(&mut self, id: u32) -> Option<&mut Conference> {
        self.conferences.iter_mut().find(|c| c.id() == id)
    }
}

/// State shared between the [`Server`] handle, transport threads and
/// watchdog timers.
///
/// Every engine operation runs under the `state` lock. Messages are built
/// and sent after it is released.
pub(crate) struct ServerInner {
    state: Mutex<ServerState>,
    sink: RwLock<Option<Arc<dyn MessageSink>>>,
    callback: RwLock<Option<MessageCallback>>,
    /// Shared by every conference's timers, including recreated ones.
    timer_generations: Arc<AtomicU64>,
}

fn error_reply(origin: &Origin, rejection: Rejection) -> Outgoing {
    Outgoing {
        endpoint: origin.endpoint,
        arguments: Arguments::new(Primitive::Error, origin.entity)
            .with_error(ErrorValue::new(rejection.code))
            .with_error_info(rejection.info),
    }
}

impl ServerInner {
    pub(crate) fn is_allowed(&self, ip: IpAddr) -> bool {
        self.state.lock().config.allow.allows(ip)
    }

    /// Parse one received message, run it through the engine and send
    /// whatever it produced.
    pub(crate) fn handle_message(&self, endpoint: Endpoint, buf: &[u8]) -> Result<()> {
        let message = match parse_message(buf) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "dropping malformed message");
                return Err(e);
            }
        };
        if let Some(arguments) = &message.arguments {
            self.notify_callback(arguments, Direction::Incoming);
        }

        let Some(entity) = message.entity else {
            tracing::warn!(
                %endpoint,
                errors = ?message.errors,
                "dropping message with invalid header"
            );
            return Ok(());
        };
        let origin = Origin::new(entity, endpoint);

        let Some(arguments) = message.arguments.as_ref() else {
            tracing::debug!(%endpoint, primitive = message.primitive, "unknown primitive");
            self.deliver(vec![error_reply(
                &origin,
                Rejection::new(
                    ErrorCode::UnknownPrimitive,
                    format!("Unknown primitive {}", message.primitive),
                ),
            )]);
            return Ok(());
        };

        let unknown = message.unknown_mandatory();
        if !unknown.is_empty() {
            tracing::debug!(%endpoint, ?unknown, "unknown mandatory attributes");
            self.deliver(vec![Outgoing {
                endpoint,
                arguments: Arguments::new(Primitive::Error, entity)
                    .with_error(ErrorValue::unknown_attributes(unknown))
                    .with_error_info("Unknown Mandatory Attributes in the header"),
            }]);
            return Ok(());
        }
        if let Some(error) = message.attribute_errors().next() {
            tracing::debug!(%endpoint, errors = ?message.errors, "attribute parse errors");
            self.deliver(vec![error_reply(
                &origin,
                Rejection::new(
                    ErrorCode::ParseError,
                    format!("Error parsing attribute {} ({:?})", error.attribute, error.code),
                ),
            )]);
            return Ok(());
        }

        let out = self.dispatch(&origin, arguments);
        self.deliver(out);
        Ok(())
    }

    fn dispatch(&self, origin: &Origin, args: &Arguments) -> Vec<Outgoing> {
        let primitive = args.primitive;
        match primitive {
            p if p.is_ack() => {
                tracing::trace!(
                    endpoint = %origin.endpoint,
                    primitive = %p,
                    "acknowledgement received"
                );
                return Vec::new();
            }
            Primitive::FloorRequest
            | Primitive::FloorRelease
            | Primitive::ChairAction
            | Primitive::FloorRequestQuery
            | Primitive::UserQuery
            | Primitive::FloorQuery
            | Primitive::Hello => {}
            other => {
                return vec![error_reply(
                    origin,
                    Rejection::new(
                        ErrorCode::UnknownPrimitive,
                        format!("Unknown primitive {}", other.code()),
                    ),
                )];
            }
        }

        let conference_id = args.entity.conference_id;
        let user_id = origin.user_id();
        tracing::debug!(endpoint = %origin.endpoint, %primitive, conference_id, user_id, "request");

        let mut state = self.state.lock();
        let result = state
            .conference_mut(conference_id)
            .ok_or_else(|| {
                Rejection::new(
                    ErrorCode::ConferenceDoesNotExist,
                    format!("Conference {conference_id} does not exist"),
                )
            })
            .and_then(|conference| {
                conference.check_user(user_id)?;
                conference.bind_user(user_id, origin.endpoint);
                match primitive {
                    Primitive::FloorRequest => conference.request_floor(origin, args),
                    Primitive::FloorRelease => {
                        conference.release_floor(origin, args.floor_request_id.unwrap_or(0))
                    }
                    Primitive::ChairAction => {
                        conference.chair_action(origin, args.floor_request_info.first())
                    }
                    Primitive::FloorRequestQuery => conference
                        .query_floor_request(origin, args.floor_request_id.unwrap_or(0)),
                    Primitive::UserQuery => conference.query_user(origin, args.beneficiary_id),
                    Primitive::FloorQuery => conference.query_floors(origin, &args.floor_ids),
                    _ => Ok(vec![Outgoing {
                        endpoint: origin.endpoint,
                        arguments: Arguments::new(Primitive::HelloAck, origin.entity)
                            .with_supported(&Primitive::SUPPORTED, &AttributeType::ALL),
                    }]),
                }
            });
        drop(state);

        result.unwrap_or_else(|rejection| {
            tracing::debug!(
                endpoint = %origin.endpoint,
                %primitive,
                code = %rejection.code,
                info = %rejection.info,
                "request rejected"
            );
            vec![error_reply(origin, rejection)]
        })
    }

    fn expire(&self, conference_id: u32, key: WatchdogKey, generation: u64) {
        let out = self
            .state
            .lock()
            .conference_mut(conference_id)
            .map(|conference| conference.expire(key, generation))
            .unwrap_or_default();
        self.deliver(out);
    }

    fn notify_callback(&self, arguments: &Arguments, direction: Direction) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(arguments, direction);
        }
    }

    /// Build and send engine output. Must be called without the state lock.
    fn deliver(&self, out: Vec<Outgoing>) {
        if out.is_empty() {
            return;
        }
        let sink = self.sink.read().clone();
        for Outgoing {
            endpoint,
            arguments,
        } in out
        {
            let message = match build_message(&arguments) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(
                        %endpoint,
                        primitive = %arguments.primitive,
                        error = %e,
                        "failed to build message"
                    );
                    continue;
                }
            };
            self.notify_callback(&arguments, Direction::Outgoing);
            match &sink {
                Some(sink) => {
                    if let Err(e) = sink.send(&endpoint, &message) {
                        tracing::warn!(
                            %endpoint,
                            primitive = %arguments.primitive,
                            error = %e,
                            "send failed"
                        );
                    }
                }
                None => {
                    tracing::trace!(
                        %endpoint,
                        primitive = %arguments.primitive,
                        "no transport, message dropped"
                    );
                }
            }
        }
    }
}

/// High-level BFCP floor control server.
///
/// Owns every conference behind a single lock, the transport that feeds
/// [`handle_message`](Self::handle_message), and the sink replies and
/// notifications leave through.
pub struct Server {
    inner: Arc<ServerInner>,
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    tcp: Option<Arc<TcpSink>>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    /// `max_conferences` below 1 is raised to 1.
    pub fn with_config(bind_addr: &str, mut config: ServerConfig) -> Self {
        config.max_conferences = config.max_conferences.max(1);
        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(ServerState {
                    config,
                    conferences: Vec::new(),
                }),
                sink: RwLock::new(None),
                callback: RwLock::new(None),
                timer_generations: Arc::new(AtomicU64::new(0)),
            }),
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            tcp: None,
        }
    }

    /// Bind the transport and start serving in background threads.
    pub fn start(&mut self, kind: TransportKind) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(BfcpError::AlreadyRunning);
        }
        let send_timeout = self.inner.state.lock().config.send_timeout;
        let inner = self.inner.clone();
        let running = self.running.clone();

        let spawned = match kind {
            TransportKind::Tcp => {
                let listener = TcpListener::bind(&self.bind_addr)?;
                listener.set_nonblocking(true)?;
                self.local_addr = Some(listener.local_addr()?);
                let sink = Arc::new(TcpSink::new(send_timeout));
                *self.inner.sink.write() = Some(sink.clone());
                self.tcp = Some(sink.clone());
                self.running.store(true, Ordering::SeqCst);
                thread::Builder::new()
                    .name("bfcp-accept".into())
                    .spawn(move || tcp::accept_loop(listener, inner, sink, running))
            }
            TransportKind::Udp => {
                let transport = Arc::new(UdpTransport::bind(&self.bind_addr, send_timeout)?);
                self.local_addr = Some(transport.local_addr()?);
                *self.inner.sink.write() = Some(transport.clone());
                self.running.store(true, Ordering::SeqCst);
                thread::Builder::new()
                    .name("bfcp-udp".into())
                    .spawn(move || udp::receive_loop(transport, inner, running))
            }
        };
        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        tracing::info!(addr = %self.bind_addr, transport = ?kind, "BFCP server listening");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tcp) = self.tcp.take() {
            tcp.close_all();
        }
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the transport is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Replace the outbound transport. [`start`](Self::start) installs its
    /// own; this is for embedding the engine in another transport.
    pub fn set_sink(&self, sink: Arc<dyn MessageSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    pub fn set_callback(&self, callback: impl Fn(&Arguments, Direction) + Send + Sync + 'static) {
        *self.inner.callback.write() = Some(Arc::new(callback));
    }

    /// Feed one received message into the server.
    pub fn handle_message(&self, endpoint: &Endpoint, buf: &[u8]) -> Result<()> {
        self.inner.handle_message(*endpoint, buf)
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.inner.is_allowed(ip)
    }

    pub fn config(&self) -> ServerConfig {
        self.inner.state.lock().config.clone()
    }

    pub fn conference_ids(&self) -> Vec<u32> {
        self.inner
            .state
            .lock()
            .conferences
            .iter()
            .map(Conference::id)
            .collect()
    }

    pub fn add_conference(&self, conference_id: u32, config: ConferenceConfig) -> Result<()> {
        let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
        let hook: ExpiryHook = Arc::new(move |key: WatchdogKey, generation: u64| {
            if let Some(inner) = weak.upgrade() {
                inner.expire(conference_id, key, generation);
            }
        });

        let mut state = self.inner.state.lock();
        if state.conferences.iter().any(|c| c.id() == conference_id) {
            return Err(BfcpError::ConferenceExists(conference_id));
        }
        if state.conferences.len() >= state.config.max_conferences {
            return Err(BfcpError::ConferenceLimitReached(state.config.max_conferences));
        }
        let watchdogs = Watchdogs::sharing(Some(hook), self.inner.timer_generations.clone());
        let conference = Conference::new(conference_id, config, watchdogs)?;
        state.conferences.push(conference);
        Ok(())
    }

    pub fn remove_conference(&self, conference_id: u32) -> Result<()> {
        let mut state = self.inner.state.lock();
        let index = state
            .conferences
            .iter()
            .position(|c| c.id() == conference_id)
            .ok_or(BfcpError::ConferenceNotFound(conference_id))?;
        state.conferences.remove(index);
        tracing::info!(conference_id, "conference removed");
        Ok(())
    }

    /// Change the conference limit, destroying the most recently created
    /// conferences beyond it.
    pub fn change_max_conferences(&self, max_conferences: usize) -> Result<()> {
        if max_conferences == 0 {
            return Err(BfcpError::InvalidArgument("max conferences 0"));
        }
        let mut state = self.inner.state.lock();
        state.config.max_conferences = max_conferences;
        if state.conferences.len() > max_conferences {
            let removed = state.conferences.split_off(max_conferences);
            tracing::info!(
                removed = ?removed.iter().map(Conference::id).collect::<Vec<_>>(),
                "conferences removed by new limit"
            );
        }
        Ok(())
    }

    pub fn change_chair_policy(
        &self,
        conference_id: u32,
        policy: ChairPolicy,
        chair_wait: Duration,
    ) -> Result<()> {
        self.with_conference(conference_id, |conference| {
            conference.set_policy(policy, chair_wait);
            Ok(())
        })
    }

    /// Set the per-floor request limit of every conference.
    pub fn change_user_request_limit(&self, limit: u16) -> Result<()> {
        if limit == 0 {
            return Err(BfcpError::InvalidArgument("request limit 0"));
        }
        let mut state = self.inner.state.lock();
        for conference in &mut state.conferences {
            conference.set_request_limit(limit)?;
        }
        Ok(())
    }

    /// `chair` 0 leaves the floor without a chair.
    pub fn add_floor(
        &self,
        conference_id: u32,
        floor_id: u16,
        chair: u16,
        capacity: u16,
    ) -> Result<()> {
        let chair = (chair != 0).then_some(chair);
        self.with_conference(conference_id, |conference| {
            conference.add_floor(floor_id, chair, capacity)
        })
    }

    pub fn remove_floor(&self, conference_id: u32, floor_id: u16) -> Result<()> {
        self.administer(conference_id, |conference| conference.remove_floor(floor_id))
    }

    /// Change how many floors a conference may hold, deleting the newest
    /// floors beyond the limit.
    pub fn change_max_floors(&self, conference_id: u32, max_floors: usize) -> Result<()> {
        self.administer(conference_id, |conference| {
            conference.resize_floors(max_floors)
        })
    }

    pub fn set_chair(&self, conference_id: u32, floor_id: u16, chair: u16) -> Result<()> {
        self.with_conference(conference_id, |conference| {
            conference.set_chair(floor_id, chair)
        })
    }

    pub fn remove_chair(&self, conference_id: u32, floor_id: u16) -> Result<()> {
        self.administer(conference_id, |conference| conference.remove_chair(floor_id))
    }

    /// `limit` 0 removes the bound.
    pub fn set_floor_capacity(&self, conference_id: u32, floor_id: u16, limit: u16) -> Result<()> {
        self.administer(conference_id, |conference| {
            conference.set_floor_capacity(floor_id, limit)
        })
    }

    pub fn add_user(
        &self,
        conference_id: u32,
        user_id: u16,
        uri: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<()> {
        self.with_conference(conference_id, |conference| {
            conference.add_user(
                user_id,
                uri.map(str::to_string),
                display_name.map(str::to_string),
            )
        })
    }

    pub fn remove_user(&self, conference_id: u32, user_id: u16) -> Result<()> {
        self.administer(conference_id, |conference| conference.remove_user(user_id))
    }

    pub fn set_user_address(
        &self,
        conference_id: u32,
        user_id: u16,
        address: SocketAddr,
    ) -> Result<()> {
        self.with_conference(conference_id, |conference| {
            conference.set_user_address(user_id, address)
        })
    }

    pub fn user_address(&self, conference_id: u32, user_id: u16) -> Result<Option<SocketAddr>> {
        self.with_conference(conference_id, |conference| conference.user_address(user_id))
    }

    pub fn snapshot(&self, conference_id: u32) -> Result<QueueSnapshot> {
        self.with_conference(conference_id, |conference| Ok(conference.snapshot()))
    }

    pub fn floor_occupancy(&self, conference_id: u32, floor_id: u16) -> Result<u16> {
        self.with_conference(conference_id, |conference| {
            conference
                .floors()
                .occupancy(floor_id)
                .ok_or(BfcpError::FloorNotFound(floor_id))
        })
    }

    /// Outstanding requests of `user_id` on `floor_id`.
    pub fn outstanding_requests(
        &self,
        conference_id: u32,
        user_id: u16,
        floor_id: u16,
    ) -> Result<u16> {
        self.with_conference(conference_id, |conference| {
            conference
                .users()
                .get(user_id)
                .map(|user| user.outstanding(floor_id))
                .ok_or(BfcpError::UserNotFound(user_id))
        })
    }

    fn with_conference<T>(
        &self,
        conference_id: u32,
        f: impl FnOnce(&mut Conference) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.inner.state.lock();
        let conference = state
            .conference_mut(conference_id)
            .ok_or(BfcpError::ConferenceNotFound(conference_id))?;
        f(conference)
    }

    /// Run an administrative change and send the notifications it caused.
    fn administer(
        &self,
        conference_id: u32,
        f: impl FnOnce(&mut Conference) -> Result<Vec<Outgoing>>,
    ) -> Result<()> {
        let out = self.with_conference(conference_id, f)?;
        self.inner.deliver(out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Entity, ReceivedMessage, RequestStatus};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Endpoint, Vec<u8>)>>,
    }

    impl MessageSink for Recorder {
        fn send(&self, endpoint: &Endpoint, message: &[u8]) -> std::io::Result<()> {
            self.sent.lock().push((*endpoint, message.to_vec()));
            Ok(())
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<ReceivedMessage> {
            self.sent
                .lock()
                .drain(..)
                .map(|(_, bytes)| parse_message(&bytes).unwrap())
                .collect()
        }
    }

    fn server() -> (Server, Arc<Recorder>) {
        let server = Server::new("127.0.0.1:0");
        let recorder = Arc::new(Recorder::default());
        server.set_sink(recorder.clone());
        server.add_conference(1, ConferenceConfig::default()).unwrap();
        server.add_user(1, 5, Some("sip:alice@example.com"), Some("Alice")).unwrap();
        (server, recorder)
    }

    fn send(server: &Server, args: &Arguments) {
        let bytes = build_message(args).unwrap();
        server.handle_message(&Endpoint::Connection(1), &bytes).unwrap();
    }

    #[test]
    fn ip_restriction_parse() {
        assert_eq!(IpRestriction::parse("192.168.0.0").to_string(), "192.168.0.0");
        assert!(IpRestriction::parse("10.0.0.255").is_unrestricted());
        assert!(IpRestriction::parse("10.0.0").is_unrestricted());
        assert!(IpRestriction::parse("10.0.0.1.1").is_unrestricted());
        assert!(IpRestriction::parse("garbage").is_unrestricted());
    }

    #[test]
    fn ip_restriction_wildcards() {
        let allow = IpRestriction::parse("192.168.0.0");
        assert!(allow.allows("192.168.4.20".parse().unwrap()));
        assert!(!allow.allows("10.1.1.1".parse().unwrap()));
        assert!(allow.allows("::ffff:192.168.1.1".parse().unwrap()));
        assert!(!allow.allows("::1".parse().unwrap()));
        assert!(IpRestriction::UNRESTRICTED.allows("::1".parse().unwrap()));
    }

    #[test]
    fn hello_gets_hello_ack() {
        let (server, recorder) = server();
        send(&server, &Arguments::new(Primitive::Hello, Entity::new(1, 3, 5)));

        let replies = recorder.take();
        assert_eq!(replies.len(), 1);
        let ack = replies[0].arguments.as_ref().unwrap();
        assert_eq!(ack.primitive, Primitive::HelloAck);
        assert_eq!(ack.entity, Entity::new(1, 3, 5));
        assert_eq!(ack.supported_primitives.len(), 13);
        assert_eq!(ack.supported_attributes.len(), 20);
    }

    #[test]
    fn unknown_conference_and_user() {
        let (server, recorder) = server();
        send(&server, &Arguments::new(Primitive::Hello, Entity::new(9, 3, 5)));
        send(&server, &Arguments::new(Primitive::Hello, Entity::new(1, 3, 6)));

        let codes: Vec<_> = recorder
            .take()
            .iter()
            .filter_map(|m| m.arguments.as_ref())
            .filter_map(|a| a.error.as_ref())
            .map(|e| e.code)
            .collect();
        assert_eq!(
            codes,
            vec![ErrorCode::ConferenceDoesNotExist, ErrorCode::UserDoesNotExist]
        );
    }

    #[test]
    fn server_only_primitive_rejected() {
        let (server, recorder) = server();
        send(&server, &Arguments::new(Primitive::ChairActionAck, Entity::new(1, 3, 5)));
        let replies = recorder.take();
        let error = replies[0].arguments.as_ref().unwrap().error.as_ref().unwrap();
        assert_eq!(error.code, ErrorCode::UnknownPrimitive);

        send(&server, &Arguments::new(Primitive::FloorStatusAck, Entity::new(1, 3, 5)));
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn callback_sees_both_directions() {
        let (server, _recorder) = server();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        server.set_callback(move |args, direction| log.lock().push((args.primitive, direction)));

        send(&server, &Arguments::new(Primitive::Hello, Entity::new(1, 3, 5)));
        assert_eq!(
            *seen.lock(),
            vec![
                (Primitive::Hello, Direction::Incoming),
                (Primitive::HelloAck, Direction::Outgoing)
            ]
        );
    }

    #[test]
    fn conference_limits() {
        let server = Server::with_config(
            "127.0.0.1:0",
            ServerConfig {
                max_conferences: 2,
                ..Default::default()
            },
        );
        server.add_conference(1, ConferenceConfig::default()).unwrap();
        assert!(matches!(
            server.add_conference(1, ConferenceConfig::default()),
            Err(BfcpError::ConferenceExists(1))
        ));
        server.add_conference(2, ConferenceConfig::default()).unwrap();
        assert!(matches!(
            server.add_conference(3, ConferenceConfig::default()),
            Err(BfcpError::ConferenceLimitReached(2))
        ));

        server.change_max_conferences(1).unwrap();
        assert_eq!(server.conference_ids(), vec![1]);
        assert!(server.change_max_conferences(0).is_err());
        server.remove_conference(1).unwrap();
        assert!(server.remove_conference(1).is_err());
    }

    #[test]
    fn floor_administration() {
        let (server, _recorder) = server();
        assert!(matches!(
            server.add_floor(1, 10, 7, 1),
            Err(BfcpError::UserNotFound(7))
        ));
        server.add_floor(1, 10, 5, 1).unwrap();
        assert!(matches!(
            server.add_floor(1, 10, 0, 1),
            Err(BfcpError::FloorExists(10))
        ));
        assert_eq!(server.floor_occupancy(1, 10).unwrap(), 0);
        server.remove_chair(1, 10).unwrap();
        server.remove_floor(1, 10).unwrap();
        assert!(server.floor_occupancy(1, 10).is_err());
        assert!(matches!(
            server.add_floor(2, 10, 0, 1),
            Err(BfcpError::ConferenceNotFound(2))
        ));
    }

    #[test]
    fn user_address_round_trip() {
        let (server, _recorder) = server();
        assert_eq!(server.user_address(1, 5).unwrap(), None);
        let addr: SocketAddr = "10.0.0.7:5070".parse().unwrap();
        server.set_user_address(1, 5, addr).unwrap();
        assert_eq!(server.user_address(1, 5).unwrap(), Some(addr));
        assert!(server.user_address(1, 6).is_err());
    }

    #[test]
    fn stale_expiry_spares_recreated_conference() {
        let (server, recorder) = server();
        server.add_user(1, 6, None, Some("Chair")).unwrap();
        server.add_floor(1, 10, 6, 1).unwrap();
        let request = Arguments::new(Primitive::FloorRequest, Entity::new(1, 3, 5)).with_floor(10);
        send(&server, &request);
        recorder.take();

        server.remove_conference(1).unwrap();
        server.add_conference(1, ConferenceConfig::default()).unwrap();
        server.add_user(1, 5, None, None).unwrap();
        server.add_user(1, 6, None, Some("Chair")).unwrap();
        server.add_floor(1, 10, 6, 1).unwrap();
        send(&server, &request);
        recorder.take();

        // Timer of the discarded conference fires late.
        let key = WatchdogKey {
            floor_request_id: 1,
            floor_id: 10,
        };
        server.inner.expire(1, key, 1);
        assert!(recorder.take().is_empty());

        let query = Arguments::new(Primitive::FloorRequestQuery, Entity::new(1, 4, 5))
            .with_floor_request_id(1);
        send(&server, &query);
        let replies = recorder.take();
        let reply = replies[0].arguments.as_ref().unwrap();
        assert_eq!(reply.primitive, Primitive::FloorRequestStatus);
        let status = reply.floor_request_info[0].requested_status().unwrap();
        assert_eq!(status.status, RequestStatus::Pending);
    }

    #[test]
    fn start_twice_fails() {
        let mut server = Server::new("127.0.0.1:0");
        server.start(TransportKind::Udp).unwrap();
        assert!(server.local_addr().is_some());
        assert!(matches!(
            server.start(TransportKind::Udp),
            Err(BfcpError::AlreadyRunning)
        ));
        server.stop();
        assert!(!server.is_running());
    }
}
