//! Relay engine.
//!
//! # Responsibilities
//! - Split both connections and run one pump per direction
//! - Decode one packet, authorize it, intercept it, write it, repeat
//! - Stop both pumps when either one stops, then close both connections

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mqttrs::Packet;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::mqtt::{ControlPacket, MqttCodec, PacketType};
use crate::observability::metrics::{self, PacketOutcome};
use crate::session::{Direction, Handler, Interceptor, SessionError, SessionInfo, VetoPolicy};

/// Upper bound on flushing and shutting down a destination after a pump stops.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One client connection paired with one upstream connection.
pub struct Session<C, U> {
    info: SessionInfo,
    client: C,
    upstream: U,
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
    veto_policy: VetoPolicy,
    codec: MqttCodec,
}

impl<C, U> Session<C, U>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(info: SessionInfo, client: C, upstream: U, handler: Arc<dyn Handler>) -> Self {
        Self {
            info,
            client,
            upstream,
            handler,
            interceptor: None,
            veto_policy: VetoPolicy::default(),
            codec: MqttCodec::default(),
        }
    }

    pub fn with_interceptor(mut self, interceptor: Option<Arc<dyn Interceptor>>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn with_veto_policy(mut self, veto_policy: VetoPolicy) -> Self {
        self.veto_policy = veto_policy;
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.codec = MqttCodec::new(max_packet_size);
        self
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Relay until either side closes, a fatal error occurs or `shutdown` fires.
    ///
    /// Returns once both pumps have stopped and both connections are closed.
    /// Clean end of stream and cancellation return `Ok(())`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SessionError> {
        let token = shutdown.child_token();
        let session_id = self.info.id;

        let (client_rd, client_wr) = tokio::io::split(self.client);
        let (upstream_rd, upstream_wr) = tokio::io::split(self.upstream);
        let (identity_tx, identity_rx) = watch::channel(Arc::new(self.info));

        let upstream = Pump {
            direction: Direction::Upstream,
            source: FramedRead::new(client_rd, self.codec),
            sink: FramedWrite::new(upstream_wr, self.codec),
            identity: Identity::Owner(identity_tx),
            handler: Arc::clone(&self.handler),
            interceptor: self.interceptor.clone(),
            veto_policy: self.veto_policy,
            token: token.clone(),
        };
        let downstream = Pump {
            direction: Direction::Downstream,
            source: FramedRead::new(upstream_rd, self.codec),
            sink: FramedWrite::new(client_wr, self.codec),
            identity: Identity::Observer(identity_rx),
            handler: self.handler,
            interceptor: self.interceptor,
            veto_policy: self.veto_policy,
            token,
        };

        tracing::debug!(%session_id, "Session started");

        let (up, down) = tokio::join!(tokio::spawn(upstream.run()), tokio::spawn(downstream.run()));
        let result = joined(up).and(joined(down));

        match &result {
            Ok(()) => tracing::debug!(%session_id, "Session ended"),
            Err(error) => tracing::debug!(%session_id, %error, "Session failed"),
        }
        result
    }
}

fn joined(result: Result<Result<(), SessionError>, JoinError>) -> Result<(), SessionError> {
    result.unwrap_or_else(|e| Err(SessionError::Task(e.to_string())))
}

/// Why a pump stopped early.
enum Halt {
    Cancelled,
    Failed(SessionError),
}

impl From<SessionError> for Halt {
    fn from(err: SessionError) -> Self {
        Halt::Failed(err)
    }
}

/// Race `fut` against the session token.
async fn cancellable<F: Future>(token: &CancellationToken, fut: F) -> Result<F::Output, Halt> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Halt::Cancelled),
        out = fut => Ok(out),
    }
}

/// Session identity as seen from one pump.
///
/// The Upstream pump sees CONNECT and owns the identity; the Downstream pump
/// observes it.
enum Identity {
    Owner(watch::Sender<Arc<SessionInfo>>),
    Observer(watch::Receiver<Arc<SessionInfo>>),
}

impl Identity {
    fn current(&self) -> Arc<SessionInfo> {
        match self {
            Identity::Owner(tx) => tx.borrow().clone(),
            Identity::Observer(rx) => rx.borrow().clone(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut SessionInfo)) -> Arc<SessionInfo> {
        if let Identity::Owner(tx) = self {
            tx.send_modify(|info| f(Arc::make_mut(info)));
        }
        self.current()
    }
}

struct Pump<R, W> {
    direction: Direction,
    source: FramedRead<R, MqttCodec>,
    sink: FramedWrite<W, MqttCodec>,
    identity: Identity,
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
    veto_policy: VetoPolicy,
    token: CancellationToken,
}

impl<R, W> Pump<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn run(mut self) -> Result<(), SessionError> {
        let result = self.relay().await;

        let stopped_by_sibling = self.token.is_cancelled();
        self.token.cancel();
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.sink.close()).await;

        match result {
            Ok(()) | Err(Halt::Cancelled) => Ok(()),
            // the other side is already tearing the session down
            Err(Halt::Failed(SessionError::Io { .. })) if stopped_by_sibling => Ok(()),
            Err(Halt::Failed(err)) => Err(err),
        }
    }

    async fn relay(&mut self) -> Result<(), Halt> {
        let token = self.token.clone();
        let direction = self.direction;

        loop {
            let packet = match cancellable(&token, self.source.next()).await? {
                None => {
                    tracing::debug!(session_id = %self.identity.current().id, %direction, "End of stream");
                    return Ok(());
                }
                Some(Ok(packet)) => packet,
                Some(Err(err)) => return Err(SessionError::from_packet(direction, err).into()),
            };

            tracing::trace!(
                %direction,
                packet_type = %packet.packet_type(),
                len = packet.len(),
                "Packet read"
            );

            match direction {
                Direction::Upstream => self.authorize(&packet).await?,
                Direction::Downstream => self.authorize_delivery(&packet).await?,
            }

            let Some(packet) = self.intercept(packet).await? else {
                continue;
            };

            cancellable(&token, self.sink.send(packet.clone()))
                .await?
                .map_err(|err| SessionError::from_packet(direction, err))?;
            metrics::record_packet(direction, PacketOutcome::Forwarded);

            if direction == Direction::Upstream {
                self.notify(&packet).await?;
            }
        }
    }

    /// Client-to-target authorization through the handler.
    async fn authorize(&mut self, packet: &ControlPacket) -> Result<(), Halt> {
        let direction = self.direction;
        let token = self.token.clone();
        let handler = Arc::clone(&self.handler);
        let denied = |source| Halt::Failed(SessionError::Unauthorized { direction, source });
        let malformed = |source| Halt::Failed(SessionError::Decode { direction, source });

        match packet.packet_type() {
            PacketType::Connect => {
                let Packet::Connect(connect) = packet.parse().map_err(malformed)? else {
                    return Ok(());
                };
                let info = self.identity.update(|info| {
                    info.client_id = connect.client_id.to_string();
                    info.username = connect.username.unwrap_or_default().to_string();
                    info.password = connect.password.map(<[u8]>::to_vec).unwrap_or_default();
                });
                cancellable(&token, handler.auth_connect(&info)).await?.map_err(denied)
            }
            PacketType::Publish => {
                let Packet::Publish(publish) = packet.parse().map_err(malformed)? else {
                    return Ok(());
                };
                let info = self.identity.current();
                cancellable(&token, handler.auth_publish(&info, publish.topic_name, publish.payload))
                    .await?
                    .map_err(denied)
            }
            PacketType::Subscribe => {
                let Packet::Subscribe(subscribe) = packet.parse().map_err(malformed)? else {
                    return Ok(());
                };
                let topics: Vec<String> = subscribe.topics.iter().map(|t| t.topic_path.clone()).collect();
                let info = self.identity.current();
                cancellable(&token, handler.auth_subscribe(&info, &topics)).await?.map_err(denied)
            }
            _ => Ok(()),
        }
    }

    /// Target-to-client authorization: the client must be allowed to receive
    /// every PUBLISH the target delivers. A refusal disconnects the client.
    async fn authorize_delivery(&mut self, packet: &ControlPacket) -> Result<(), Halt> {
        if packet.packet_type() != PacketType::Publish {
            return Ok(());
        }

        let direction = self.direction;
        let token = self.token.clone();
        let Packet::Publish(publish) = packet
            .parse()
            .map_err(|source| Halt::Failed(SessionError::Decode { direction, source }))?
        else {
            return Ok(());
        };

        let topics = vec![publish.topic_name.to_string()];
        let info = self.identity.current();
        if let Err(source) = cancellable(&token, self.handler.auth_subscribe(&info, &topics)).await? {
            tracing::warn!(
                session_id = %info.id,
                topic = %topics[0],
                error = %source,
                "Delivery refused, disconnecting client"
            );
            let _ = cancellable(&token, self.sink.send(ControlPacket::disconnect())).await;
            return Err(SessionError::Unauthorized { direction, source }.into());
        }
        Ok(())
    }

    async fn intercept(&mut self, packet: ControlPacket) -> Result<Option<ControlPacket>, Halt> {
        let Some(interceptor) = self.interceptor.clone() else {
            return Ok(Some(packet));
        };

        let direction = self.direction;
        let token = self.token.clone();
        let info = self.identity.current();
        let packet_type = packet.packet_type();

        match cancellable(&token, interceptor.intercept(&info, packet, direction)).await? {
            Ok(Some(packet)) => Ok(Some(packet)),
            Ok(None) => {
                metrics::record_packet(direction, PacketOutcome::Dropped);
                tracing::debug!(session_id = %info.id, %direction, %packet_type, "Packet dropped by interceptor");
                Ok(None)
            }
            Err(source) => {
                metrics::record_packet(direction, PacketOutcome::Vetoed);
                tracing::info!(
                    session_id = %info.id,
                    %direction,
                    %packet_type,
                    reason = %source,
                    policy = ?self.veto_policy,
                    "Packet vetoed"
                );
                match self.veto_policy {
                    VetoPolicy::Continue => Ok(None),
                    VetoPolicy::Terminate => Err(SessionError::Vetoed { direction, source }.into()),
                }
            }
        }
    }

    /// Tell the handler about a packet that reached the target.
    async fn notify(&mut self, packet: &ControlPacket) -> Result<(), Halt> {
        let info = self.identity.current();
        let token = &self.token;
        let handler = &self.handler;

        let outcome = match packet.packet_type() {
            PacketType::Connect => cancellable(token, handler.connect(&info)).await?,
            PacketType::Disconnect => cancellable(token, handler.disconnect(&info)).await?,
            PacketType::Publish | PacketType::Subscribe | PacketType::Unsubscribe => match packet.parse() {
                Ok(Packet::Publish(p)) => cancellable(token, handler.publish(&info, p.topic_name, p.payload)).await?,
                Ok(Packet::Subscribe(s)) => {
                    let topics: Vec<String> = s.topics.iter().map(|t| t.topic_path.clone()).collect();
                    cancellable(token, handler.subscribe(&info, &topics)).await?
                }
                Ok(Packet::Unsubscribe(u)) => cancellable(token, handler.unsubscribe(&info, &u.topics)).await?,
                _ => Ok(()),
            },
            _ => Ok(()),
        };

        if let Err(error) = outcome {
            tracing::warn!(session_id = %info.id, %error, "Handler notification failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AllowAll, HandlerError, InterceptError};
    use async_trait::async_trait;
    use mqttrs::{
        Connack, Connect, ConnectReturnCode, Pid, Protocol, Publish, QoS, QosPid, Subscribe, SubscribeTopic, Unsubscribe,
    };
    use std::sync::Mutex;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio_util::codec::Framed;

    const DEADLINE: Duration = Duration::from_secs(2);

    fn publish(topic: &str, payload: &[u8]) -> ControlPacket {
        ControlPacket::from_packet(&Packet::Publish(Publish {
            dup: false,
            qospid: QosPid::AtMostOnce,
            retain: false,
            topic_name: topic,
            payload,
        }))
        .unwrap()
    }

    fn connect(client_id: &str, username: Option<&str>) -> ControlPacket {
        ControlPacket::from_packet(&Packet::Connect(Connect {
            protocol: Protocol::MQTT311,
            keep_alive: 60,
            client_id,
            clean_session: true,
            last_will: None,
            username,
            password: None,
        }))
        .unwrap()
    }

    fn topic_of(packet: &ControlPacket) -> String {
        match packet.parse().unwrap() {
            Packet::Publish(p) => p.topic_name.to_string(),
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }

    struct Harness {
        client: Framed<DuplexStream, MqttCodec>,
        broker: Framed<DuplexStream, MqttCodec>,
        task: JoinHandle<Result<(), SessionError>>,
        shutdown: CancellationToken,
    }

    impl Harness {
        fn start(handler: Arc<dyn Handler>, interceptor: Option<Arc<dyn Interceptor>>, policy: VetoPolicy) -> Self {
            let (client_end, session_client) = tokio::io::duplex(64 * 1024);
            let (session_upstream, broker_end) = tokio::io::duplex(64 * 1024);
            let shutdown = CancellationToken::new();

            let session = Session::new(SessionInfo::new("test", None), session_client, session_upstream, handler)
                .with_interceptor(interceptor)
                .with_veto_policy(policy);
            let task = tokio::spawn(session.run(shutdown.clone()));

            Self {
                client: Framed::new(client_end, MqttCodec::default()),
                broker: Framed::new(broker_end, MqttCodec::default()),
                task,
                shutdown,
            }
        }

        fn plain() -> Self {
            Self::start(Arc::new(AllowAll), None, VetoPolicy::Continue)
        }

    }

    async fn finish(task: JoinHandle<Result<(), SessionError>>) -> Result<(), SessionError> {
        tokio::time::timeout(DEADLINE, task)
            .await
            .expect("session did not stop in time")
            .expect("session task panicked")
    }

    async fn recv(framed: &mut Framed<DuplexStream, MqttCodec>) -> Option<ControlPacket> {
        tokio::time::timeout(DEADLINE, framed.next())
            .await
            .expect("timed out waiting for packet")
            .map(|r| r.expect("decode"))
    }

    /// Vetoes PUBLISH packets on the topic `blocked`.
    struct BlockTopic;

    #[async_trait]
    impl Interceptor for BlockTopic {
        async fn intercept(
            &self,
            _session: &SessionInfo,
            packet: ControlPacket,
            _direction: Direction,
        ) -> Result<Option<ControlPacket>, InterceptError> {
            if packet.packet_type() == PacketType::Publish && topic_of(&packet) == "blocked" {
                return Err(InterceptError::new("topic is blocked"));
            }
            Ok(Some(packet))
        }
    }

    /// Upper-cases PUBLISH payloads travelling downstream.
    struct ShoutDownstream;

    #[async_trait]
    impl Interceptor for ShoutDownstream {
        async fn intercept(
            &self,
            _session: &SessionInfo,
            packet: ControlPacket,
            direction: Direction,
        ) -> Result<Option<ControlPacket>, InterceptError> {
            if direction == Direction::Downstream {
                if let Ok(Packet::Publish(p)) = packet.parse() {
                    let loud = p.payload.to_ascii_uppercase();
                    let rewritten = Packet::Publish(Publish { payload: &loud, ..p });
                    return ControlPacket::from_packet(&rewritten)
                        .map(Some)
                        .map_err(|e| InterceptError::new(e.to_string()));
                }
            }
            Ok(Some(packet))
        }
    }

    #[derive(Default)]
    struct Recorder {
        deliveries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn auth_connect(&self, session: &SessionInfo) -> Result<(), HandlerError> {
            if session.username == "mallory" {
                return Err(HandlerError::Unauthorized("banned user".into()));
            }
            Ok(())
        }

        async fn auth_subscribe(&self, session: &SessionInfo, topics: &[String]) -> Result<(), HandlerError> {
            if topics.iter().any(|t| t.starts_with("secret/")) {
                return Err(HandlerError::Unauthorized("not allowed".into()));
            }
            self.deliveries
                .lock()
                .unwrap()
                .push(format!("{}@{}", session.username, topics.join(",")));
            Ok(())
        }
    }

    #[tokio::test]
    async fn passes_packets_through_unchanged() {
        let mut h = Harness::plain();

        let hello = connect("device-1", None);
        h.client.send(hello.clone()).await.unwrap();
        assert_eq!(recv(&mut h.broker).await.unwrap().as_bytes(), hello.as_bytes());

        let ack = ControlPacket::from_packet(&Packet::Connack(Connack {
            session_present: false,
            code: ConnectReturnCode::Accepted,
        }))
        .unwrap();
        h.broker.send(ack.clone()).await.unwrap();
        assert_eq!(recv(&mut h.client).await.unwrap().as_bytes(), ack.as_bytes());

        // MQTT 5.0 AUTH is not understood by the typed view but still relays
        let auth = ControlPacket::new(PacketType::Auth, 0, [0x00]).unwrap();
        h.client.send(auth.clone()).await.unwrap();
        assert_eq!(recv(&mut h.broker).await.unwrap(), auth);
    }

    #[tokio::test]
    async fn veto_drops_packet_and_session_continues() {
        let mut h = Harness::start(Arc::new(AllowAll), Some(Arc::new(BlockTopic)), VetoPolicy::Continue);

        h.client.send(publish("blocked", b"nope")).await.unwrap();
        h.client.send(publish("allowed", b"yes")).await.unwrap();

        let first = recv(&mut h.broker).await.unwrap();
        assert_eq!(topic_of(&first), "allowed");

        drop(h.client);
        assert!(recv(&mut h.broker).await.is_none());
        assert!(finish(h.task).await.is_ok());
    }

    #[tokio::test]
    async fn veto_ends_session_under_terminate_policy() {
        let mut h = Harness::start(Arc::new(AllowAll), Some(Arc::new(BlockTopic)), VetoPolicy::Terminate);

        h.client.send(publish("blocked", b"nope")).await.unwrap();

        assert!(recv(&mut h.broker).await.is_none());
        assert!(recv(&mut h.client).await.is_none());
        let err = finish(h.task).await.unwrap_err();
        assert!(matches!(err, SessionError::Vetoed { direction: Direction::Upstream, .. }));
    }

    #[tokio::test]
    async fn interceptor_can_rewrite_packets() {
        let mut h = Harness::start(Arc::new(AllowAll), Some(Arc::new(ShoutDownstream)), VetoPolicy::Continue);

        h.broker.send(publish("news", b"hello")).await.unwrap();
        match recv(&mut h.client).await.unwrap().parse().unwrap() {
            Packet::Publish(p) => assert_eq!(p.payload, b"HELLO"),
            other => panic!("expected PUBLISH, got {other:?}"),
        }

        // upstream direction is untouched
        h.client.send(publish("news", b"quiet")).await.unwrap();
        match recv(&mut h.broker).await.unwrap().parse().unwrap() {
            Packet::Publish(p) => assert_eq!(p.payload, b"quiet"),
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn directions_stay_isolated_and_ordered() {
        let h = Harness::plain();
        let (mut client_tx, mut client_rx) = h.client.split();
        let (mut broker_tx, mut broker_rx) = h.broker.split();

        let up = tokio::spawn(async move {
            for i in 0..50 {
                client_tx.send(publish(&format!("up/{i}"), b"u")).await.unwrap();
            }
            client_tx
        });
        let down = tokio::spawn(async move {
            for i in 0..50 {
                broker_tx.send(publish(&format!("down/{i}"), b"d")).await.unwrap();
            }
            broker_tx
        });

        for i in 0..50 {
            let pkt = broker_rx.next().await.unwrap().unwrap();
            assert_eq!(topic_of(&pkt), format!("up/{i}"));
        }
        for i in 0..50 {
            let pkt = client_rx.next().await.unwrap().unwrap();
            assert_eq!(topic_of(&pkt), format!("down/{i}"));
        }

        let _ = up.await.unwrap();
        let _ = down.await.unwrap();
    }

    #[tokio::test]
    async fn client_close_tears_down_upstream() {
        let mut h = Harness::plain();
        h.client.send(connect("c", None)).await.unwrap();
        assert!(recv(&mut h.broker).await.is_some());

        drop(h.client);
        assert!(recv(&mut h.broker).await.is_none());
        assert!(finish(h.task).await.is_ok());
    }

    #[tokio::test]
    async fn upstream_close_tears_down_client() {
        let mut h = Harness::plain();
        h.broker.send(publish("t", b"x")).await.unwrap();
        assert!(recv(&mut h.client).await.is_some());

        drop(h.broker);
        assert!(recv(&mut h.client).await.is_none());
        assert!(finish(h.task).await.is_ok());
    }

    #[tokio::test]
    async fn broken_framing_is_fatal() {
        let mut h = Harness::plain();
        h.client.get_mut().write_all(&[0x00, 0x00]).await.unwrap();

        assert!(recv(&mut h.broker).await.is_none());
        let err = finish(h.task).await.unwrap_err();
        assert!(matches!(err, SessionError::Decode { direction: Direction::Upstream, .. }));
    }

    #[tokio::test]
    async fn cancellation_stops_session_cleanly() {
        let mut h = Harness::plain();
        h.shutdown.cancel();

        assert!(recv(&mut h.client).await.is_none());
        assert!(recv(&mut h.broker).await.is_none());
        assert!(finish(h.task).await.is_ok());
    }

    #[tokio::test]
    async fn refused_connect_never_reaches_target() {
        let mut h = Harness::start(Arc::new(Recorder::default()), None, VetoPolicy::Continue);
        h.client.send(connect("evil", Some("mallory"))).await.unwrap();

        assert!(recv(&mut h.broker).await.is_none());
        let err = finish(h.task).await.unwrap_err();
        assert!(matches!(err, SessionError::Unauthorized { direction: Direction::Upstream, .. }));
    }

    #[tokio::test]
    async fn downstream_authorization_sees_connect_identity() {
        let recorder = Arc::new(Recorder::default());
        let mut h = Harness::start(recorder.clone(), None, VetoPolicy::Continue);

        h.client.send(connect("dev", Some("alice"))).await.unwrap();
        assert!(recv(&mut h.broker).await.is_some());

        h.broker.send(publish("sensors/1", b"21.5")).await.unwrap();
        assert!(recv(&mut h.client).await.is_some());

        assert_eq!(*recorder.deliveries.lock().unwrap(), vec!["alice@sensors/1".to_string()]);
    }

    #[tokio::test]
    async fn refused_delivery_disconnects_client() {
        let mut h = Harness::start(Arc::new(Recorder::default()), None, VetoPolicy::Continue);

        h.broker.send(publish("secret/plans", b"x")).await.unwrap();

        let pkt = recv(&mut h.client).await.unwrap();
        assert_eq!(pkt.packet_type(), PacketType::Disconnect);
        assert!(recv(&mut h.client).await.is_none());
        let err = finish(h.task).await.unwrap_err();
        assert!(matches!(err, SessionError::Unauthorized { direction: Direction::Downstream, .. }));
    }

    #[derive(Default)]
    struct Notifications {
        events: Mutex<Vec<String>>,
    }

    impl Notifications {
        fn push(&self, event: String) -> Result<(), HandlerError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[async_trait]
    impl Handler for Notifications {
        async fn connect(&self, _session: &SessionInfo) -> Result<(), HandlerError> {
            self.push("connect".into())
        }

        async fn publish(&self, _session: &SessionInfo, topic: &str, _payload: &[u8]) -> Result<(), HandlerError> {
            self.push(format!("publish {topic}"))
        }

        async fn subscribe(&self, _session: &SessionInfo, topics: &[String]) -> Result<(), HandlerError> {
            self.push(format!("subscribe {}", topics.join(",")))
        }

        async fn unsubscribe(&self, _session: &SessionInfo, topics: &[String]) -> Result<(), HandlerError> {
            self.push(format!("unsubscribe {}", topics.join(",")))
        }
    }

    #[tokio::test]
    async fn notifies_handler_for_client_packets() {
        let notifications = Arc::new(Notifications::default());
        let mut h = Harness::start(notifications.clone(), None, VetoPolicy::Continue);

        let subscribe = Packet::Subscribe(Subscribe {
            pid: Pid::new(),
            topics: vec![SubscribeTopic {
                topic_path: "alerts/#".into(),
                qos: QoS::AtMostOnce,
            }],
        });
        let unsubscribe = Packet::Unsubscribe(Unsubscribe {
            pid: Pid::new(),
            topics: vec!["alerts/#".into()],
        });
        let packets = [
            connect("dev", None),
            publish("sensors/1", b"x"),
            ControlPacket::from_packet(&subscribe).unwrap(),
            ControlPacket::from_packet(&unsubscribe).unwrap(),
            ControlPacket::from_packet(&Packet::Puback(Pid::new())).unwrap(),
            ControlPacket::from_packet(&Packet::Pingreq).unwrap(),
        ];
        for packet in packets {
            h.client.send(packet).await.unwrap();
            assert!(recv(&mut h.broker).await.is_some());
        }

        // the pump notifies before reading on, so everything before PINGREQ is in
        assert_eq!(
            *notifications.events.lock().unwrap(),
            vec![
                "connect".to_string(),
                "publish sensors/1".to_string(),
                "subscribe alerts/#".to_string(),
                "unsubscribe alerts/#".to_string(),
            ]
        );
    }
}
