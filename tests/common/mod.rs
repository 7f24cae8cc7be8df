//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{body::Bytes, extract::Request, Router};
use futures_util::{SinkExt, StreamExt};
use hermina::config::TlsConfig;
use hermina::mqtt::mqttrs::{Connack, Connect, ConnectReturnCode, Packet, Protocol, Publish, QosPid};
use hermina::mqtt::{ControlPacket, MqttCodec, PacketType};
use hermina::net::websocket;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

pub const WAIT: Duration = Duration::from_secs(5);

pub type MqttClient<S> = Framed<S, MqttCodec>;

pub fn connect_packet(client_id: &str, username: Option<&str>) -> ControlPacket {
    ControlPacket::from_packet(&Packet::Connect(Connect {
        protocol: Protocol::MQTT311,
        keep_alive: 30,
        client_id,
        clean_session: true,
        last_will: None,
        username,
        password: None,
    }))
    .unwrap()
}

pub fn publish_packet(topic: &str, payload: &[u8]) -> ControlPacket {
    ControlPacket::from_packet(&Packet::Publish(Publish {
        dup: false,
        qospid: QosPid::AtMostOnce,
        retain: false,
        topic_name: topic,
        payload,
    }))
    .unwrap()
}

pub fn topic_of(packet: &ControlPacket) -> String {
    match packet.parse().unwrap() {
        Packet::Publish(p) => p.topic_name.to_string(),
        other => panic!("expected PUBLISH, got {other:?}"),
    }
}

/// Receive the next packet, `None` on end of stream.
pub async fn recv<S>(client: &mut MqttClient<S>) -> Option<ControlPacket>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(WAIT, client.next()).await.expect("timed out waiting for packet") {
        Some(Ok(packet)) => Some(packet),
        Some(Err(_)) | None => None,
    }
}

/// CONNECT, expect CONNACK.
pub async fn handshake<S>(stream: S, client_id: &str) -> MqttClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut client = Framed::new(stream, MqttCodec::default());
    client.send(connect_packet(client_id, None)).await.unwrap();
    let ack = recv(&mut client).await.expect("CONNACK");
    assert_eq!(ack.packet_type(), PacketType::Connack);
    client
}

/// A minimal broker: acknowledges CONNECT, echoes PUBLISH back to the sender,
/// answers PINGREQ and hangs up on DISCONNECT.
#[derive(Clone)]
pub struct MockBroker {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl MockBroker {
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// Broker reached over WebSocket at `ws://addr/mqtt`.
    pub async fn start_ws() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(ws: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        tokio::spawn({
            let accepted = Arc::clone(&accepted);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        if ws {
                            if let Ok(stream) = websocket::accept(socket, "/").await {
                                serve_mqtt(stream).await;
                            }
                        } else {
                            serve_mqtt(socket).await;
                        }
                    });
                }
            }
        });

        Self { addr, accepted }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/mqtt", self.addr)
    }
}

async fn serve_mqtt<S>(stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, MqttCodec::default());
    while let Some(Ok(packet)) = framed.next().await {
        let reply = match packet.packet_type() {
            PacketType::Connect => ControlPacket::from_packet(&Packet::Connack(Connack {
                session_present: false,
                code: ConnectReturnCode::Accepted,
            }))
            .unwrap(),
            PacketType::Publish => packet,
            PacketType::Pingreq => ControlPacket::new(PacketType::Pingresp, 0, b"").unwrap(),
            PacketType::Disconnect => break,
            _ => continue,
        };
        if framed.send(reply).await.is_err() {
            break;
        }
    }
}

/// An HTTP backend that answers every request with its method, path and query,
/// and remembers them.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let app = Router::new().fallback(move |request: Request| {
            let record = Arc::clone(&record);
            async move {
                let line = format!("{} {}", request.method(), request.uri());
                record.lock().unwrap().push(line.clone());
                Bytes::from(line)
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, seen }
    }

    pub fn requests(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

/// A client certificate with its PKCS#8 key.
struct ClientIdentity {
    cert: CertificateDer<'static>,
    key: Vec<u8>,
    pem: String,
}

impl ClientIdentity {
    fn issue(common_name: &str, ca: &rcgen::Certificate, ca_key: &KeyPair) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        let cert = params.signed_by(&key, ca, ca_key).unwrap();
        Self {
            pem: format!("{}{}", cert.pem(), key.serialize_pem()),
            cert: cert.der().clone(),
            key: key.serialize_der(),
        }
    }
}

fn self_signed_ca(common_name: &str) -> (rcgen::Certificate, KeyPair) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca = params.self_signed(&key).unwrap();
    (ca, key)
}

/// Throwaway CA with a server and a client certificate, written to disk, plus
/// a client certificate issued by an unrelated CA.
pub struct TestPki {
    dir: PathBuf,
    ca: CertificateDer<'static>,
    client: ClientIdentity,
    foreign: ClientIdentity,
}

impl TestPki {
    pub fn generate() -> Self {
        let dir = std::env::temp_dir().join(format!("hermina-it-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let (ca, ca_key) = self_signed_ca("hermina test ca");

        let server_key = KeyPair::generate().unwrap();
        let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        server_params.distinguished_name.push(DnType::CommonName, "localhost");
        let server = server_params.signed_by(&server_key, &ca, &ca_key).unwrap();

        let client = ClientIdentity::issue("device-1", &ca, &ca_key);
        let (rogue_ca, rogue_key) = self_signed_ca("someone else's ca");
        let foreign = ClientIdentity::issue("device-1", &rogue_ca, &rogue_key);

        std::fs::write(dir.join("ca.pem"), ca.pem()).unwrap();
        std::fs::write(dir.join("server.pem"), server.pem()).unwrap();
        std::fs::write(dir.join("server.key"), server_key.serialize_pem()).unwrap();

        Self {
            dir,
            ca: ca.der().clone(),
            client,
            foreign,
        }
    }

    pub fn server_tls(&self, mutual: bool) -> TlsConfig {
        TlsConfig {
            cert_file: self.dir.join("server.pem"),
            key_file: self.dir.join("server.key"),
            client_ca_file: mutual.then(|| self.dir.join("ca.pem")),
        }
    }

    pub fn ca_pem_path(&self) -> PathBuf {
        self.dir.join("ca.pem")
    }

    /// Client config trusting the test CA, optionally presenting the client certificate.
    pub fn client_config(&self, with_cert: bool) -> Arc<ClientConfig> {
        self.client_config_for(with_cert.then_some(&self.client))
    }

    /// Client config trusting the test CA but presenting a certificate from another CA.
    pub fn foreign_client_config(&self) -> Arc<ClientConfig> {
        self.client_config_for(Some(&self.foreign))
    }

    fn client_config_for(&self, identity: Option<&ClientIdentity>) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca.clone()).unwrap();

        let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots);

        let config = match identity {
            Some(identity) => {
                let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key.clone()));
                builder.with_client_auth_cert(vec![identity.cert.clone()], key).unwrap()
            }
            None => builder.with_no_client_auth(),
        };
        Arc::new(config)
    }

    /// Certificate and key of the trusted client, as one PEM bundle.
    pub fn client_identity_pem(&self) -> &[u8] {
        self.client.pem.as_bytes()
    }

    /// Certificate and key issued by the unrelated CA, as one PEM bundle.
    pub fn foreign_identity_pem(&self) -> &[u8] {
        self.foreign.pem.as_bytes()
    }
}

impl Drop for TestPki {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
