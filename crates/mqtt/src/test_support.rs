//! In-process MQTT 3.1.1 broker stub for tests.
//!
//! Understands just enough of the protocol to acknowledge CONNECT, PUBLISH
//! (QoS 0-2), SUBSCRIBE, UNSUBSCRIBE, PINGREQ and DISCONNECT, and records
//! what clients sent. Enabled for downstream crates with the
//! `test-support` feature.

use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Default)]
struct Recorded {
    publishes: Mutex<Vec<ReceivedPublish>>,
    subscriptions: Mutex<Vec<String>>,
    connections: AtomicUsize,
    disconnects: AtomicUsize,
}

pub struct FakeBroker {
    port: u16,
    recorded: Arc<Recorded>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    /// Accepts every connection.
    pub async fn start() -> Self {
        Self::start_with_code(0).await
    }

    /// Answers CONNECT with the given CONNACK return code (5 = not authorized).
    pub async fn start_with_code(connack_code: u8) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake broker");
        let port = listener.local_addr().expect("local addr").port();
        let recorded = Arc::new(Recorded::default());

        let shared = recorded.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, connack_code, shared).await;
                });
            }
        });

        Self {
            port,
            recorded,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn publishes(&self) -> Vec<ReceivedPublish> {
        self.recorded
            .publishes
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn publishes_on(&self, topic: &str) -> Vec<ReceivedPublish> {
        self.publishes()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.recorded
            .subscriptions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn connections(&self) -> usize {
        self.recorded.connections.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.recorded.disconnects.load(Ordering::SeqCst)
    }

    /// Polls until `cond` holds or `timeout` elapses. Returns the final result of `cond`.
    pub async fn wait_until(&self, timeout: Duration, cond: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if cond(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond(self)
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_packet(stream: &mut TcpStream) -> io::Result<Option<(u8, Vec<u8>)>> {
    let header = match stream.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; remaining];
    stream.read_exact(&mut body).await?;
    Ok(Some((header, body)))
}

fn read_str(body: &[u8], at: usize) -> Option<(String, usize)> {
    let len = u16::from_be_bytes([*body.get(at)?, *body.get(at + 1)?]) as usize;
    let raw = body.get(at + 2..at + 2 + len)?;
    Some((String::from_utf8_lossy(raw).into_owned(), at + 2 + len))
}

async fn serve(mut stream: TcpStream, connack_code: u8, recorded: Arc<Recorded>) -> io::Result<()> {
    while let Some((header, body)) = read_packet(&mut stream).await? {
        match header >> 4 {
            // CONNECT
            1 => {
                stream.write_all(&[0x20, 0x02, 0x00, connack_code]).await?;
                if connack_code != 0 {
                    return Ok(());
                }
                recorded.connections.fetch_add(1, Ordering::SeqCst);
            }
            // PUBLISH
            3 => {
                let qos = (header >> 1) & 0x03;
                let Some((topic, mut at)) = read_str(&body, 0) else {
                    continue;
                };
                let pkid = if qos > 0 {
                    let id = [body[at], body[at + 1]];
                    at += 2;
                    Some(id)
                } else {
                    None
                };
                if let Ok(mut publishes) = recorded.publishes.lock() {
                    publishes.push(ReceivedPublish {
                        topic,
                        payload: body[at..].to_vec(),
                        qos,
                        retain: header & 0x01 == 1,
                    });
                }
                match (qos, pkid) {
                    (1, Some([hi, lo])) => stream.write_all(&[0x40, 0x02, hi, lo]).await?,
                    (2, Some([hi, lo])) => stream.write_all(&[0x50, 0x02, hi, lo]).await?,
                    _ => {}
                }
            }
            // PUBREL
            6 => {
                stream.write_all(&[0x70, 0x02, body[0], body[1]]).await?;
            }
            // SUBSCRIBE
            8 => {
                let (hi, lo) = (body[0], body[1]);
                let mut granted = Vec::new();
                let mut at = 2;
                while let Some((topic, next)) = read_str(&body, at) {
                    let qos = body.get(next).copied().unwrap_or(0);
                    granted.push(qos);
                    if let Ok(mut subs) = recorded.subscriptions.lock() {
                        subs.push(topic);
                    }
                    at = next + 1;
                }
                let mut ack = vec![0x90, (2 + granted.len()) as u8, hi, lo];
                ack.extend(granted);
                stream.write_all(&ack).await?;
            }
            // UNSUBSCRIBE
            10 => {
                stream.write_all(&[0xB0, 0x02, body[0], body[1]]).await?;
            }
            // PINGREQ
            12 => stream.write_all(&[0xD0, 0x00]).await?,
            // DISCONNECT
            14 => {
                recorded.disconnects.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            _ => {}
        }
    }
    Ok(())
}
