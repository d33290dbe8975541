use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::transport::{
    PeerTransport, SignalPayload, TransportError, TransportEvent, TransportFactory,
};

const MAX_FRAME_LEN: u32 = 1024 * 1024;
const LINK_ACK: &[u8] = b"ok";
const EVENT_BUFFER: usize = 32;

pub struct TcpTransportFactory;

impl TransportFactory for TcpTransportFactory {
    fn create(&self) -> Box<dyn PeerTransport> {
        Box::new(TcpTransport::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Unset,
    Offerer,
    Answerer,
}

/// Direct channel over plain TCP with length-prefixed frames.
///
/// The offerer binds an ephemeral listener and advertises its reachable
/// socket addresses as candidates; the answerer dials candidates in the
/// order they arrive and proves the offer token on the first stream that
/// connects. Both descriptions carry the same token, so a crossed or
/// stale answer is detected before any data flows.
pub struct TcpTransport {
    role: Role,
    local_token: Option<String>,
    remote_token: Option<String>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    link_up: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            role: Role::Unset,
            local_token: None,
            remote_token: None,
            events_tx,
            events_rx: Some(events_rx),
            writer: Arc::new(Mutex::new(None)),
            link_up: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn create_offer(&mut self) -> Result<SignalPayload, TransportError> {
        self.role = Role::Offerer;
        let token = Uuid::new_v4().to_string();
        self.local_token = Some(token.clone());

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let port = listener.local_addr()?.port();
        for ip in candidate_ips().await {
            let candidate = SocketAddr::new(ip, port).to_string();
            let _ = self
                .events_tx
                .send(TransportEvent::LocalCandidate(candidate))
                .await;
        }

        let events = self.events_tx.clone();
        let writer = self.writer.clone();
        let link_up = self.link_up.clone();
        let expected = token.clone();
        self.tasks.push(tokio::spawn(async move {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    log::debug!("Direct link accepted from {remote}");
                    if let Err(err) =
                        establish_accepted(stream, &expected, writer, events.clone(), link_up).await
                    {
                        let _ = events.send(TransportEvent::Failed(err.to_string())).await;
                    }
                }
                Err(err) => {
                    let _ = events.send(TransportEvent::Failed(err.to_string())).await;
                }
            }
        }));

        Ok(SignalPayload::Offer { token })
    }

    async fn create_answer(&mut self) -> Result<SignalPayload, TransportError> {
        let token = self.remote_token.clone().ok_or_else(|| {
            TransportError::Negotiation("cannot answer before an offer is applied".to_string())
        })?;
        Ok(SignalPayload::Answer { token })
    }

    async fn apply_remote_description(
        &mut self,
        description: SignalPayload,
    ) -> Result<(), TransportError> {
        match description {
            SignalPayload::Offer { token } => {
                self.role = Role::Answerer;
                self.remote_token = Some(token);
                Ok(())
            }
            SignalPayload::Answer { token } => {
                if self.local_token.as_deref() != Some(token.as_str()) {
                    return Err(TransportError::Negotiation(
                        "answer token does not match the pending offer".to_string(),
                    ));
                }
                Ok(())
            }
            SignalPayload::Candidate { .. } => Err(TransportError::Negotiation(
                "candidate is not a session description".to_string(),
            )),
        }
    }

    async fn add_remote_candidate(&mut self, candidate: String) -> Result<(), TransportError> {
        if self.role != Role::Answerer {
            // The listening side keeps its single accept; nothing to dial.
            log::debug!("Ignoring candidate {candidate} in listening role");
            return Ok(());
        }
        if self.link_up.load(Ordering::SeqCst) {
            return Ok(());
        }
        let addr: SocketAddr = candidate.parse().map_err(|err| {
            TransportError::Negotiation(format!("invalid candidate {candidate}: {err}"))
        })?;
        let token = self.remote_token.clone().ok_or_else(|| {
            TransportError::Negotiation("candidate before remote description".to_string())
        })?;

        let events = self.events_tx.clone();
        let writer = self.writer.clone();
        let link_up = self.link_up.clone();
        self.tasks.push(tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if let Err(err) =
                        establish_dialed(stream, &token, writer, events, link_up).await
                    {
                        // Another candidate may still succeed.
                        log::debug!("Handshake with {addr} failed: {err}");
                    }
                }
                Err(err) => log::debug!("Candidate {addr} unreachable: {err}"),
            }
        }));
        Ok(())
    }

    async fn send_bytes(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut slot = self.writer.lock().await;
        match slot.as_mut() {
            Some(writer) => {
                write_frame(writer, &bytes).await?;
                Ok(())
            }
            None => Err(TransportError::Negotiation(
                "direct channel is not open".to_string(),
            )),
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // Dropping the write half shuts the stream down; the remote read
        // loop sees EOF and reports Closed.
        self.writer.lock().await.take();
    }
}

async fn establish_accepted(
    stream: TcpStream,
    expected_token: &str,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    events: mpsc::Sender<TransportEvent>,
    link_up: Arc<AtomicBool>,
) -> Result<(), TransportError> {
    let (mut read_half, mut write_half) = stream.into_split();
    let presented = read_frame(&mut read_half)
        .await?
        .ok_or_else(|| TransportError::Negotiation("link closed during handshake".to_string()))?;
    if presented != expected_token.as_bytes() {
        return Err(TransportError::Negotiation(
            "direct link token mismatch".to_string(),
        ));
    }
    write_frame(&mut write_half, LINK_ACK).await?;
    finish_link(read_half, write_half, writer, events, link_up).await
}

async fn establish_dialed(
    stream: TcpStream,
    token: &str,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    events: mpsc::Sender<TransportEvent>,
    link_up: Arc<AtomicBool>,
) -> Result<(), TransportError> {
    let (mut read_half, mut write_half) = stream.into_split();
    write_frame(&mut write_half, token.as_bytes()).await?;
    let ack = read_frame(&mut read_half)
        .await?
        .ok_or_else(|| TransportError::Negotiation("link closed during handshake".to_string()))?;
    if ack != LINK_ACK {
        return Err(TransportError::Negotiation(
            "unexpected handshake acknowledgement".to_string(),
        ));
    }
    finish_link(read_half, write_half, writer, events, link_up).await
}

async fn finish_link(
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    events: mpsc::Sender<TransportEvent>,
    link_up: Arc<AtomicBool>,
) -> Result<(), TransportError> {
    // Exactly one candidate may win the link.
    if link_up
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }
    *writer.lock().await = Some(write_half);
    let _ = events.send(TransportEvent::Open).await;
    read_loop(read_half, events).await;
    Ok(())
}

async fn read_loop(mut read_half: OwnedReadHalf, events: mpsc::Sender<TransportEvent>) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(bytes)) => {
                if events.send(TransportEvent::Data(bytes)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = events.send(TransportEvent::Closed).await;
                break;
            }
            Err(err) => {
                let _ = events.send(TransportEvent::Failed(err.to_string())).await;
                break;
            }
        }
    }
}

/// Read one length-prefixed frame; `None` on clean EOF at a frame border.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, std::io::Error> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<(), std::io::Error> {
    if bytes.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(std::io::Error::new(ErrorKind::InvalidData, "frame too large"));
    }
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Addresses worth advertising for an ephemeral listener: loopback plus
/// the interface the default route would use. The UDP connect sends no
/// packets; it only asks the kernel for a source address.
async fn candidate_ips() -> Vec<IpAddr> {
    let mut ips = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
    if let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        if socket.connect(("8.8.8.8", 53)).await.is_ok() {
            if let Ok(addr) = socket.local_addr() {
                if !ips.contains(&addr.ip()) {
                    ips.push(addr.ip());
                }
            }
        }
    }
    ips
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event stream ended")
    }

    #[tokio::test]
    async fn negotiates_opens_and_transfers_frames() {
        let mut offerer = TcpTransport::new();
        let mut answerer = TcpTransport::new();

        let offer = offerer.create_offer().await.expect("offer");
        let mut offerer_events = offerer.take_events().expect("events");
        answerer
            .apply_remote_description(offer)
            .await
            .expect("apply offer");
        let answer = answerer.create_answer().await.expect("answer");
        let mut answerer_events = answerer.take_events().expect("events");
        offerer
            .apply_remote_description(answer)
            .await
            .expect("apply answer");

        // Feed the offerer's candidates across until its side opens.
        loop {
            match next_event(&mut offerer_events).await {
                TransportEvent::LocalCandidate(candidate) => {
                    answerer
                        .add_remote_candidate(candidate)
                        .await
                        .expect("add candidate");
                }
                TransportEvent::Open => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        match next_event(&mut answerer_events).await {
            TransportEvent::Open => {}
            other => panic!("unexpected event: {other:?}"),
        }

        offerer.send_bytes(b"ping".to_vec()).await.expect("send");
        match next_event(&mut answerer_events).await {
            TransportEvent::Data(bytes) => assert_eq!(bytes, b"ping"),
            other => panic!("unexpected event: {other:?}"),
        }
        answerer.send_bytes(b"pong".to_vec()).await.expect("send");
        match next_event(&mut offerer_events).await {
            TransportEvent::Data(bytes) => assert_eq!(bytes, b"pong"),
            other => panic!("unexpected event: {other:?}"),
        }

        // Closing one side surfaces Closed on the other.
        offerer.close().await;
        match next_event(&mut answerer_events).await {
            TransportEvent::Closed => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_answer_token_is_rejected() {
        let mut offerer = TcpTransport::new();
        offerer.create_offer().await.expect("offer");
        let result = offerer
            .apply_remote_description(SignalPayload::Answer { token: "stale".into() })
            .await;
        assert!(matches!(result, Err(TransportError::Negotiation(_))));
    }

    #[tokio::test]
    async fn sending_before_open_fails() {
        let mut transport = TcpTransport::new();
        let result = transport.send_bytes(b"too early".to_vec()).await;
        assert!(matches!(result, Err(TransportError::Negotiation(_))));
    }
}
