use crate::common::{framed, Channel, Envelope, CHANNEL_CAPACITY};

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::{
    net::TcpStream,
    sync::mpsc::{channel, Receiver, Sender},
    time,
};

const INITIAL_RETRY_DELAY_MS: u64 = 200;
const MAX_RETRY_DELAY_MS: u64 = 60_000;
const MAX_BUFFERED: usize = 1000;
const DROP_ON_OVERFLOW: usize = 400;

/// Dialing side of the transport. One connection worker per destination;
/// replies read from a connection come back on the returned receiver.
pub struct Client {
    inbound: Sender<Envelope>,
    outbound: Receiver<Envelope>,
    connections: HashMap<SocketAddr, Sender<Bytes>>,
}

impl Client {
    pub fn spawn() -> Channel {
        let (inbound, ret_receiver) = channel(CHANNEL_CAPACITY);
        let (ret_sender, outbound) = channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            Self {
                inbound,
                outbound,
                connections: Default::default(),
            }
            .run()
            .await;
        });
        (ret_sender, ret_receiver)
    }

    async fn run(&mut self) {
        while let Some((dest_addr, data)) = self.outbound.recv().await {
            let connection = self
                .connections
                .entry(dest_addr)
                .or_insert_with(|| Connection::spawn(dest_addr, self.inbound.clone()));
            if connection.send(data).await.is_err() {
                warn!("connection worker for {} is gone", dest_addr);
                self.connections.remove(&dest_addr);
            }
        }
        debug!("client transport closed");
    }
}

struct Connection {
    remote_addr: SocketAddr,
    inbound: Sender<Envelope>,
    receiver: Receiver<Bytes>,
    buffer: VecDeque<Bytes>,
}

impl Connection {
    fn spawn(remote_addr: SocketAddr, inbound: Sender<Envelope>) -> Sender<Bytes> {
        let (ret_sender, receiver) = channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            Self {
                remote_addr,
                inbound,
                receiver,
                buffer: Default::default(),
            }
            .run()
            .await
        });
        ret_sender
    }

    async fn run(&mut self) {
        let mut delay = INITIAL_RETRY_DELAY_MS;
        let mut retry = 0;
        loop {
            match TcpStream::connect(self.remote_addr).await {
                Ok(stream) => {
                    trace!("outgoing connection established with {}", self.remote_addr);
                    delay = INITIAL_RETRY_DELAY_MS;
                    retry = 0;
                    match self.keep_alive(stream).await {
                        Ok(()) => return,
                        Err(e) => warn!("connection to {} lost: {}", self.remote_addr, e),
                    }
                }
                Err(e) => {
                    warn!(
                        "connect to {}, retry {} times, reason {}",
                        self.remote_addr, retry, e
                    );
                    let timer = time::sleep(Duration::from_millis(delay));
                    tokio::pin!(timer);

                    'waiter: loop {
                        tokio::select! {
                            () = &mut timer => {
                                delay = std::cmp::min(2 * delay, MAX_RETRY_DELAY_MS);
                                retry += 1;
                                break 'waiter;
                            },
                            // Keep draining so callers never block on a dead peer.
                            request = self.receiver.recv() => match request {
                                Some(request) => self.buffer_frame(request),
                                None => return,
                            }
                        }
                    }
                }
            }
        }
    }

    fn buffer_frame(&mut self, frame: Bytes) {
        self.buffer.push_back(frame);
        if self.buffer.len() > MAX_BUFFERED {
            warn!(
                "{} frames for {} dropped",
                DROP_ON_OVERFLOW, self.remote_addr
            );
            self.buffer.drain(0..DROP_ON_OVERFLOW);
        }
    }

    /// Returns `Ok(())` once the owning client is dropped, an error when the
    /// stream breaks.
    async fn keep_alive(&mut self, stream: TcpStream) -> io::Result<()> {
        let (mut writer, mut reader) = framed(stream);
        while let Some(data) = self.buffer.pop_front() {
            trace!("flush buffered frame to {}", self.remote_addr);
            if let Err(e) = writer.send(data.clone()).await {
                self.buffer.push_front(data);
                return Err(e);
            }
        }
        loop {
            tokio::select! {
                data = self.receiver.recv() => match data {
                    Some(data) => {
                        trace!("send frame to {}", self.remote_addr);
                        writer.send(data).await?;
                    }
                    None => return Ok(()),
                },
                frame = reader.next() => match frame {
                    Some(frame) => {
                        let data = frame?.freeze();
                        if self.inbound.send((self.remote_addr, data)).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "remote closed the connection",
                        ))
                    }
                }
            }
        }
    }
}
