use crate::common::{framed, Channel, Envelope, Reader, Writer, CHANNEL_CAPACITY};

use std::collections::{hash_map::Entry, HashMap};
use std::io;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use log::{debug, error, trace, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{channel, Receiver, Sender},
};

/// Accepting side of the transport. Frames from every connection arrive on
/// the returned receiver tagged with the remote address; replies sent with
/// that address are routed back over the same connection.
pub struct Server {
    listener: TcpListener,
    inbound: Sender<Envelope>,
    outbound: Receiver<Envelope>,
    closed_tx: Sender<SocketAddr>,
    closed_rx: Receiver<SocketAddr>,
    connections: HashMap<SocketAddr, Sender<Envelope>>,
}

impl Server {
    /// Binds before returning so address errors reach the caller.
    pub async fn spawn(host_addr: SocketAddr) -> io::Result<Channel> {
        let listener = TcpListener::bind(host_addr).await?;
        debug!("listening on {}", host_addr);
        let (inbound, ret_receiver) = channel(CHANNEL_CAPACITY);
        let (ret_sender, outbound) = channel(CHANNEL_CAPACITY);
        let (closed_tx, closed_rx) = channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            Self {
                listener,
                inbound,
                outbound,
                closed_tx,
                closed_rx,
                connections: Default::default(),
            }
            .run()
            .await;
        });
        Ok((ret_sender, ret_receiver))
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                connection = self.listener.accept() => {
                    match connection {
                        Ok((socket, addr)) => {
                            trace!("accept connection from {}", addr);
                            let (sender, receiver) = channel(CHANNEL_CAPACITY);
                            self.connections.insert(addr, sender);
                            Connection::spawn(
                                addr,
                                socket,
                                self.inbound.clone(),
                                receiver,
                                self.closed_tx.clone(),
                            );
                        }
                        Err(e) => error!("couldn't get client: {e:?}"),
                    }
                }
                Some(addr) = self.closed_rx.recv() => {
                    trace!("connection from {} closed", addr);
                    self.connections.remove(&addr);
                }
                reply = self.outbound.recv() => {
                    let Some((addr, msg)) = reply else {
                        debug!("server transport closed");
                        return;
                    };
                    match self.connections.entry(addr) {
                        Entry::Occupied(mut entry) => {
                            trace!("sending msg to {}", addr);
                            if let Err(e) = entry.get_mut().send((addr, msg)).await {
                                warn!("disconnected from {}: {}", addr, e);
                                entry.remove();
                            }
                        }
                        Entry::Vacant(_) => warn!("no connection from {}", addr),
                    }
                }
            }
        }
    }
}

struct Connection {
    inbound: Sender<Envelope>,
    replies: Receiver<Envelope>,
    closed: Sender<SocketAddr>,
    remote_addr: SocketAddr,
    reader: Reader,
    writer: Writer,
}

impl Connection {
    fn spawn(
        remote_addr: SocketAddr,
        socket: TcpStream,
        inbound: Sender<Envelope>,
        replies: Receiver<Envelope>,
        closed: Sender<SocketAddr>,
    ) {
        let (writer, reader) = framed(socket);
        tokio::spawn(async move {
            let mut connection = Self {
                inbound,
                replies,
                closed,
                remote_addr,
                reader,
                writer,
            };
            connection.run().await;
            let _ = connection.closed.send(remote_addr).await;
        });
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                framed_data = self.reader.next() => {
                    match framed_data {
                        Some(Ok(data)) => {
                            trace!("received msg from: {}", self.remote_addr);
                            if self.inbound.send((self.remote_addr, data.freeze())).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            error!("bad frame from {}: {}", self.remote_addr, e);
                            return;
                        }
                        None => return,
                    }
                },
                Some((_, data)) = self.replies.recv() => {
                    if let Err(e) = self.writer.send(data).await {
                        warn!("disconnected from {}: {}", self.remote_addr, e);
                        return;
                    }
                }
            }
        }
    }
}
