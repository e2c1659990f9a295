use std::net::SocketAddr;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use tokio::{
    net::TcpStream,
    sync::mpsc::{Receiver, Sender},
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// A frame tagged with the remote end it came from or goes to.
pub type Envelope = (SocketAddr, Bytes);

/// Writer and reader halves of a length-delimited TCP stream.
pub type Writer = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
pub type Reader = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

/// Handle returned by the actors: send envelopes out, receive envelopes in.
pub type Channel = (Sender<Envelope>, Receiver<Envelope>);

pub(crate) const CHANNEL_CAPACITY: usize = 1000;

pub(crate) fn framed(stream: TcpStream) -> (Writer, Reader) {
    use futures::StreamExt;
    Framed::new(stream, LengthDelimitedCodec::new()).split()
}
