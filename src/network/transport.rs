//! Datagram transport seam.
//!
//! Transfer and ping code only needs "send a datagram to an address" and
//! "wait for the next datagram". Keeping that behind [`DatagramChannel`] lets
//! the same protocol code run over a real UDP socket, over the shared per-peer
//! port (via [`RoutedChannel`]), or over an in-process [`MemoryNetwork`].

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[async_trait]
pub trait DatagramChannel: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl DatagramChannel for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }
}

#[async_trait]
impl<C: DatagramChannel + ?Sized> DatagramChannel for Arc<C> {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        (**self).recv_from(buf).await
    }
}

fn copy_datagram(datagram: &[u8], buf: &mut [u8]) -> usize {
    // like UDP, anything past the caller's buffer is lost
    let n = datagram.len().min(buf.len());
    buf[..n].copy_from_slice(&datagram[..n]);
    n
}

/// Receives datagrams that another task demultiplexed off a shared socket,
/// and answers through that same socket.
pub struct RoutedChannel {
    socket: Arc<UdpSocket>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<(Bytes, SocketAddr)>>,
}

impl RoutedChannel {
    pub fn new(socket: Arc<UdpSocket>, inbound: mpsc::Receiver<(Bytes, SocketAddr)>) -> Self {
        Self {
            socket,
            inbound: tokio::sync::Mutex::new(inbound),
        }
    }
}

#[async_trait]
impl DatagramChannel for RoutedChannel {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some((datagram, from)) => Ok((copy_datagram(&datagram, buf), from)),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "datagram router has shut down",
            )),
        }
    }
}

struct NetworkInner {
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<(Bytes, SocketAddr)>>,
    loss: Option<(f64, StdRng)>,
}

/// In-process datagram network. Delivery is immediate and unordered only in
/// the sense UDP is: datagrams to unknown addresses vanish, and an optional
/// loss rate drops datagrams in either direction.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkInner {
                endpoints: HashMap::new(),
                loss: None,
            })),
        }
    }

    /// Drop each datagram with probability `drop_prob`, seeded for repeatability
    pub fn with_loss(drop_prob: f64, seed: u64) -> Self {
        let network = Self::new();
        if let Ok(mut inner) = network.inner.lock() {
            inner.loss = Some((drop_prob, StdRng::seed_from_u64(seed)));
        }
        network
    }

    pub fn endpoint(&self, addr: SocketAddr) -> MemoryChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inner) = self.inner.lock() {
            inner.endpoints.insert(addr, tx);
        }
        MemoryChannel {
            addr,
            network: self.clone(),
            inbound: tokio::sync::Mutex::new(rx),
        }
    }

    fn deliver(&self, from: SocketAddr, target: SocketAddr, datagram: Bytes) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if let Some((drop_prob, rng)) = inner.loss.as_mut() {
            if rng.random::<f64>() < *drop_prob {
                return;
            }
        }
        if let Some(endpoint) = inner.endpoints.get(&target) {
            let _ = endpoint.send((datagram, from));
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemoryChannel {
    addr: SocketAddr,
    network: MemoryNetwork,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
}

impl MemoryChannel {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl DatagramChannel for MemoryChannel {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.network
            .deliver(self.addr, target, Bytes::copy_from_slice(buf));
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some((datagram, from)) => Ok((copy_datagram(&datagram, buf), from)),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "memory network endpoint closed",
            )),
        }
    }
}
