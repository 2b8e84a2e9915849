//! In-process transport
//!
//! Listeners live in a process-global table keyed by `memory://` address;
//! dialing hands the listener one half of a pair of bounded channels.
//! Channel capacity is the only backpressure: a sender blocks once the
//! peer falls [`LINK_CAPACITY`] frames behind.

use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::{DialOptions, Link, Listener, Transport};

/// Frames a link may buffer before senders block
pub const LINK_CAPACITY: usize = 1024;

/// Inbound links a listener may queue before dials fail
const ACCEPT_BACKLOG: usize = 64;

fn listeners() -> &'static Mutex<HashMap<String, mpsc::Sender<MemoryLink>>> {
    static TABLE: OnceLock<Mutex<HashMap<String, mpsc::Sender<MemoryLink>>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Transport over in-process channels, for tests and single-process wiring
pub struct MemoryTransport;

impl MemoryTransport {
    /// Create a memory transport
    ///
    /// All instances share one process-wide address space, so a client
    /// and a server built independently can still reach each other.
    pub fn new() -> Self {
        Self
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn dial(&self, address: &str, _opts: DialOptions) -> Result<Box<dyn Link>> {
        let accept_tx = {
            let table = listeners().lock().unwrap();
            table.get(address).cloned()
        }
        .ok_or_else(|| Error::unavailable(format!("no listener at {address}")))?;

        let (local, remote) = MemoryLink::pair();
        accept_tx
            .try_send(remote)
            .map_err(|_| Error::unavailable(format!("listener at {address} is not accepting")))?;
        Ok(Box::new(local))
    }

    async fn listen(&self, address: &str) -> Result<Box<dyn Listener>> {
        let address = if address.is_empty() {
            format!("memory://{}", uuid::Uuid::new_v4())
        } else {
            address.to_string()
        };

        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        {
            let mut table = listeners().lock().unwrap();
            if table.contains_key(&address) {
                return Err(Error::internal(format!("{address} is already bound")));
            }
            table.insert(address.clone(), accept_tx);
        }

        Ok(Box::new(MemoryListener {
            address,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
        }))
    }
}

struct MemoryListener {
    address: String,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<MemoryLink>>,
}

#[async_trait]
impl Listener for MemoryListener {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn accept(&self) -> Result<Box<dyn Link>> {
        let mut rx = self.accept_rx.lock().await;
        match rx.recv().await {
            Some(link) => Ok(Box::new(link)),
            None => Err(Error::closed(format!("listener {} closed", self.address))),
        }
    }

    async fn close(&self) -> Result<()> {
        listeners().lock().unwrap().remove(&self.address);
        self.accept_rx.lock().await.close();
        Ok(())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.accept_rx.get_mut().close();
        let mut table = listeners().lock().unwrap();
        // another listener may have reclaimed the address after close
        if table
            .get(&self.address)
            .map(|tx| tx.is_closed())
            .unwrap_or(false)
        {
            table.remove(&self.address);
        }
    }
}

struct MemoryLink {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl MemoryLink {
    fn pair() -> (MemoryLink, MemoryLink) {
        let (a_tx, a_rx) = mpsc::channel(LINK_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(LINK_CAPACITY);
        let local = MemoryLink {
            tx: Mutex::new(Some(a_tx)),
            rx: tokio::sync::Mutex::new(b_rx),
        };
        let remote = MemoryLink {
            tx: Mutex::new(Some(b_tx)),
            rx: tokio::sync::Mutex::new(a_rx),
        };
        (local, remote)
    }

    fn sender(&self) -> Result<mpsc::Sender<Vec<u8>>> {
        self.tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::closed("link is closed"))
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let tx = self.sender()?;
        tx.send(frame.to_vec())
            .await
            .map_err(|_| Error::closed("peer closed the link"))
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                // zero-length frames are keepalives
                Some(frame) if frame.is_empty() => continue,
                Some(frame) => return Ok(frame),
                None => return Err(Error::closed("link is closed")),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.tx.lock().unwrap().take();
        // close the receive half too unless a recv is in flight; the
        // pending recv still ends when the peer's sender drops
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
        }
        Ok(())
    }
}
