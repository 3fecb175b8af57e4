//! In-process message sockets.
//!
//! A [`Context`] is a registry of bound endpoints. A socket bound to an endpoint is the
//! owning side, any number of sockets may connect to it. Unbinding tears the endpoint down,
//! connected peers observe [`Error::Disconnected`] on their next receive.

use crate::error::Error;
use log::debug;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Frame = Vec<u8>;

/// Endpoint of a kernel control channel.
pub fn controller_endpoint(name: &str) -> String {
    format!("inproc://{name}")
}

/// Endpoint of the kernel event publisher.
pub fn publisher_endpoint() -> String {
    "inproc://publisher".to_string()
}

/// Halves of a bound endpoint handed to connecting sockets.
struct Peer {
    to_bound: Sender<Frame>,
    from_bound: Arc<Mutex<Receiver<Frame>>>,
}

/// Registry of bound endpoints.
#[derive(Clone, Default)]
pub struct Context {
    registry: Arc<Mutex<HashMap<String, Peer>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn socket(&self) -> Socket {
        Socket {
            ctx: self.clone(),
            link: None,
        }
    }

    /// Connect a new socket to a bound endpoint.
    pub fn connect(&self, endpoint: &str) -> Result<Socket, Error> {
        let registry = self.registry.lock().map_err(|_| Error::NotConnected)?;
        let peer = registry
            .get(endpoint)
            .ok_or_else(|| Error::EndpointNotBound(endpoint.to_string()))?;
        Ok(Socket {
            ctx: self.clone(),
            link: Some(Link::Connected {
                endpoint: endpoint.to_string(),
                tx: peer.to_bound.clone(),
                rx: peer.from_bound.clone(),
            }),
        })
    }

    pub fn is_bound(&self, endpoint: &str) -> bool {
        self.registry
            .lock()
            .map(|r| r.contains_key(endpoint))
            .unwrap_or(false)
    }
}

enum Link {
    Bound {
        endpoint: String,
        tx: Sender<Frame>,
        rx: Receiver<Frame>,
    },
    Connected {
        endpoint: String,
        tx: Sender<Frame>,
        rx: Arc<Mutex<Receiver<Frame>>>,
    },
}

impl Link {
    fn endpoint(&self) -> &str {
        match self {
            Link::Bound { endpoint, .. } | Link::Connected { endpoint, .. } => endpoint,
        }
    }
}

/// Message socket, see module documentation.
pub struct Socket {
    ctx: Context,
    link: Option<Link>,
}

impl Socket {
    /// Bind the socket to an endpoint.
    ///
    /// Fails with [`Error::AddressInUse`] if the endpoint is already bound, or if this socket
    /// is already bound or connected.
    pub fn bind(&mut self, endpoint: &str) -> Result<(), Error> {
        if let Some(link) = &self.link {
            return Err(Error::AddressInUse(link.endpoint().to_string()));
        }

        let mut registry = self.ctx.registry.lock().map_err(|_| Error::NotConnected)?;
        if registry.contains_key(endpoint) {
            return Err(Error::AddressInUse(endpoint.to_string()));
        }

        let (to_peer_tx, to_peer_rx) = mpsc::channel();
        let (to_bound_tx, to_bound_rx) = mpsc::channel();
        registry.insert(
            endpoint.to_string(),
            Peer {
                to_bound: to_bound_tx,
                from_bound: Arc::new(Mutex::new(to_peer_rx)),
            },
        );
        self.link = Some(Link::Bound {
            endpoint: endpoint.to_string(),
            tx: to_peer_tx,
            rx: to_bound_rx,
        });
        Ok(())
    }

    /// Unbind the socket from an endpoint. Unbinding an endpoint this socket is not bound to
    /// does nothing.
    pub fn unbind(&mut self, endpoint: &str) -> Result<(), Error> {
        match &self.link {
            Some(Link::Bound { endpoint: bound, .. }) if bound == endpoint => {}
            _ => {
                debug!(target: "nbdap", "unbind {endpoint}: socket is not bound to it");
                return Ok(());
            }
        }

        self.ctx
            .registry
            .lock()
            .map_err(|_| Error::NotConnected)?
            .remove(endpoint);
        self.link = None;
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.link, Some(Link::Bound { .. }))
    }

    /// Create another handle to the same connection. Only connected sockets can be cloned.
    pub fn try_clone(&self) -> Result<Socket, Error> {
        match &self.link {
            Some(Link::Connected { endpoint, tx, rx }) => Ok(Socket {
                ctx: self.ctx.clone(),
                link: Some(Link::Connected {
                    endpoint: endpoint.clone(),
                    tx: tx.clone(),
                    rx: rx.clone(),
                }),
            }),
            Some(Link::Bound { endpoint, .. }) => Err(Error::AddressInUse(endpoint.clone())),
            None => Err(Error::NotConnected),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.link.as_ref().map(Link::endpoint)
    }

    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), Error> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        let tx = match link {
            Link::Bound { tx, .. } | Link::Connected { tx, .. } => tx,
        };
        tx.send(frame.into())
            .map_err(|_| Error::Disconnected(link.endpoint().to_string()))
    }

    /// Block until a frame arrives.
    pub fn recv(&self) -> Result<Frame, Error> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        let disconnected = || Error::Disconnected(link.endpoint().to_string());
        match link {
            Link::Bound { rx, .. } => rx.recv().map_err(|_| disconnected()),
            Link::Connected { rx, .. } => {
                let rx = rx.lock().map_err(|_| disconnected())?;
                rx.recv().map_err(|_| disconnected())
            }
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Frame, Error> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        let map_err = |e: RecvTimeoutError| match e {
            RecvTimeoutError::Timeout => Error::Timeout(timeout),
            RecvTimeoutError::Disconnected => Error::Disconnected(link.endpoint().to_string()),
        };
        match link {
            Link::Bound { rx, .. } => rx.recv_timeout(timeout).map_err(map_err),
            Link::Connected { rx, .. } => {
                let rx = rx
                    .lock()
                    .map_err(|_| Error::Disconnected(link.endpoint().to_string()))?;
                rx.recv_timeout(timeout).map_err(map_err)
            }
        }
    }

    /// Return a frame if one is ready, [`None`] otherwise.
    pub fn try_recv(&self) -> Result<Option<Frame>, Error> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        let map_res = |res: Result<Frame, TryRecvError>| match res {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Disconnected(link.endpoint().to_string())),
        };
        match link {
            Link::Bound { rx, .. } => map_res(rx.try_recv()),
            Link::Connected { rx, .. } => {
                let rx = rx
                    .lock()
                    .map_err(|_| Error::Disconnected(link.endpoint().to_string()))?;
                map_res(rx.try_recv())
            }
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Some(Link::Bound { endpoint, .. }) = &self.link {
            if let Ok(mut registry) = self.ctx.registry.lock() {
                registry.remove(endpoint);
            }
        }
    }
}
