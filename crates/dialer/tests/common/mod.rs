//! Scripted transport that records how the dialer drives it.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dialer::{
    BoxedChannel, ChannelKind, ChannelSpec, Endpoint, MultiplexedConnection, StreamTransport,
    TransportError,
};
use tokio::io::DuplexStream;

/// What a scripted operation does when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail,
    Hang,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub upgrade: Step,
    pub error_channel: Step,
    pub data_channel: Step,
    /// `None` keeps the error channel open until the connection closes.
    pub error_payload: Option<Vec<u8>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            upgrade: Step::Succeed,
            error_channel: Step::Succeed,
            data_channel: Step::Succeed,
            error_payload: Some(Vec::new()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub upgrades: AtomicUsize,
    pub channel_opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub specs: Mutex<Vec<ChannelSpec>>,
    pub endpoints: Mutex<Vec<String>>,
}

impl Calls {
    pub fn upgrades(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }

    pub fn channel_opens(&self) -> usize {
        self.channel_opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn specs(&self) -> Vec<ChannelSpec> {
        self.specs.lock().unwrap().clone()
    }
}

pub struct MockTransport {
    script: Script,
    calls: Arc<Calls>,
}

impl MockTransport {
    pub fn new(script: Script) -> (Arc<Self>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        (
            Arc::new(Self {
                script,
                calls: calls.clone(),
            }),
            calls,
        )
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn upgrade(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn MultiplexedConnection>, TransportError> {
        self.calls.upgrades.fetch_add(1, Ordering::SeqCst);
        self.calls
            .endpoints
            .lock()
            .unwrap()
            .push(endpoint.to_string());
        match self.script.upgrade {
            Step::Succeed => {
                let connection: Box<dyn MultiplexedConnection> = Box::new(MockConnection {
                    script: self.script.clone(),
                    calls: self.calls.clone(),
                    peers: Mutex::new(Vec::new()),
                });
                Ok(connection)
            }
            Step::Fail => Err(TransportError::Rejected {
                status: 403,
                message: "upgrade refused".to_string(),
            }),
            Step::Hang => std::future::pending().await,
        }
    }
}

struct MockConnection {
    script: Script,
    calls: Arc<Calls>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl MockConnection {
    fn piped(&self) -> BoxedChannel {
        let (local, peer) = tokio::io::duplex(1024);
        self.peers.lock().unwrap().push(peer);
        Box::new(local)
    }
}

#[async_trait]
impl MultiplexedConnection for MockConnection {
    async fn open_channel(&self, spec: &ChannelSpec) -> Result<BoxedChannel, TransportError> {
        self.calls.channel_opens.fetch_add(1, Ordering::SeqCst);
        self.calls.specs.lock().unwrap().push(spec.clone());
        let step = match spec.kind {
            ChannelKind::Error => self.script.error_channel,
            ChannelKind::Data => self.script.data_channel,
        };
        match step {
            Step::Fail => Err(TransportError::other(format!("{} channel refused", spec.kind))),
            Step::Hang => std::future::pending().await,
            Step::Succeed => match (spec.kind, &self.script.error_payload) {
                (ChannelKind::Error, Some(payload)) => {
                    let channel: BoxedChannel = Box::new(Cursor::new(payload.clone()));
                    Ok(channel)
                }
                _ => Ok(self.piped()),
            },
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        self.peers.lock().unwrap().clear();
        Ok(())
    }
}
