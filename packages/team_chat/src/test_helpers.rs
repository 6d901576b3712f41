use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::facade::{ChatCore, CoreOptions};
use crate::store::Storage;
use crate::transport::{Endpoint, Link, LinkEvent, LinkEventKind, LinkFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Open { url: String, generation: u64 },
    Send(LinkFrame),
    Close,
}

/// Shared record of everything a [`FakeLink`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct LinkLog {
    calls: Arc<Mutex<Vec<LinkCall>>>,
    fail_sends: Arc<AtomicBool>,
}

impl LinkLog {
    fn push(&self, call: LinkCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Make every following `send` fail as if the socket task had died.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_frames(&self) -> Vec<LinkFrame> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LinkCall::Send(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent_frames().into_iter().map(|f| f.text).collect()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LinkCall::Close))
            .count()
    }
}

/// A [`Link`] that records calls instead of touching the network.
#[derive(Debug, Default)]
pub struct FakeLink {
    log: LinkLog,
}

impl FakeLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> LinkLog {
        self.log.clone()
    }
}

impl Link for FakeLink {
    fn open(&mut self, url: &str, generation: u64) {
        self.log.push(LinkCall::Open {
            url: url.to_string(),
            generation,
        });
    }

    fn send(&mut self, frame: LinkFrame) -> Result<(), TransportError> {
        if self.log.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::LinkClosed);
        }
        self.log.push(LinkCall::Send(frame));
        Ok(())
    }

    fn close(&mut self) {
        self.log.push(LinkCall::Close);
    }
}

pub fn test_endpoint() -> Endpoint {
    Endpoint::new("ws://localhost:8000/ws/agent-team", None)
}

/// A fresh facade over in-memory storage and a fake link.
pub fn test_core() -> (ChatCore<FakeLink>, LinkLog) {
    test_core_with(Storage::in_memory())
}

pub fn test_core_with(storage: Storage) -> (ChatCore<FakeLink>, LinkLog) {
    let link = FakeLink::new();
    let log = link.log();
    (ChatCore::new(storage, link, CoreOptions::default()), log)
}

/// Connect and deliver `Opened` for the resulting generation.
pub fn connect_and_open(core: &mut ChatCore<FakeLink>) {
    core.connect(test_endpoint());
    let generation = core.transport().generation();
    core.handle_link_event(LinkEvent::new(generation, LinkEventKind::Opened));
}

/// Deliver a link event on the current generation.
pub fn emit(core: &mut ChatCore<FakeLink>, kind: LinkEventKind) {
    let generation = core.transport().generation();
    core.handle_link_event(LinkEvent::new(generation, kind));
}

/// Deliver one raw inbound frame on the current generation.
pub fn deliver(core: &mut ChatCore<FakeLink>, frame: serde_json::Value) {
    emit(core, LinkEventKind::Frame(frame.to_string()));
}
