//! Scripted transport used by the stream unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::mpsc;

use crate::stream::transport::{
    ConnectOptions, ReadyState, SseConnection, SseConnector, TransportError, TransportEvent,
};

#[derive(Clone, Debug)]
pub(crate) enum Step {
    Open,
    Message { event: String, data: String },
    /// Server finished the stream.
    End,
    /// Connection broke while live.
    Fail,
}

impl Step {
    pub(crate) fn message(event: &str, data: &str) -> Self {
        Self::Message {
            event: event.to_string(),
            data: data.to_string(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ScriptedConnector {
    tx: mpsc::UnboundedSender<Step>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Step>>>>,
    urls: Arc<Mutex<Vec<Url>>>,
    refuse: bool,
    pub(crate) connects: Arc<AtomicUsize>,
    pub(crate) closes: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            urls: Arc::new(Mutex::new(Vec::new())),
            refuse: false,
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            refuse: true,
            ..Self::new()
        }
    }

    pub(crate) fn push(&self, step: Step) {
        let _ = self.tx.send(step);
    }

    pub(crate) fn last_url(&self) -> Option<Url> {
        self.urls.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl SseConnector for ScriptedConnector {
    async fn connect(
        &self,
        url: &Url,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn SseConnection>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(url.clone());
        }
        if self.refuse {
            return Err(TransportError::InvalidUrl("refused by test".to_string()));
        }

        let rx = self
            .rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or_else(|| TransportError::InvalidUrl("script already consumed".to_string()))?;

        Ok(Box::new(ScriptedConnection {
            rx,
            state: ReadyState::Connecting,
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct ScriptedConnection {
    rx: mpsc::UnboundedReceiver<Step>,
    state: ReadyState,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SseConnection for ScriptedConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.state == ReadyState::Closed {
            return None;
        }
        match self.rx.recv().await {
            Some(Step::Open) => {
                self.state = ReadyState::Open;
                Some(TransportEvent::Open)
            }
            Some(Step::Message { event, data }) => Some(TransportEvent::Message { event, data }),
            Some(Step::End) => {
                self.state = ReadyState::Closed;
                Some(TransportEvent::Error)
            }
            Some(Step::Fail) => {
                self.state = ReadyState::Connecting;
                Some(TransportEvent::Error)
            }
            None => std::future::pending().await,
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.state
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.state = ReadyState::Closed;
    }
}
