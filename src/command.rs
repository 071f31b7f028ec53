//! Typed request/response contract for the UI-facing command interface.
//!
//! Requests travel over a channel together with their own reply sender, so
//! every request gets exactly one response or, if the serving side goes
//! away, a [`Error::ChannelClosed`]. Callers wait with a timeout.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::compiler::CompiledRule;
use crate::error::{Error, Result};
use crate::navigation::{BlockedInfo, TabId};
use crate::pattern::PatternEntry;

/// A command from the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetBlockedInfo {
        #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    TriggerFetchRemote,
    RefreshRules,
    TestMatch {
        url: String,
    },
    ListDynamicRules,
    TempAllow {
        #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    Ping,
}

const ACTIONS: &[&str] = &[
    "getBlockedInfo",
    "triggerFetchRemote",
    "refreshRules",
    "testMatch",
    "listDynamicRules",
    "tempAllow",
    "ping",
];

impl Request {
    /// Decode one JSON request.
    ///
    /// On failure returns the error response to send back.
    pub fn from_json(text: &str) -> std::result::Result<Self, Response> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Response::error(format!("invalid request: {}", e)))?;

        let known = value
            .get("action")
            .and_then(Value::as_str)
            .is_some_and(|a| ACTIONS.contains(&a));
        if !known {
            return Err(Response::error("unknown action"));
        }

        serde_json::from_value(value).map_err(|e| Response::error(format!("invalid request: {}", e)))
    }
}

/// The entry a test URL matched, with its feed details if it is remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedEntry {
    #[serde(flatten)]
    pub entry: PatternEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Response to a [`Request`]. Each variant has a fixed JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    BlockedInfo {
        info: Option<BlockedInfo>,
    },
    Triggered {
        triggered: bool,
    },
    Refreshed {
        refreshed: bool,
    },
    Matched {
        matched: Option<MatchedEntry>,
        #[serde(rename = "totalEntries")]
        total_entries: usize,
    },
    Rules {
        rules: Vec<CompiledRule>,
    },
    TempAllow {
        success: bool,
        #[serde(rename = "originalUrl", skip_serializing_if = "Option::is_none")]
        original_url: Option<String>,
    },
    Pong {
        pong: bool,
    },
    Error {
        error: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A request waiting for its response.
pub struct Envelope {
    pub request: Request,
    reply: Sender<Response>,
}

impl Envelope {
    /// Send the response. A requester that has gone away is not an error.
    pub fn respond(self, response: Response) {
        if self.reply.send(response).is_err() {
            log::debug!("Requester closed before response to {:?}", self.request);
        }
    }
}

/// Sending half of the command channel.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Envelope>,
}

impl CommandSender {
    /// Send a request and wait up to `timeout` for its response.
    pub fn request(&self, request: Request, timeout: Duration) -> Result<Response> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Envelope { request, reply })
            .map_err(|_| Error::ChannelClosed)?;

        match rx.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        }
    }
}

/// Serving half of the command channel.
pub struct CommandReceiver {
    rx: Receiver<Envelope>,
}

impl CommandReceiver {
    /// Wait up to `timeout` for the next request.
    ///
    /// `Ok(None)` means nothing arrived in time; `Err` means every sender
    /// is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        }
    }
}

/// Create a command channel.
pub fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel();
    (CommandSender { tx }, CommandReceiver { rx })
}
