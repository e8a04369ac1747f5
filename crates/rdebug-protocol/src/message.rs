//! # Message Envelope
//!
//! Requests flow from the frontend to the agent, responses and events flow
//! back. Every message carries a sequence number assigned by its sender.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One framed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolMessage
{
    /// Frontend → agent command.
    #[serde(rename = "request")]
    Request(Request),
    /// Agent → frontend reply to a request.
    #[serde(rename = "response")]
    Response(Response),
    /// Agent → frontend notification.
    #[serde(rename = "event")]
    Event(Event),
}

impl ProtocolMessage
{
    /// Sequence number of the message.
    #[must_use]
    pub const fn seq(&self) -> i64
    {
        match self {
            Self::Request(r) => r.seq,
            Self::Response(r) => r.seq,
            Self::Event(e) => e.seq,
        }
    }
}

/// A command sent by the frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request
{
    pub seq: i64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request
{
    /// Build a request with typed arguments.
    ///
    /// ## Errors
    ///
    /// Fails if `arguments` cannot be represented as JSON.
    pub fn new<A: Serialize>(seq: i64, command: &str, arguments: &A) -> Result<Self>
    {
        Ok(Self {
            seq,
            command: command.to_string(),
            arguments: Some(serde_json::to_value(arguments)?),
        })
    }

    /// Decode the arguments into `T`. Missing arguments decode from `{}`.
    ///
    /// ## Errors
    ///
    /// Fails if the arguments do not match `T`.
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T>
    {
        let value = self
            .arguments
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        Ok(serde_json::from_value(value)?)
    }
}

/// The agent's reply to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response
{
    pub seq: i64,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// A notification from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event
{
    pub seq: i64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}
