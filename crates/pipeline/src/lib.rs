//! Voice relay pipeline
//!
//! Relays audio between a telephony media stream and a realtime speech
//! model, driving the call state machine from model events:
//! - Typed envelopes for both connections
//! - Channel-backed links and the WebSocket model connector
//! - Greeting sequencing, barge-in, tool dispatch, duration ceiling
//! - Finalize-once with registry cleanup

pub mod config;
pub mod frames;
pub mod link;
pub mod phase;
pub mod realtime;
pub mod registry;
pub mod relay;

pub use config::{PipelineConfig, SessionOptions};
pub use frames::{
    ClientEvent, ConversationItem, ErrorInfo, MediaPayload, ResponseInfo, ServerEvent, StreamStart,
    TelephonyInbound, TelephonyOutbound,
};
pub use link::{ModelConnector, ModelLink, ModelPeer, TelephonyLink, TelephonyPeer, LINK_CAPACITY};
pub use phase::PipelinePhase;
pub use realtime::RealtimeConnector;
pub use registry::{PipelineHandle, PipelineRegistry};
pub use relay::{RelayEnd, VoicePipeline};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Model connection failed: {0}")]
    Connection(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Session configuration rejected: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}
