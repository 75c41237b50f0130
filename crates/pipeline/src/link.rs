//! Channel-backed links to the two connections
//!
//! The relay never touches a socket directly. Each side is a pair of bounded
//! channels; the socket owner (or a test) holds the peer half.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::frames::{ClientEvent, ServerEvent, TelephonyInbound, TelephonyOutbound};
use crate::PipelineError;

/// Default channel depth for both links
pub const LINK_CAPACITY: usize = 256;

/// Pipeline half of the telephony connection
#[derive(Debug)]
pub struct TelephonyLink {
    pub inbound: mpsc::Receiver<TelephonyInbound>,
    pub outbound: mpsc::Sender<TelephonyOutbound>,
}

/// Socket half of the telephony connection
#[derive(Debug)]
pub struct TelephonyPeer {
    pub to_pipeline: mpsc::Sender<TelephonyInbound>,
    pub from_pipeline: mpsc::Receiver<TelephonyOutbound>,
}

impl TelephonyLink {
    pub fn pair(capacity: usize) -> (TelephonyLink, TelephonyPeer) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            TelephonyLink {
                inbound: in_rx,
                outbound: out_tx,
            },
            TelephonyPeer {
                to_pipeline: in_tx,
                from_pipeline: out_rx,
            },
        )
    }
}

/// Pipeline half of the model connection
#[derive(Debug)]
pub struct ModelLink {
    pub events: mpsc::Receiver<ServerEvent>,
    pub commands: mpsc::Sender<ClientEvent>,
}

/// Socket half of the model connection
#[derive(Debug)]
pub struct ModelPeer {
    pub to_pipeline: mpsc::Sender<ServerEvent>,
    pub from_pipeline: mpsc::Receiver<ClientEvent>,
}

impl ModelLink {
    pub fn pair(capacity: usize) -> (ModelLink, ModelPeer) {
        let (ev_tx, ev_rx) = mpsc::channel(capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        (
            ModelLink {
                events: ev_rx,
                commands: cmd_tx,
            },
            ModelPeer {
                to_pipeline: ev_tx,
                from_pipeline: cmd_rx,
            },
        )
    }
}

/// Opens the realtime model connection for one call
#[async_trait]
pub trait ModelConnector: Send + Sync {
    async fn connect(&self, call_id: &str) -> Result<ModelLink, PipelineError>;
}
