use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

use super::{BusError, message::Envelope};

/// Outbound side of a postMessage port or WebSocket.
pub trait Transport {
    fn send(&mut self, envelope: Envelope) -> Result<(), BusError>;
}

/// Sends JSON-encoded envelopes over an unbounded channel, e.g. to a task
/// that owns the actual socket.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: UnboundedSender<String>,
    from: Option<String>,
}

impl ChannelTransport {
    pub fn new(from: Option<String>) -> (Self, UnboundedReceiver<String>) {
        let (sender, receiver) = unbounded();
        (Self { sender, from }, receiver)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, mut envelope: Envelope) -> Result<(), BusError> {
        if envelope.from.is_none() {
            envelope.from = self.from.clone();
        }
        let json = envelope.to_json()?;
        self.sender
            .unbounded_send(json)
            .map_err(|_| BusError::Disconnected)
    }
}

impl Transport for Vec<Envelope> {
    fn send(&mut self, envelope: Envelope) -> Result<(), BusError> {
        self.push(envelope);
        Ok(())
    }
}
