use std::fmt;

use tokio::sync::mpsc;

use crate::{Envelope, PortClosed};

/// Create an entangled pair of ports. Messages posted on one are received, in order, on the
/// other.
pub fn channel() -> (MessagePort, MessagePort) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MessagePort {
            tx: PortSender { tx: a_tx },
            rx: PortReceiver { rx: b_rx },
        },
        MessagePort {
            tx: PortSender { tx: b_tx },
            rx: PortReceiver { rx: a_rx },
        },
    )
}

/// One endpoint of a bidirectional, FIFO message channel.
pub struct MessagePort {
    tx: PortSender,
    rx: PortReceiver,
}

impl MessagePort {
    pub fn post(&self, envelope: Envelope) -> Result<(), PortClosed> {
        self.tx.post(envelope)
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv()
    }

    pub fn sender(&self) -> PortSender {
        self.tx.clone()
    }

    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.tx, self.rx)
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Sending half of a [`MessagePort`]. Cheap to clone.
#[derive(Clone)]
pub struct PortSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl PortSender {
    pub fn post(&self, envelope: Envelope) -> Result<(), PortClosed> {
        self.tx.send(envelope).map_err(|_| PortClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for PortSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Receiving half of a [`MessagePort`].
pub struct PortReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl PortReceiver {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

impl fmt::Debug for PortReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortReceiver").finish_non_exhaustive()
    }
}
