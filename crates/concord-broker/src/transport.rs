//! Transport links between cores and brokers.
//!
//! A [`Link`] is one end of a bidirectional, ordered, reliable frame
//! pipe: a boxed [`Conduit`] for sending and a channel receiver for the
//! incoming direction. The in-process transport is a pair of unbounded
//! crossbeam channels; a network transport would implement [`Conduit`]
//! over a socket and feed received frames into the same receiver shape.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::LinkError;

/// Sending half of a link. Implementations must preserve frame order.
pub trait Conduit: Send {
    /// Send one encoded frame.
    fn send(&self, frame: Vec<u8>) -> Result<(), LinkError>;
}

/// One end of a connected frame pipe.
pub struct Link {
    /// Outgoing direction.
    pub tx: Box<dyn Conduit>,
    /// Incoming direction. A `RecvError` means the far side is gone.
    pub rx: Receiver<Vec<u8>>,
}

/// In-process [`Conduit`] over a crossbeam channel.
pub struct MemoryConduit {
    tx: Sender<Vec<u8>>,
}

impl Conduit for MemoryConduit {
    fn send(&self, frame: Vec<u8>) -> Result<(), LinkError> {
        self.tx.send(frame).map_err(|_| LinkError::Disconnected)
    }
}

/// Build a connected pair of in-process links.
///
/// Frames sent on either end arrive on the other end's receiver in
/// order. Dropping one end entirely surfaces as `Disconnected` on the
/// survivor's sends and `RecvError` on its receiver.
pub fn memory_link() -> (Link, Link) {
    let (a_tx, b_rx) = unbounded();
    let (b_tx, a_rx) = unbounded();
    (
        Link {
            tx: Box::new(MemoryConduit { tx: a_tx }),
            rx: a_rx,
        },
        Link {
            tx: Box::new(MemoryConduit { tx: b_tx }),
            rx: b_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_cross_in_both_directions() {
        let (a, b) = memory_link();
        a.tx.send(vec![1, 2, 3]).unwrap();
        b.tx.send(vec![9]).unwrap();
        assert_eq!(b.rx.recv().unwrap(), vec![1, 2, 3]);
        assert_eq!(a.rx.recv().unwrap(), vec![9]);
    }

    #[test]
    fn order_is_preserved() {
        let (a, b) = memory_link();
        for i in 0..10u8 {
            a.tx.send(vec![i]).unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(b.rx.recv().unwrap(), vec![i]);
        }
    }

    #[test]
    fn dropped_end_disconnects() {
        let (a, b) = memory_link();
        drop(b);
        assert_eq!(a.tx.send(vec![0]), Err(LinkError::Disconnected));
        assert!(a.rx.recv().is_err());
    }
}
