//! Reusable oracles.

use echoframe_proto::CloseCode;

use crate::scenario::{OracleFn, World};

/// Every peer got back exactly what it sent, in order.
pub fn all_echoed() -> OracleFn {
    Box::new(|world: &World| {
        for (name, peer) in world.peers() {
            if peer.echoed() != peer.sent() {
                return Err(format!(
                    "{name}: sent {} messages, got {} back (or out of order)",
                    peer.sent().len(),
                    peer.echoed().len()
                ));
            }
        }
        Ok(())
    })
}

/// Every connection finished with both Close frames exchanged and its
/// transport released exactly once.
pub fn all_closed_cleanly() -> OracleFn {
    let handshakes: OracleFn = Box::new(|world: &World| {
        for (name, peer) in world.peers() {
            if !peer.connection().is_closed() {
                return Err(format!("{name}: still {:?}", peer.connection().state()));
            }
            if !peer.connection().is_clean() {
                return Err(format!("{name}: close handshake incomplete"));
            }
        }
        Ok(())
    });
    all_of(vec![handshakes, transport_released_once()])
}

/// Every closed connection asked for its transport to be closed exactly
/// once, and no open connection asked at all.
pub fn transport_released_once() -> OracleFn {
    Box::new(|world: &World| {
        for (name, peer) in world.peers() {
            let expected = usize::from(peer.is_released());
            if peer.close_actions() != expected {
                return Err(format!(
                    "{name}: {} transport close requests (released: {})",
                    peer.close_actions(),
                    peer.is_released()
                ));
            }
        }
        Ok(())
    })
}

/// `peer` received a Close frame carrying `code`.
pub fn closed_with(peer: &'static str, code: CloseCode) -> OracleFn {
    Box::new(move |world: &World| {
        let target = world.peer(peer).ok_or_else(|| format!("{peer} not found"))?;
        match target.close_code() {
            Some(got) if got == code => Ok(()),
            other => Err(format!("{peer}: expected close {code}, got {other:?}")),
        }
    })
}

/// All oracles must pass; the first failure is reported.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world: &World| oracles.iter().try_for_each(|oracle| oracle(world)))
}

