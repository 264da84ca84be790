//! Close negotiation.
//!
//! Tracks the two-sided close handshake for one connection: who sent the
//! first Close frame, what each side said, and how long we wait for the
//! peer's acknowledgment. Whatever path ends the connection (clean ack,
//! timeout, protocol error, broken transport), [`CloseNegotiation::release`]
//! reports `true` exactly once so the transport is torn down exactly once.
//!
//! ```text
//!             initiate            peer Close
//!  ┌──────┐ ───────────> ┌──────────────┐ ──────────> ┌──────┐
//!  │ Open │              │ AwaitingPeer │  timeout     │ Done │
//!  └──────┘ ───────────────────────────────────────> └──────┘
//!          peer Close (reply sent) / abort
//! ```

use std::time::{Duration, Instant};

use echoframe_proto::{CloseCode, CloseInfo, Frame};

/// Side that sent the first Close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    /// We closed first
    Local,
    /// The peer closed first
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    AwaitingPeer { deadline: Instant },
    Done,
}

/// Outcome of receiving the peer's Close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseStep {
    /// Peer closed first; send this Close frame back.
    Reply(Frame),
    /// Peer acknowledged our Close; the handshake is complete.
    Complete,
    /// Handshake already finished; nothing to do.
    Ignored,
}

/// Close handshake bookkeeping.
#[derive(Debug, Clone)]
pub struct CloseNegotiation {
    timeout: Duration,
    phase: Phase,
    initiator: Option<Initiator>,
    sent: Option<CloseInfo>,
    received: Option<CloseInfo>,
    clean: bool,
    released: bool,
}

impl CloseNegotiation {
    /// Create a negotiation waiting at most `timeout` for the peer's
    /// acknowledgment.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            phase: Phase::Open,
            initiator: None,
            sent: None,
            received: None,
            clean: false,
            released: false,
        }
    }

    /// Start a local close.
    ///
    /// Returns the Close frame to send, or `None` if a Close frame was
    /// already sent.
    pub fn initiate(&mut self, info: CloseInfo, now: Instant) -> Option<Frame> {
        if self.phase != Phase::Open {
            return None;
        }
        let frame = Frame::close(Some(&info));
        self.initiator = Some(Initiator::Local);
        self.sent = Some(info);
        self.phase = Phase::AwaitingPeer { deadline: now + self.timeout };
        Some(frame)
    }

    /// Handle the peer's Close frame (`None` when it carried no status code).
    ///
    /// A peer-initiated close is answered with the same code, or 1000 when
    /// the peer sent none.
    pub fn receive(&mut self, info: Option<CloseInfo>) -> CloseStep {
        match self.phase {
            Phase::Open => {
                let code = info.as_ref().map_or(CloseCode::NORMAL, CloseInfo::code);
                let reply = CloseInfo::code_only(code);
                let frame = Frame::close(Some(&reply));

                self.initiator = Some(Initiator::Remote);
                self.received = info;
                self.sent = Some(reply);
                self.clean = true;
                self.phase = Phase::Done;
                CloseStep::Reply(frame)
            },
            Phase::AwaitingPeer { .. } => {
                self.received = info;
                self.clean = true;
                self.phase = Phase::Done;
                CloseStep::Complete
            },
            Phase::Done => CloseStep::Ignored,
        }
    }

    /// Abandon the handshake after a protocol error.
    ///
    /// Returns a best-effort Close frame carrying `info` if none was sent
    /// yet. The close is unclean either way.
    pub fn abort(&mut self, info: CloseInfo) -> Option<Frame> {
        let frame = match self.phase {
            Phase::Open => {
                let frame = Frame::close(Some(&info));
                self.initiator = Some(Initiator::Local);
                self.sent = Some(info);
                Some(frame)
            },
            Phase::AwaitingPeer { .. } | Phase::Done => None,
        };
        self.clean = false;
        self.phase = Phase::Done;
        frame
    }

    /// Check the acknowledgment deadline.
    ///
    /// Returns `true` once, when the deadline passes while still waiting.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::AwaitingPeer { deadline } if now >= deadline => {
                self.clean = false;
                self.phase = Phase::Done;
                true
            },
            _ => false,
        }
    }

    /// When the wait for the peer's acknowledgment ends.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::AwaitingPeer { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Mark the transport released.
    ///
    /// Returns `true` the first time only. Ends the negotiation if it was
    /// still running (the close is then unclean).
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        if self.phase != Phase::Done {
            self.clean = false;
            self.phase = Phase::Done;
        }
        self.released = true;
        true
    }

    /// Check if a Close frame has been sent or the handshake ended.
    pub fn is_started(&self) -> bool {
        self.phase != Phase::Open
    }

    /// Check if the handshake has ended (acknowledged, timed out or aborted).
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Check if both Close frames were exchanged.
    pub fn is_clean(&self) -> bool {
        self.clean
    }

    /// Check if the transport was released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Side that closed first.
    pub fn initiator(&self) -> Option<Initiator> {
        self.initiator
    }

    /// Close info we sent.
    pub fn sent(&self) -> Option<&CloseInfo> {
        self.sent.as_ref()
    }

    /// Close info the peer sent.
    pub fn received(&self) -> Option<&CloseInfo> {
        self.received.as_ref()
    }
}
