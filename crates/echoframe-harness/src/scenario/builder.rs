//! Scenario builder API.
//!
//! A scenario cannot run without an oracle: [`Scenario::oracle`] is the only
//! way to obtain a [`RunnableScenario`].

use std::time::{Duration, Instant};

use echoframe_core::ConnectionConfig;

use crate::{
    SimEnv,
    scenario::{OracleFn, Peer, Step, World},
};

enum Event {
    Step { peer: String, step: Step },
    Advance(Duration),
}

/// Scenario builder.
pub struct Scenario {
    name: String,
    seed: u64,
    peers: Vec<(String, ConnectionConfig)>,
    events: Vec<Event>,
}

impl Scenario {
    /// Create a scenario with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), seed: 0, peers: Vec::new(), events: Vec::new() }
    }

    /// Seed for masking keys and handshake nonces.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Add a peer whose server side uses the default configuration.
    pub fn peer(self, name: impl Into<String>) -> Self {
        self.peer_with_config(name, ConnectionConfig::default())
    }

    /// Add a peer whose server side uses `config`.
    pub fn peer_with_config(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.peers.push((name.into(), config));
        self
    }

    /// Append a step for `peer`.
    pub fn step(mut self, peer: impl Into<String>, step: Step) -> Self {
        self.events.push(Event::Step { peer: peer.into(), step });
        self
    }

    /// Advance the shared clock, firing every peer's timers on the way.
    pub fn advance(mut self, by: Duration) -> Self {
        self.events.push(Event::Advance(by));
        self
    }

    /// Set the oracle and return a runnable scenario.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// Connects every peer, plays the script in order, then runs the oracle
    /// on the final world.
    pub fn run(self) -> Result<(), String> {
        let Scenario { name, seed, peers, events } = self.scenario;
        let env = SimEnv::with_seed(seed);
        let mut now = Instant::now();
        let mut world = World::new();

        for (peer_name, config) in peers {
            let peer = Peer::connect(config, env.clone(), now)
                .map_err(|e| format!("Scenario '{name}': peer {peer_name} failed to connect: {e}"))?;
            world.add_peer(peer_name, peer);
        }

        for event in events {
            match event {
                Event::Step { peer, step } => {
                    let target = world
                        .peer_mut(&peer)
                        .ok_or_else(|| format!("Scenario '{name}': peer {peer} not found"))?;
                    target
                        .apply(step, now)
                        .map_err(|e| format!("Scenario '{name}': peer {peer}: {e}"))?;
                },
                Event::Advance(by) => {
                    let to = now + by;
                    for peer in world.peers_mut() {
                        peer.advance(now, to).map_err(|e| format!("Scenario '{name}': {e}"))?;
                    }
                    now = to;
                },
            }
        }

        (self.oracle)(&world).map_err(|e| format!("Scenario '{name}': {e}"))
    }
}
