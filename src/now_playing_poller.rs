//! Fixed-interval poll of the player's now-playing state.
//!
//! Each tick queries the bridge and posts the observation to the bus. A tick
//! is skipped while the manager has not yet applied the previous observation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, trace};
use tokio::sync::broadcast::{error::TryRecvError, Receiver, Sender};

use crate::bridge::MusicBridge;
use crate::protocol::{self, NowPlayingMessage};

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Posted,
    SkippedInFlight,
    BusClosed,
}

pub struct NowPlayingPoller {
    bridge: Arc<dyn MusicBridge>,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    bus_consumer: Receiver<protocol::Message>,
    bus_producer: Sender<protocol::Message>,
}

impl NowPlayingPoller {
    pub fn new(
        bridge: Arc<dyn MusicBridge>,
        interval: Duration,
        in_flight: Arc<AtomicBool>,
        bus_consumer: Receiver<protocol::Message>,
        bus_producer: Sender<protocol::Message>,
    ) -> Self {
        Self {
            bridge,
            interval,
            in_flight,
            bus_consumer,
            bus_producer,
        }
    }

    /// Runs one poll cycle.
    pub fn tick(&self) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            trace!("NowPlayingPoller: previous observation still pending, skipping tick");
            return TickOutcome::SkippedInFlight;
        }

        let observation = self.bridge.current_playback_info();
        if let Err(err) = &observation {
            trace!("NowPlayingPoller: nothing observable ({})", err);
        }
        let message = protocol::Message::NowPlaying(NowPlayingMessage::Observed(observation));
        if self.bus_producer.send(message).is_err() {
            self.in_flight.store(false, Ordering::SeqCst);
            return TickOutcome::BusClosed;
        }
        TickOutcome::Posted
    }

    fn shutdown_requested(&mut self) -> bool {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(protocol::Message::Shutdown) => return true,
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => return true,
            }
        }
    }

    pub fn run(&mut self) {
        info!(
            "NowPlayingPoller: polling every {} ms",
            self.interval.as_millis()
        );
        loop {
            if self.shutdown_requested() {
                debug!("NowPlayingPoller: stopping");
                break;
            }
            if self.tick() == TickOutcome::BusClosed {
                debug!("NowPlayingPoller: bus closed");
                break;
            }
            thread::sleep(self.interval);
        }
    }
}
