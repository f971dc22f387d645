//! Delivery evaluator: turns a Send into either a scheduled reception or a drop.
//!
//! The deterministic part (distance, path loss, sensitivity) comes from the
//! [`PropagationModel`]. An optional fading model perturbs the received power
//! with draws from a generator seeded by the run, so a run is reproducible from
//! its seed alone.

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::clock::SimTime;
use super::error::{SimError, SimResult};
use super::signal_calculations::{FadingModel, PropagationModel, SPEED_OF_LIGHT};
use super::topology::Topology;

/// What happened to one frame on the channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// The frame reaches the receiver at `arrival`.
    Delivered { arrival: SimTime, rx_power_dbm: f64 },
    Dropped { rx_power_dbm: f64 },
}

impl Verdict {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Verdict::Delivered { .. })
    }
}

/// Signal propagation delay over `distance` metres at `speed` m/s.
pub fn propagation_delay(distance: f64, speed: f64) -> SimResult<SimTime> {
    SimTime::from_secs(distance / speed)
}

pub fn validate_propagation_speed(speed: f64) -> SimResult<()> {
    if !(speed.is_finite() && speed > 0.0) {
        return Err(SimError::config(format!("propagation speed must be positive, got {speed} m/s")));
    }
    Ok(())
}

pub struct DeliveryEvaluator<'a> {
    topology: &'a Topology,
    model: &'a PropagationModel,
    fading: Option<FadingModel>,
    propagation_speed: f64,
    rng: StdRng,
    delivered: u64,
    dropped: u64,
}

impl<'a> DeliveryEvaluator<'a> {
    pub fn new(topology: &'a Topology, model: &'a PropagationModel) -> Self {
        Self {
            topology,
            model,
            fading: None,
            propagation_speed: SPEED_OF_LIGHT,
            rng: StdRng::seed_from_u64(0),
            delivered: 0,
            dropped: 0,
        }
    }

    /// Enable fading, drawing from a generator seeded with `seed`.
    pub fn with_fading(mut self, fading: FadingModel, seed: u64) -> SimResult<Self> {
        fading.validate()?;
        self.fading = Some(fading);
        self.rng = StdRng::seed_from_u64(seed);
        Ok(self)
    }

    pub fn with_propagation_speed(mut self, speed: f64) -> SimResult<Self> {
        validate_propagation_speed(speed)?;
        self.propagation_speed = speed;
        Ok(self)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Aggregate count of frames the channel did not deliver.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Check that a link can be evaluated at all, without touching counters
    /// or the random stream.
    pub fn check_link(&self, from: u32, to: u32) -> SimResult<()> {
        let tx = self.topology.node(from)?;
        let rx = self.topology.position(to)?;
        self.model.evaluate(&tx.position, &rx, tx.tx_power_dbm).map(|_| ())
    }

    /// Evaluate a frame sent at `now` from node `from` to node `to`.
    pub fn on_send(&mut self, now: SimTime, from: u32, to: u32) -> SimResult<Verdict> {
        let tx = self.topology.node(from)?;
        let rx = self.topology.position(to)?;
        let distance = tx.position.distance(&rx);
        let outcome = self.model.evaluate(&tx.position, &rx, tx.tx_power_dbm)?;

        let (delivered, rx_power_dbm) = match &self.fading {
            Some(fading) => {
                let faded = outcome.rx_power_dbm + fading.sample_db(distance, &mut self.rng)?;
                (self.model.decide(faded), faded)
            }
            None => (outcome.delivered, outcome.rx_power_dbm),
        };

        if !delivered {
            self.dropped += 1;
            log::trace!("{now}: frame {from}->{to} dropped at {rx_power_dbm:.2} dBm over {distance:.1} m");
            return Ok(Verdict::Dropped { rx_power_dbm });
        }
        self.delivered += 1;
        let arrival = now.saturating_add(propagation_delay(distance, self.propagation_speed)?);
        Ok(Verdict::Delivered { arrival, rx_power_dbm })
    }
}
