//! Radio propagation and signal calculations.
//!
//! Contains:
//! - Deterministic path loss models (Friis, two-ray ground, COST231-Hata,
//!   log-distance, constant) behind [`PropagationModel::evaluate`]
//! - Closed-form delivery range for the models that have one
//! - Seeded small-scale fading and shadowing applied on top of the path loss
//! - dBm/mW conversions
//!
//! Units:
//! - Power: dBm, mW (conversion provided)
//! - Distance: metres
//! - Frequency: Hz in the parameter structs; COST231 works internally in MHz/km

use std::f64::consts::PI;

use rand::Rng;
use rand_distr::{Distribution, Gamma, Normal};
use serde::{Deserialize, Serialize};

use super::error::{SimError, SimResult};
use super::geometry::Position;

/// Speed of light in vacuum, m/s. Also the default signal propagation speed.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Carrier frequency used when a model does not specify one (802.11a channel 36 area).
pub const DEFAULT_FREQUENCY_HZ: f64 = 5.15e9;
/// Default transmit power (40 mW).
pub const DEFAULT_TX_POWER_DBM: f64 = 16.0206;
/// Default receiver sensitivity.
pub const DEFAULT_RX_SENSITIVITY_DBM: f64 = -101.0;

/// Result of evaluating the channel for one transmitter/receiver pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryOutcome {
    pub delivered: bool,
    pub rx_power_dbm: f64,
}

/// Free-space (Friis) parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FriisParameters {
    pub frequency_hz: f64,
    /// Dimensionless system loss factor L (>= 1).
    pub system_loss: f64,
    /// Distances below this are evaluated at this distance.
    pub min_distance: f64,
}

impl Default for FriisParameters {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            system_loss: 1.0,
            min_distance: 0.0,
        }
    }
}

impl FriisParameters {
    pub fn with_frequency(mut self, frequency_hz: f64) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }
}

/// Two-ray ground reflection parameters. Antenna heights come from the node
/// positions (`z`) plus `height_above_z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoRayGroundParameters {
    pub frequency_hz: f64,
    pub system_loss: f64,
    pub min_distance: f64,
    pub height_above_z: f64,
}

impl Default for TwoRayGroundParameters {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            system_loss: 1.0,
            min_distance: 0.5,
            height_above_z: 0.0,
        }
    }
}

impl TwoRayGroundParameters {
    pub fn with_frequency(mut self, frequency_hz: f64) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }

    pub fn with_min_distance(mut self, min_distance: f64) -> Self {
        self.min_distance = min_distance;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitySize {
    Small,
    Medium,
    Large,
}

/// COST231-Hata parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cost231Parameters {
    pub frequency_hz: f64,
    /// Base station antenna height, metres.
    pub bs_antenna_height: f64,
    /// Subscriber (mobile) antenna height, metres.
    pub ss_antenna_height: f64,
    pub city_size: CitySize,
    /// Area correction C: 0 dB for medium/small cities and suburbs, 3 dB for metropolitan centres.
    pub c_db: f64,
}

impl Default for Cost231Parameters {
    fn default() -> Self {
        Self {
            frequency_hz: 1.8e9,
            bs_antenna_height: 50.0,
            ss_antenna_height: 3.0,
            city_size: CitySize::Medium,
            c_db: 0.0,
        }
    }
}

impl Cost231Parameters {
    pub const FREQUENCY_MHZ_RANGE: (f64, f64) = (1500.0, 2000.0);
    pub const BS_HEIGHT_RANGE: (f64, f64) = (30.0, 200.0);
    pub const SS_HEIGHT_RANGE: (f64, f64) = (1.0, 10.0);
    pub const DISTANCE_M_RANGE: (f64, f64) = (1_000.0, 20_000.0);

    pub fn with_city_size(mut self, city_size: CitySize) -> Self {
        self.city_size = city_size;
        self
    }

    pub fn with_c(mut self, c_db: f64) -> Self {
        self.c_db = c_db;
        self
    }

    fn validate(&self) -> SimResult<()> {
        check_range("cost231", "frequency_mhz", self.frequency_hz * 1e-6, Self::FREQUENCY_MHZ_RANGE)?;
        check_range("cost231", "bs_antenna_height", self.bs_antenna_height, Self::BS_HEIGHT_RANGE)?;
        check_range("cost231", "ss_antenna_height", self.ss_antenna_height, Self::SS_HEIGHT_RANGE)?;
        if !self.c_db.is_finite() {
            return Err(SimError::config("cost231: c_db must be finite"));
        }
        Ok(())
    }

    /// Path loss in dB at `distance` metres.
    ///
    /// # Formula
    ///
    /// ```text
    /// L = 46.3 + 33.9·log₁₀(f) − 13.82·log₁₀(h_b) − a(h_m) + (44.9 − 6.55·log₁₀(h_b))·log₁₀(d) + C
    /// ```
    ///
    /// with `f` in MHz, `d` in km and the mobile antenna correction
    ///
    /// ```text
    /// small/medium city: a(h_m) = (1.1·log₁₀(f) − 0.7)·h_m − (1.56·log₁₀(f) − 0.8)
    /// large city:        a(h_m) = 3.2·(log₁₀(11.75·h_m))² − 4.97
    /// ```
    ///
    /// Outside 1–20 km the empirical fit does not hold and the call fails with
    /// [`SimError::OutOfRange`].
    pub fn path_loss_db(&self, distance: f64) -> SimResult<f64> {
        check_range("cost231", "distance_m", distance, Self::DISTANCE_M_RANGE)?;
        let log_f = (self.frequency_hz * 1e-6).log10();
        let log_hb = self.bs_antenna_height.log10();
        let hm = self.ss_antenna_height;
        let a_hm = match self.city_size {
            CitySize::Small | CitySize::Medium => (1.1 * log_f - 0.7) * hm - (1.56 * log_f - 0.8),
            CitySize::Large => 3.2 * (11.75 * hm).log10().powi(2) - 4.97,
        };
        let log_d = (distance * 1e-3).log10();
        Ok(46.3 + 33.9 * log_f - 13.82 * log_hb - a_hm + (44.9 - 6.55 * log_hb) * log_d + self.c_db)
    }
}

/// Log-distance path loss parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogDistanceParameters {
    /// Path loss exponent (n). 2.0 for free space, 2.7 to 3.5 for urban areas.
    pub exponent: f64,
    /// Reference distance d₀ in metres.
    pub reference_distance: f64,
    /// Path loss at d₀ in dB.
    pub reference_loss_db: f64,
}

impl Default for LogDistanceParameters {
    fn default() -> Self {
        Self {
            exponent: 3.0,
            reference_distance: 1.0,
            reference_loss_db: 46.6777,
        }
    }
}

/// Fixed-loss channel: every frame is delivered, at `tx − loss_db`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantParameters {
    pub loss_db: f64,
}

/// The closed set of path loss models. One variant is chosen per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum LossModel {
    Friis(FriisParameters),
    TwoRayGround(TwoRayGroundParameters),
    Cost231Hata(Cost231Parameters),
    LogDistance(LogDistanceParameters),
    Constant(ConstantParameters),
}

impl LossModel {
    pub fn name(&self) -> &'static str {
        match self {
            LossModel::Friis(_) => "friis",
            LossModel::TwoRayGround(_) => "two_ray_ground",
            LossModel::Cost231Hata(_) => "cost231_hata",
            LossModel::LogDistance(_) => "log_distance",
            LossModel::Constant(_) => "constant",
        }
    }

    fn validate(&self) -> SimResult<()> {
        match self {
            LossModel::Friis(p) => validate_free_space("friis", p.frequency_hz, p.system_loss, p.min_distance),
            LossModel::TwoRayGround(p) => {
                validate_free_space("two_ray_ground", p.frequency_hz, p.system_loss, p.min_distance)?;
                if !p.height_above_z.is_finite() {
                    return Err(SimError::config("two_ray_ground: height_above_z must be finite"));
                }
                Ok(())
            }
            LossModel::Cost231Hata(p) => p.validate(),
            LossModel::LogDistance(p) => {
                if !(p.exponent.is_finite() && p.exponent > 0.0) {
                    return Err(SimError::config(format!("log_distance: exponent must be positive, got {}", p.exponent)));
                }
                if !(p.reference_distance.is_finite() && p.reference_distance > 0.0) {
                    return Err(SimError::config(format!(
                        "log_distance: reference_distance must be positive, got {}",
                        p.reference_distance
                    )));
                }
                if !p.reference_loss_db.is_finite() {
                    return Err(SimError::config("log_distance: reference_loss_db must be finite"));
                }
                Ok(())
            }
            LossModel::Constant(p) => {
                if !p.loss_db.is_finite() {
                    return Err(SimError::config("constant: loss_db must be finite"));
                }
                Ok(())
            }
        }
    }

    /// Received power in dBm for a transmission from `tx` to `rx`.
    pub fn received_power_dbm(&self, tx: &Position, rx: &Position, tx_power_dbm: f64) -> SimResult<f64> {
        let distance = tx.distance(rx);
        if distance.is_nan() || distance <= 0.0 {
            return Err(SimError::config(format!(
                "{}: transmitter and receiver must be apart, distance is {distance} m",
                self.name()
            )));
        }
        let rx_power = match self {
            LossModel::Friis(p) => {
                let d = distance.max(p.min_distance);
                tx_power_dbm + friis_gain_db(wavelength(p.frequency_hz), d, p.system_loss)
            }
            LossModel::TwoRayGround(p) => {
                let d = distance.max(p.min_distance);
                let lambda = wavelength(p.frequency_hz);
                let ht = tx.z + p.height_above_z;
                let hr = rx.z + p.height_above_z;
                match two_ray_crossover_distance(ht, hr, lambda) {
                    Some(crossover) if d > crossover => {
                        // P_r = P_t · h_t² · h_r² / (d⁴ · L)
                        tx_power_dbm + 20.0 * (ht * hr / (d * d)).log10() - 10.0 * p.system_loss.log10()
                    }
                    _ => tx_power_dbm + friis_gain_db(lambda, d, p.system_loss),
                }
            }
            LossModel::Cost231Hata(p) => tx_power_dbm - p.path_loss_db(distance)?,
            LossModel::LogDistance(p) => {
                let loss = if distance <= p.reference_distance {
                    p.reference_loss_db
                } else {
                    p.reference_loss_db + 10.0 * p.exponent * (distance / p.reference_distance).log10()
                };
                tx_power_dbm - loss
            }
            LossModel::Constant(p) => tx_power_dbm - p.loss_db,
        };
        Ok(rx_power)
    }
}

/// A path loss model plus the receiver sensitivity that turns received power
/// into a delivery decision. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationModel {
    loss: LossModel,
    rx_sensitivity_dbm: f64,
}

impl PropagationModel {
    /// Validate the parameters and build the model with the default sensitivity.
    ///
    /// COST231 frequency and antenna heights outside the model's domain fail
    /// with [`SimError::OutOfRange`]; other bad parameters with
    /// [`SimError::Configuration`].
    pub fn new(loss: LossModel) -> SimResult<Self> {
        loss.validate()?;
        Ok(Self {
            loss,
            rx_sensitivity_dbm: DEFAULT_RX_SENSITIVITY_DBM,
        })
    }

    pub fn friis(params: FriisParameters) -> SimResult<Self> {
        Self::new(LossModel::Friis(params))
    }

    pub fn two_ray_ground(params: TwoRayGroundParameters) -> SimResult<Self> {
        Self::new(LossModel::TwoRayGround(params))
    }

    pub fn cost231_hata(params: Cost231Parameters) -> SimResult<Self> {
        Self::new(LossModel::Cost231Hata(params))
    }

    pub fn log_distance(params: LogDistanceParameters) -> SimResult<Self> {
        Self::new(LossModel::LogDistance(params))
    }

    pub fn constant() -> Self {
        Self {
            loss: LossModel::Constant(ConstantParameters::default()),
            rx_sensitivity_dbm: DEFAULT_RX_SENSITIVITY_DBM,
        }
    }

    pub fn with_rx_sensitivity(mut self, rx_sensitivity_dbm: f64) -> SimResult<Self> {
        if !rx_sensitivity_dbm.is_finite() {
            return Err(SimError::config("receiver sensitivity must be finite"));
        }
        self.rx_sensitivity_dbm = rx_sensitivity_dbm;
        Ok(self)
    }

    pub fn loss_model(&self) -> &LossModel {
        &self.loss
    }

    pub fn name(&self) -> &'static str {
        self.loss.name()
    }

    pub fn rx_sensitivity_dbm(&self) -> f64 {
        self.rx_sensitivity_dbm
    }

    /// Whether frames are delivered regardless of received power.
    pub fn always_delivers(&self) -> bool {
        matches!(self.loss, LossModel::Constant(_))
    }

    /// Decide whether a frame sent from `tx` at `tx_power_dbm` reaches `rx`.
    ///
    /// Pure: identical inputs always produce identical outcomes.
    pub fn evaluate(&self, tx: &Position, rx: &Position, tx_power_dbm: f64) -> SimResult<DeliveryOutcome> {
        let rx_power_dbm = self.loss.received_power_dbm(tx, rx, tx_power_dbm)?;
        Ok(DeliveryOutcome {
            delivered: self.decide(rx_power_dbm),
            rx_power_dbm,
        })
    }

    /// Apply the delivery rule to an already computed received power.
    pub fn decide(&self, rx_power_dbm: f64) -> bool {
        self.always_delivers() || rx_power_dbm >= self.rx_sensitivity_dbm
    }

    /// Largest distance at which a frame sent at `tx_power_dbm` is still
    /// delivered, for models with a closed form. `None` for the others.
    pub fn effective_range(&self, tx_power_dbm: f64) -> Option<f64> {
        match &self.loss {
            LossModel::Friis(p) => Some(friis_range(tx_power_dbm, self.rx_sensitivity_dbm, p)),
            LossModel::LogDistance(p) => Some(log_distance_range(tx_power_dbm, self.rx_sensitivity_dbm, p)),
            _ => None,
        }
    }
}

/// Carrier wavelength in metres.
pub fn wavelength(frequency_hz: f64) -> f64 {
    SPEED_OF_LIGHT / frequency_hz
}

/// Free-space gain in dB (negative): `10·log₁₀(λ² / ((4π)²·d²·L))`.
fn friis_gain_db(lambda: f64, distance: f64, system_loss: f64) -> f64 {
    20.0 * (lambda / (4.0 * PI * distance)).log10() - 10.0 * system_loss.log10()
}

/// Distance beyond which the ground reflection dominates: `4π·h_t·h_r / λ`.
///
/// `None` when either antenna is at or below ground, where only the direct ray
/// is modelled.
pub fn two_ray_crossover_distance(tx_height: f64, rx_height: f64, lambda: f64) -> Option<f64> {
    if tx_height <= 0.0 || rx_height <= 0.0 {
        return None;
    }
    Some(4.0 * PI * tx_height * rx_height / lambda)
}

/// Solve the Friis equation for the distance where received power equals the
/// sensitivity.
///
/// # Formula
///
/// ```text
/// P_tx + 20·log₁₀(λ / (4π·d)) − 10·log₁₀(L) = S
///   =>  d = λ / (4π) · 10^((P_tx − S − 10·log₁₀(L)) / 20)
/// ```
///
/// The minimum distance clamp is ignored; below it every frame is delivered anyway
/// as long as the range exceeds it.
pub fn friis_range(tx_power_dbm: f64, rx_sensitivity_dbm: f64, params: &FriisParameters) -> f64 {
    let lambda = wavelength(params.frequency_hz);
    let budget = tx_power_dbm - rx_sensitivity_dbm - 10.0 * params.system_loss.log10();
    lambda / (4.0 * PI) * 10f64.powf(budget / 20.0)
}

/// Solve the log-distance model for the distance where received power equals
/// the sensitivity: `d = d₀ · 10^((P_tx − S − PL(d₀)) / (10·n))`.
///
/// Returns `0.0` when the budget does not even cover the reference loss.
pub fn log_distance_range(tx_power_dbm: f64, rx_sensitivity_dbm: f64, params: &LogDistanceParameters) -> f64 {
    let numerator = tx_power_dbm - rx_sensitivity_dbm - params.reference_loss_db;
    if numerator < 0.0 {
        return 0.0;
    }
    params.reference_distance * 10f64.powf(numerator / (10.0 * params.exponent))
}

fn validate_free_space(model: &str, frequency_hz: f64, system_loss: f64, min_distance: f64) -> SimResult<()> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return Err(SimError::config(format!("{model}: frequency must be positive, got {frequency_hz}")));
    }
    if !(system_loss.is_finite() && system_loss >= 1.0) {
        return Err(SimError::config(format!("{model}: system_loss must be >= 1, got {system_loss}")));
    }
    if !(min_distance.is_finite() && min_distance >= 0.0) {
        return Err(SimError::config(format!("{model}: min_distance must be non-negative, got {min_distance}")));
    }
    Ok(())
}

fn check_range(model: &'static str, parameter: &'static str, value: f64, (min, max): (f64, f64)) -> SimResult<()> {
    if value.is_nan() || value < min || value > max {
        return Err(SimError::OutOfRange {
            model,
            parameter,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Nakagami-m fast fading. The shape parameter depends on the link distance:
/// `m0` below `distance1`, `m1` up to `distance2`, `m2` beyond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NakagamiParameters {
    pub distance1: f64,
    pub distance2: f64,
    pub m0: f64,
    pub m1: f64,
    pub m2: f64,
}

impl Default for NakagamiParameters {
    fn default() -> Self {
        Self {
            distance1: 80.0,
            distance2: 200.0,
            m0: 1.5,
            m1: 0.75,
            m2: 0.75,
        }
    }
}

impl NakagamiParameters {
    /// Same shape parameter at every distance (`m = 1` is Rayleigh fading).
    pub fn uniform(m: f64) -> Self {
        Self {
            m0: m,
            m1: m,
            m2: m,
            ..Self::default()
        }
    }

    fn shape_for(&self, distance: f64) -> f64 {
        if distance < self.distance1 {
            self.m0
        } else if distance < self.distance2 {
            self.m1
        } else {
            self.m2
        }
    }
}

/// Random variation applied on top of the deterministic path loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fading", rename_all = "snake_case")]
pub enum FadingModel {
    /// Power gain drawn from Gamma(m, 1/m) (unit mean).
    Nakagami(NakagamiParameters),
    /// Log-normal shadowing: Normal(0, σ) in dB.
    Shadowing { sigma_db: f64 },
}

impl FadingModel {
    pub fn validate(&self) -> SimResult<()> {
        match self {
            FadingModel::Nakagami(p) => {
                for m in [p.m0, p.m1, p.m2] {
                    if !(m.is_finite() && m > 0.0) {
                        return Err(SimError::config(format!("nakagami: m must be positive, got {m}")));
                    }
                }
                if !(p.distance1 >= 0.0 && p.distance2 >= p.distance1) {
                    return Err(SimError::config("nakagami: distances must satisfy 0 <= distance1 <= distance2"));
                }
                Ok(())
            }
            FadingModel::Shadowing { sigma_db } => {
                if !(sigma_db.is_finite() && *sigma_db >= 0.0) {
                    return Err(SimError::config(format!("shadowing: sigma must be non-negative, got {sigma_db}")));
                }
                Ok(())
            }
        }
    }

    /// Sample a fade in dB (positive = stronger) for a link of `distance` metres.
    pub fn sample_db<R: Rng + ?Sized>(&self, distance: f64, rng: &mut R) -> SimResult<f64> {
        match self {
            FadingModel::Nakagami(p) => {
                let m = p.shape_for(distance);
                let gamma = Gamma::new(m, 1.0 / m).map_err(|e| SimError::config(format!("nakagami: {e}")))?;
                Ok(mw_to_dbm(gamma.sample(rng)))
            }
            FadingModel::Shadowing { sigma_db } => {
                if *sigma_db == 0.0 {
                    return Ok(0.0);
                }
                let normal = Normal::new(0.0, *sigma_db).map_err(|e| SimError::config(format!("shadowing: {e}")))?;
                Ok(normal.sample(rng))
            }
        }
    }
}

/// Convert power from dBm (decibels relative to 1 milliwatt) to milliwatts.
///
/// # Formula
///
/// ```text
/// P(mW) = 10^(P(dBm) / 10)
/// ```
///
/// # Examples
///
/// ```text
/// 0 dBm   → 1 mW
/// 20 dBm  → 100 mW
/// -10 dBm → 0.1 mW
/// ```
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert power from milliwatts to dBm. Inverse of [`dbm_to_mw`].
///
/// For `mw <= 0` the result is `-inf` or NaN; callers pass positive powers.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}
