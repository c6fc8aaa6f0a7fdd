//! Simulated banks publishing noisy quotes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use ratewatch_common::{CurrencyCode, InstitutionProfile, InstitutionSlug, RawQuote};
use ratewatch_fx::{FxError, FxResult, QuoteMap, SourceAdapter};

/// Reference mid rates in ETB.
fn reference_rates() -> BTreeMap<CurrencyCode, Decimal> {
    [
        ("USD", Decimal::new(13050, 2)),
        ("EUR", Decimal::new(14520, 2)),
        ("GBP", Decimal::new(17135, 2)),
        ("SAR", Decimal::new(3475, 2)),
        ("AED", Decimal::new(3553, 2)),
    ]
    .into_iter()
    .map(|(code, rate)| (CurrencyCode::new(code), rate))
    .collect()
}

/// Noise settings for the market.
#[derive(Debug, Clone, Copy)]
pub struct MarketNoise {
    /// Probability that a refresh carries one wild field.
    pub outlier_rate: f64,
    /// Probability that a refresh fails outright.
    pub failure_rate: f64,
}

/// One simulated bank.
#[derive(Debug, Clone)]
pub struct SimulatedBank {
    /// Relative offset from the market mid, e.g. 0.01 for +1%.
    offset: f64,
    /// Half of the buy/sell spread.
    half_spread: f64,
    /// Whether the bank publishes transactional rates too.
    transactional: bool,
    /// Whether the bank's site is down.
    offline: bool,
    /// Multiplier applied to cash buying while set.
    forced_outlier: Option<f64>,
}

struct MarketState {
    rng: StdRng,
    mids: BTreeMap<CurrencyCode, Decimal>,
    banks: HashMap<InstitutionSlug, SimulatedBank>,
    noise: MarketNoise,
}

/// A market of simulated banks, used as the source adapter for all of them.
pub struct SimulatedMarket {
    state: Mutex<MarketState>,
}

impl SimulatedMarket {
    /// Create a market over the given institutions.
    pub fn new(profiles: &[InstitutionProfile], noise: MarketNoise, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let banks = profiles
            .iter()
            .map(|profile| {
                let bank = SimulatedBank {
                    offset: rng.gen_range(-0.015..0.015),
                    half_spread: rng.gen_range(0.005..0.02),
                    transactional: rng.gen_bool(0.6),
                    offline: false,
                    forced_outlier: None,
                };
                (profile.slug.clone(), bank)
            })
            .collect();

        Self {
            state: Mutex::new(MarketState {
                rng,
                mids: reference_rates(),
                banks,
                noise,
            }),
        }
    }

    /// Move every mid rate by a small random step.
    pub async fn step(&self) {
        let mut state = self.state.lock().await;
        let MarketState { rng, mids, .. } = &mut *state;

        for mid in mids.values_mut() {
            let drift = rng.gen_range(-0.005..0.005);
            *mid = scale(*mid, 1.0 + drift);
        }
    }

    /// Current mid rate of a currency.
    pub async fn mid(&self, currency: &CurrencyCode) -> Option<Decimal> {
        self.state.lock().await.mids.get(currency).copied()
    }

    /// Take a bank offline or bring it back.
    pub async fn set_offline(&self, slug: &InstitutionSlug, offline: bool) -> bool {
        self.with_bank(slug, |bank| bank.offline = offline).await
    }

    /// Make a bank publish a wild cash buying rate until cleared.
    pub async fn force_outlier(&self, slug: &InstitutionSlug, factor: Option<f64>) -> bool {
        self.with_bank(slug, |bank| bank.forced_outlier = factor).await
    }

    /// Replace the noise settings.
    pub async fn set_noise(&self, noise: MarketNoise) {
        self.state.lock().await.noise = noise;
    }

    async fn with_bank(&self, slug: &InstitutionSlug, f: impl FnOnce(&mut SimulatedBank)) -> bool {
        match self.state.lock().await.banks.get_mut(slug) {
            Some(bank) => {
                f(bank);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SourceAdapter for SimulatedMarket {
    fn name(&self) -> &str {
        "simulated-market"
    }

    async fn refresh(&self, institution: &InstitutionSlug) -> FxResult<Option<QuoteMap>> {
        let mut state = self.state.lock().await;
        let MarketState {
            rng,
            mids,
            banks,
            noise,
        } = &mut *state;

        let Some(bank) = banks.get(institution) else {
            return Ok(None);
        };

        if bank.offline {
            debug!(institution = %institution, "Simulated bank offline");
            return Ok(None);
        }

        if rng.gen_bool(noise.failure_rate) {
            return Err(FxError::AdapterFailed {
                adapter: "simulated-market".to_string(),
                institution: institution.clone(),
                reason: "simulated outage".to_string(),
            });
        }

        let random_outlier = rng.gen_bool(noise.outlier_rate);
        let mut quotes = QuoteMap::new();

        for (currency, mid) in mids.iter() {
            let own = scale(*mid, 1.0 + bank.offset);
            let buying = scale(own, 1.0 - bank.half_spread);
            let selling = scale(own, 1.0 + bank.half_spread);

            let mut quote = RawQuote::cash(buying, selling);
            if bank.transactional {
                quote.transactional_buying = Some(scale(buying, 1.002));
                quote.transactional_selling = Some(scale(selling, 0.998));
            }

            if let Some(factor) = bank.forced_outlier {
                quote.cash_buying = Some(scale(buying, factor));
            } else if random_outlier && currency.as_str() == "USD" {
                let factor = if rng.gen_bool(0.5) { 1.6 } else { 0.5 };
                quote.cash_buying = Some(scale(buying, factor));
            }

            quotes.insert(currency.clone(), quote);
        }

        Ok(Some(quotes))
    }
}

/// Multiply by an `f64` factor, rounded to four decimal places.
fn scale(value: Decimal, factor: f64) -> Decimal {
    let factor = Decimal::from_f64_retain(factor).unwrap_or(Decimal::ONE);
    (value * factor).round_dp(4)
}
