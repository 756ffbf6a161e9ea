use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Order numbers are the low six digits of the epoch millisecond clock.
pub const ORDER_NUMBER_MODULUS: u64 = 1_000_000;

const FOLIO_SUFFIX_LEN: usize = 8;
const FOLIO_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Answers whether an order number is already taken.
#[async_trait]
pub trait OrderNumberStore: Send + Sync {
    async fn order_number_exists(&self, order_number: i32) -> Result<bool, ServiceError>;
}

/// Produces order numbers, express folios and pickup PINs.
///
/// Candidates are strictly increasing inside one generator, so two callers
/// sharing it never receive the same number within a million draws. Numbers
/// from other processes are caught by the store check and, past that, by the
/// unique index on `orders.order_number`.
#[derive(Debug)]
pub struct IdentifierGenerator {
    last_tick: AtomicU64,
    max_attempts: u32,
    pin_length: usize,
    folio_prefix: String,
}

impl Default for IdentifierGenerator {
    fn default() -> Self {
        Self::new(16, 4, "EXP")
    }
}

impl From<&AppConfig> for IdentifierGenerator {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(cfg.order_number_max_attempts, cfg.pin_length, &cfg.folio_prefix)
    }
}

impl IdentifierGenerator {
    pub fn new(max_attempts: u32, pin_length: usize, folio_prefix: &str) -> Self {
        Self {
            last_tick: AtomicU64::new(0),
            max_attempts: max_attempts.max(1),
            pin_length,
            folio_prefix: folio_prefix.to_string(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Next rolling candidate, never repeating the previous tick.
    pub fn next_candidate(&self) -> i32 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = self
            .last_tick
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let tick = now.max(previous + 1);
        (tick % ORDER_NUMBER_MODULUS) as i32
    }

    /// Draws candidates until one is free in `store`, giving up with
    /// [`ServiceError::Conflict`] after `max_attempts` collisions.
    pub async fn generate_order_number(
        &self,
        store: &dyn OrderNumberStore,
    ) -> Result<i32, ServiceError> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.next_candidate();
            if !store.order_number_exists(candidate).await? {
                debug!(order_number = candidate, attempt, "Allocated order number");
                return Ok(candidate);
            }
            counter!("bakery_orders.order_number.collisions", 1);
            debug!(order_number = candidate, attempt, "Order number taken");
        }

        warn!(
            attempts = self.max_attempts,
            "Gave up allocating an order number"
        );
        Err(ServiceError::Conflict(format!(
            "No free order number after {} attempts",
            self.max_attempts
        )))
    }

    /// Random numeric PIN of the configured length.
    pub fn generate_pin(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.pin_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }

    /// `<prefix>-` followed by random uppercase letters and digits.
    pub fn generate_folio(&self) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..FOLIO_SUFFIX_LEN)
            .map(|_| char::from(FOLIO_ALPHABET[rng.gen_range(0..FOLIO_ALPHABET.len())]))
            .collect();
        format!("{}-{}", self.folio_prefix, suffix)
    }
}
