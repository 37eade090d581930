//! Price enrichment pipeline (C15, spec §4.14).
//!
//! Four idempotent stages run in a fixed order over the persisted transaction
//! set, each filling in whatever `price_at_tx_time` it can and leaving
//! everything else untouched:
//!
//! 1. [`derive_from_trade_ratio`] — a trade's fiat leg prices its non-fiat leg.
//! 2. [`normalize_to_usd`] — a non-USD fiat price is converted via a pluggable
//!    [`FxRateProvider`].
//! 3. [`fetch_residual_price`] — whatever's left is looked up through a
//!    pluggable [`PriceProvider`].
//! 4. [`rederive_from_links`] — a lot-transfer link carries a known price
//!    across to the linked transaction's matching asset leg.
//!
//! Grounded on the same "collaborator behind a trait, core logic stays
//! testable without a network" shape as [`crate::providers::manager`] —
//! constructing a real FX/price feed client is out of scope here for the same
//! reason a real `ProviderClient` is (spec Non-goals: external collaborators).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::errors::IngestResult;
use crate::model::{AssetMovement, CanonicalTransaction, PriceAtTxTime};
use crate::money::{Currency, Money};
use crate::persistence::connection::Database;
use crate::persistence::transactions::TransactionFilter;

#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn price_at(&self, asset: &str, at: chrono::DateTime<Utc>) -> IngestResult<Option<Money>>;
}

#[async_trait]
pub trait FxRateProvider: Send + Sync {
    /// USD value of one unit of `fiat` at `at`.
    async fn usd_per_unit(&self, fiat: &str, at: chrono::DateTime<Utc>) -> IngestResult<Option<Decimal>>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PricingSummary {
    pub derived: u64,
    pub normalized: u64,
    pub fetched: u64,
    pub rederived: u64,
    pub still_missing: u64,
}

pub struct PricingPipeline {
    db: Arc<Database>,
    price_provider: Option<Arc<dyn PriceProvider>>,
    fx_provider: Option<Arc<dyn FxRateProvider>>,
}

impl PricingPipeline {
    pub fn new(
        db: Arc<Database>,
        price_provider: Option<Arc<dyn PriceProvider>>,
        fx_provider: Option<Arc<dyn FxRateProvider>>,
    ) -> Self {
        Self {
            db,
            price_provider,
            fx_provider,
        }
    }

    pub async fn run(&self) -> IngestResult<PricingSummary> {
        let mut all = self.db.get_transactions(&TransactionFilter::default())?;
        let mut changed = vec![false; all.len()];
        let mut summary = PricingSummary::default();

        for (tx, dirty) in all.iter_mut().zip(changed.iter_mut()) {
            if derive_from_trade_ratio(tx) {
                summary.derived += 1;
                *dirty = true;
            }
        }

        if let Some(fx) = &self.fx_provider {
            for (tx, dirty) in all.iter_mut().zip(changed.iter_mut()) {
                if normalize_to_usd(tx, fx.as_ref()).await? {
                    summary.normalized += 1;
                    *dirty = true;
                }
            }
        }

        if let Some(price_provider) = &self.price_provider {
            for (tx, dirty) in all.iter_mut().zip(changed.iter_mut()) {
                if fetch_residual_price(tx, price_provider.as_ref()).await? {
                    summary.fetched += 1;
                    *dirty = true;
                }
            }
        }

        let ids: Vec<String> = all.iter().map(|t| t.id.clone()).collect();
        let links = self.db.find_links_by_transaction_ids(&ids)?;
        let snapshot = all.clone();
        for (tx, dirty) in all.iter_mut().zip(changed.iter_mut()) {
            if rederive_from_links(tx, &links, &snapshot) {
                summary.rederived += 1;
                *dirty = true;
            }
        }

        for (tx, dirty) in all.iter().zip(changed.iter()) {
            if *dirty {
                self.db.update_transaction_movements(&tx.id, &tx.movements)?;
            }
        }

        summary.still_missing = all
            .iter()
            .filter(|tx| tx.movements.all().any(|m| !m.is_fiat() && m.price_at_tx_time.is_none()))
            .count() as u64;

        Ok(summary)
    }
}

/// Stage 1 (spec §4.14): a two-legged trade where one leg is fiat prices the
/// other leg directly — no external lookup needed.
fn derive_from_trade_ratio(tx: &mut CanonicalTransaction) -> bool {
    if tx.movements.inflows.len() != 1 || tx.movements.outflows.len() != 1 {
        return false;
    }
    let inflow_is_fiat = tx.movements.inflows[0].is_fiat();
    let outflow_is_fiat = tx.movements.outflows[0].is_fiat();
    if inflow_is_fiat == outflow_is_fiat {
        return false;
    }

    let datetime = tx.datetime;
    let crate::model::Movements { inflows, outflows, .. } = &mut tx.movements;
    let (fiat_movement, priced_movement): (&AssetMovement, &mut AssetMovement) = if inflow_is_fiat {
        (&inflows[0], &mut outflows[0])
    } else {
        (&outflows[0], &mut inflows[0])
    };

    if priced_movement.price_at_tx_time.is_some() || priced_movement.amount.is_zero() {
        return false;
    }

    let per_unit = fiat_movement.amount / priced_movement.amount;
    priced_movement.price_at_tx_time = Some(PriceAtTxTime {
        price: Money::new(per_unit, Currency::new(&fiat_movement.asset)),
        source: "trade_ratio".to_string(),
        fetched_at: datetime,
    });
    true
}

/// Stage 2 (spec §4.14): a derived or fetched price denominated in a non-USD
/// fiat is converted to USD via the FX provider.
async fn normalize_to_usd(tx: &mut CanonicalTransaction, fx: &dyn FxRateProvider) -> IngestResult<bool> {
    let mut any_changed = false;
    for movement in tx.movements.inflows.iter_mut().chain(tx.movements.outflows.iter_mut()) {
        let Some(price) = &movement.price_at_tx_time else {
            continue;
        };
        if price.price.currency == Currency::new("USD") {
            continue;
        }
        let fiat_ticker = price.price.currency.ticker().to_string();
        if let Some(rate) = fx.usd_per_unit(&fiat_ticker, price.fetched_at).await? {
            let usd_amount = price.price.amount * rate;
            movement.price_at_tx_time = Some(PriceAtTxTime {
                price: Money::new(usd_amount, Currency::new("USD")),
                source: format!("{}+fx", price.source),
                fetched_at: price.fetched_at,
            });
            any_changed = true;
        }
    }
    Ok(any_changed)
}

/// Stage 3 (spec §4.14): whatever residue remains after derivation is looked
/// up directly.
async fn fetch_residual_price(tx: &mut CanonicalTransaction, provider: &dyn PriceProvider) -> IngestResult<bool> {
    let at = tx.datetime;
    let mut any_changed = false;
    for movement in tx.movements.inflows.iter_mut().chain(tx.movements.outflows.iter_mut()) {
        if movement.is_fiat() || movement.price_at_tx_time.is_some() {
            continue;
        }
        if let Some(price) = provider.price_at(&movement.asset, at).await? {
            movement.price_at_tx_time = Some(PriceAtTxTime {
                price,
                source: "price_provider".to_string(),
                fetched_at: at,
            });
            any_changed = true;
        }
    }
    Ok(any_changed)
}

/// Stage 4 (spec §4.14): a `lot_transfer` link means both sides move the same
/// asset between the user's own accounts, so a known-side price on one end
/// applies unchanged to the other.
fn rederive_from_links(
    tx: &mut CanonicalTransaction,
    links: &[crate::persistence::links::TransactionLink],
    snapshot: &[CanonicalTransaction],
) -> bool {
    let mut any_changed = false;
    for movement in tx.movements.inflows.iter_mut().chain(tx.movements.outflows.iter_mut()) {
        if movement.is_fiat() || movement.price_at_tx_time.is_some() {
            continue;
        }
        let Some(counterpart_id) = links.iter().find_map(|l| {
            if l.from_transaction_id == tx.id {
                Some(&l.to_transaction_id)
            } else if l.to_transaction_id == tx.id {
                Some(&l.from_transaction_id)
            } else {
                None
            }
        }) else {
            continue;
        };
        let Some(counterpart) = snapshot.iter().find(|t| &t.id == counterpart_id) else {
            continue;
        };
        let Some(known) = counterpart
            .movements
            .all()
            .find(|m| m.asset == movement.asset && m.price_at_tx_time.is_some())
        else {
            continue;
        };
        let known_price = known.price_at_tx_time.as_ref().unwrap();
        movement.price_at_tx_time = Some(PriceAtTxTime {
            price: known_price.price.clone(),
            source: "lot_transfer_propagation".to_string(),
            fetched_at: known_price.fetched_at,
        });
        any_changed = true;
    }
    any_changed
}
