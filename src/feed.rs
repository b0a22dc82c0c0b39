// =============================================================================
// Market Feed — simulated per-instrument tick generation and fan-out
// =============================================================================
//
// One Tokio task per instrument with at least one subscription. Each tick,
// the task perturbs that instrument's current price and fans it out to every
// subscriber's bounded queue with a non-blocking, drop-oldest enqueue: a
// slow or stuck subscriber must never stall the feed or any other
// subscriber.
//
// Deliberately not a single shared queue across subscribers — that would
// couple one subscriber's progress to another's. Each (instrument,
// subscriber) pair gets its own `TickQueue`.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::clock::Clock;
use crate::errors::FeedError;
use crate::types::{Instrument, Tick};

/// A bounded single-producer/single-consumer FIFO with drop-oldest
/// overflow. The feed is the sole producer; one strategy runner is the sole
/// consumer.
struct TickQueue {
    buffer: Mutex<VecDeque<Tick>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl TickQueue {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Never blocks. Drops the oldest buffered tick if full, then enqueues.
    fn push(&self, tick: Tick) {
        let mut buf = self.buffer.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(tick);
        drop(buf);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Tick> {
        self.buffer.lock().pop_front()
    }

    async fn pop(&self) -> Tick {
        loop {
            if let Some(tick) = self.try_pop() {
                return tick;
            }
            self.notify.notified().await;
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer handle returned by `MarketFeed::subscribe`.
pub struct Subscription {
    pub instrument: Instrument,
    queue: Arc<TickQueue>,
}

impl Subscription {
    /// Wait for the next tick. Cancellation-safe: this is the only
    /// suspension point a runner needs in its `tokio::select!` against a
    /// shutdown signal.
    pub async fn recv(&self) -> Tick {
        self.queue.pop().await
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.queue.dropped_count()
    }
}

#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub prices: HashMap<Instrument, Decimal>,
    pub active: bool,
    pub dropped_ticks_total: u64,
}

struct InstrumentState {
    current_price: Decimal,
    subscribers: Vec<Arc<TickQueue>>,
}

/// Generates ticks per instrument at a fixed cadence and fans them out to
/// per-subscriber bounded buffers.
pub struct MarketFeed {
    volatility: Decimal,
    tick_interval: Duration,
    clock: Arc<dyn Clock>,
    instruments: RwLock<HashMap<Instrument, InstrumentState>>,
    active: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    degraded: AtomicBool,
}

impl MarketFeed {
    pub fn new(
        volatility: Decimal,
        tick_interval: Duration,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            volatility,
            tick_interval,
            clock,
            instruments: RwLock::new(HashMap::new()),
            active: AtomicBool::new(false),
            cancel,
            tasks: Mutex::new(Vec::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Set once a feed task fails its one allotted restart and escalates to
    /// an orchestrator-wide shutdown. Sticky for the lifetime of the feed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Register a subscription for `instrument`, seeding its current price
    /// on first use. Must be called before `start()`.
    pub fn subscribe(&self, instrument: &Instrument, seed_price: Decimal, capacity: usize) -> Subscription {
        let queue = Arc::new(TickQueue::new(capacity));
        let mut instruments = self.instruments.write();
        let state = instruments
            .entry(instrument.clone())
            .or_insert_with(|| InstrumentState {
                current_price: seed_price,
                subscribers: Vec::new(),
            });
        state.subscribers.push(queue.clone());

        Subscription {
            instrument: instrument.clone(),
            queue,
        }
    }

    /// Begin emitting ticks for every instrument with at least one
    /// subscriber. Spawns one Tokio task per instrument.
    pub fn start(self: &Arc<Self>) {
        self.active.store(true, Ordering::SeqCst);
        let instruments: Vec<Instrument> = self.instruments.read().keys().cloned().collect();
        let mut tasks = self.tasks.lock();
        for instrument in instruments {
            let feed = self.clone();
            tasks.push(tokio::spawn(async move {
                feed.supervise_instrument(instrument).await;
            }));
        }
    }

    /// Stops emission. Does not close already-queued ticks. Idempotent.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let instruments = self.instruments.read();
        let mut dropped_total = 0u64;
        let prices = instruments
            .iter()
            .map(|(k, v)| {
                dropped_total += v.subscribers.iter().map(|q| q.dropped_count()).sum::<u64>();
                (k.clone(), v.current_price)
            })
            .collect();
        FeedSnapshot {
            prices,
            active: self.is_active(),
            dropped_ticks_total: dropped_total,
        }
    }

    /// Runs `run_instrument` to completion; if it exits with an error
    /// (rather than the engine shutting down), attempts exactly one
    /// restart. A second failure escalates to an orchestrator-wide
    /// shutdown via the shared cancellation token, leaving a degraded
    /// summary for the health reporter and shutdown log to surface.
    async fn supervise_instrument(self: Arc<Self>, instrument: Instrument) {
        for attempt in 0..2 {
            match self.run_instrument(&instrument).await {
                Ok(()) => return, // cancelled or stopped cleanly
                Err(e) => {
                    error!(instrument = %instrument, attempt, error = %e, "feed task failed");
                    if attempt == 1 {
                        warn!(instrument = %instrument, "feed restart failed, triggering shutdown");
                        self.degraded.store(true, Ordering::SeqCst);
                        self.cancel.cancel();
                        return;
                    }
                }
            }
        }
    }

    async fn run_instrument(&self, instrument: &Instrument) -> Result<(), FeedError> {
        let mut interval = tokio::time::interval(self.tick_interval);
        let mut rng = rand::thread_rng();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    if !self.is_active() {
                        return Ok(());
                    }
                    self.emit_tick(instrument, &mut rng)?;
                }
            }
        }
    }

    fn emit_tick(&self, instrument: &Instrument, rng: &mut impl Rng) -> Result<(), FeedError> {
        let vol: f64 = self.volatility.to_string().parse().map_err(|_| FeedError {
            instrument: instrument.to_string(),
            reason: "volatility is not representable as f64".to_string(),
        })?;
        let eps = if vol > 0.0 { rng.gen_range(-vol..=vol) } else { 0.0 };

        let mut instruments = self.instruments.write();
        let state = instruments.get_mut(instrument).ok_or_else(|| FeedError {
            instrument: instrument.to_string(),
            reason: "instrument state disappeared".to_string(),
        })?;

        let factor = decimal_from_f64(1.0 + eps);
        state.current_price *= factor;
        let tick = Tick::new(instrument.clone(), state.current_price, self.clock.now());
        for subscriber in &state.subscribers {
            subscriber.push(tick.clone());
        }
        Ok(())
    }
}

fn decimal_from_f64(v: f64) -> Decimal {
    Decimal::from_str(&format!("{v:.10}")).unwrap_or(Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn test_feed(volatility: Decimal, interval: Duration) -> (Arc<MarketFeed>, CancellationToken) {
        let cancel = CancellationToken::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(chrono_tz::UTC));
        (
            Arc::new(MarketFeed::new(volatility, interval, clock, cancel.clone())),
            cancel,
        )
    }

    #[test]
    fn tick_queue_drop_oldest_keeps_last_k() {
        let queue = TickQueue::new(4);
        let instrument = Instrument::from("X");
        for price in 1..=10i64 {
            queue.push(Tick::new(instrument.clone(), Decimal::from(price), chrono::Utc::now()));
        }
        assert_eq!(queue.dropped_count(), 6);
        let mut received = Vec::new();
        while let Some(t) = queue.try_pop() {
            received.push(t.price);
        }
        assert_eq!(
            received,
            vec![Decimal::from(7), Decimal::from(8), Decimal::from(9), Decimal::from(10)]
        );
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others_and_sees_drop_oldest() {
        let (feed, _cancel) = test_feed(Decimal::ZERO, Duration::from_millis(1));
        let instrument = Instrument::from("X");
        let slow = feed.subscribe(&instrument, Decimal::from(1), 4);
        let fast = feed.subscribe(&instrument, Decimal::from(1), 4);

        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            feed.emit_tick(&instrument, &mut rng).unwrap();
        }

        // The fast subscriber drains continuously and never falls behind;
        // the slow one (never drained here) accumulates drops but the feed
        // never blocked doing so.
        assert!(slow.dropped_ticks() >= 6);
        assert!(fast.recv().await.price > Decimal::ZERO);
    }

    #[test]
    fn snapshot_reflects_seeded_price_before_start() {
        let (feed, _cancel) = test_feed(Decimal::ZERO, Duration::from_secs(1));
        let instrument = Instrument::from("X");
        let _sub = feed.subscribe(&instrument, Decimal::from(100), 8);
        let snap = feed.snapshot();
        assert_eq!(snap.prices.get(&instrument), Some(&Decimal::from(100)));
        assert!(!snap.active);
    }
}
