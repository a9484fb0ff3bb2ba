// ===============================
// src/supervisor.rs
// ===============================
//
// Broker lifecycle loop:
//   connect cycle -> declare + consume -> (link drop) -> fresh connect cycle
// Exhausting a connect cycle never exits the process: we stay up, not ready,
// and optionally try a fresh cycle after a cooldown.
//
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::broker::{Broker, Topology};
use crate::connection::ConnectionManager;
use crate::consumer::{ConsumeEnd, OrderEventConsumer};

pub struct SupervisorCfg {
    pub topology: Topology,
    pub max_attempts: u32,
    /// pause between a link drop and the next connect cycle
    pub reconnect_delay: Duration,
    pub exhausted_cooldown: Option<Duration>,
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

// true when shutdown was requested while waiting
async fn pause(d: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(d) => *shutdown.borrow(),
        _ = stop_requested(shutdown) => true,
    }
}

pub async fn run<B: Broker>(
    broker: Arc<B>,
    manager: Arc<ConnectionManager>,
    consumer: Arc<OrderEventConsumer>,
    cfg: SupervisorCfg,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let conn = tokio::select! {
            res = broker.connect(&manager, cfg.max_attempts) => res,
            _ = stop_requested(&mut shutdown) => break,
        };
        let conn = match conn {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "broker unavailable, service stays up but not ready");
                match cfg.exhausted_cooldown {
                    Some(d) => {
                        if pause(d, &mut shutdown).await {
                            break;
                        }
                        continue;
                    }
                    None => {
                        // tunggu restart dari luar (orchestrator)
                        stop_requested(&mut shutdown).await;
                        break;
                    }
                }
            }
        };

        let end = match broker.open(&conn, &cfg.topology).await {
            Ok(stream) => Arc::clone(&consumer).run(stream, shutdown.clone()).await,
            Err(e) => ConsumeEnd::Transport(e),
        };

        match &end {
            ConsumeEnd::Shutdown => info!("consumer stopped for shutdown"),
            ConsumeEnd::StreamClosed => warn!("consume stream closed by broker"),
            ConsumeEnd::Transport(e) => warn!(error = %e, "broker transport error"),
        }

        broker.close(conn).await;
        let reason = match end {
            ConsumeEnd::Shutdown => "closed for shutdown".to_string(),
            ConsumeEnd::StreamClosed => "consume stream closed".to_string(),
            ConsumeEnd::Transport(e) => e.to_string(),
        };
        manager.mark_disconnected(reason);

        if *shutdown.borrow() || pause(cfg.reconnect_delay, &mut shutdown).await {
            break;
        }
        info!("starting fresh broker connect cycle");
    }
    info!("broker supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures_util::future::{BoxFuture, FutureExt};
    use futures_util::stream::{self, BoxStream, StreamExt};
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Instant};

    use crate::broker::{Disposition, Inbound, TransportError};
    use crate::config::{BackoffPolicy, BreakerConfig, RetryPolicy};
    use crate::connection::{ConnectError, LinkPhase};
    use crate::domain::AmountPolicy;
    use crate::ledger::PaymentLedger;
    use crate::notifier::ResilientNotifier;

    struct NoMsg;

    impl Inbound for NoMsg {
        fn body(&self) -> &[u8] {
            &[]
        }

        fn settle(self, _: Disposition) -> BoxFuture<'static, Result<(), TransportError>> {
            async { Ok(()) }.boxed()
        }
    }

    /// Scripted broker: the first `fail_first` dials are refused. A session
    /// either stays idle until shutdown or ends its stream right away.
    struct ScriptedBroker {
        fail_first: u32,
        hold_open: bool,
        dials: AtomicU32,
        opens: AtomicU32,
        closes: AtomicU32,
    }

    impl ScriptedBroker {
        fn new(fail_first: u32, hold_open: bool) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                hold_open,
                dials: AtomicU32::new(0),
                opens: AtomicU32::new(0),
                closes: AtomicU32::new(0),
            })
        }
    }

    impl Broker for ScriptedBroker {
        type Conn = u32;
        type Msg = NoMsg;
        type Stream = BoxStream<'static, Result<NoMsg, TransportError>>;

        fn connect<'a>(
            &'a self,
            manager: &'a ConnectionManager,
            max_attempts: u32,
        ) -> BoxFuture<'a, Result<u32, ConnectError>> {
            manager
                .connect_with(max_attempts, move || {
                    let n = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
                    let refused = n <= self.fail_first;
                    async move { if refused { Err("connection refused") } else { Ok(n) } }
                })
                .boxed()
        }

        fn open<'a>(&'a self, _: &'a u32, _: &'a Topology) -> BoxFuture<'a, Result<Self::Stream, TransportError>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let s: Self::Stream = if self.hold_open { stream::pending().boxed() } else { stream::empty().boxed() };
            async move { Ok(s) }.boxed()
        }

        fn close(&self, _: u32) -> BoxFuture<'static, ()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        }
    }

    fn cfg(max_attempts: u32, cooldown: Option<Duration>) -> SupervisorCfg {
        SupervisorCfg {
            topology: Topology::new("order_events", "payment_queue"),
            max_attempts,
            reconnect_delay: Duration::from_secs(5),
            exhausted_cooldown: cooldown,
        }
    }

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            "amqp://x",
            BackoffPolicy { base: Duration::from_secs(1), cap: Duration::from_secs(30) },
        ))
    }

    fn consumer() -> Arc<OrderEventConsumer> {
        Arc::new(OrderEventConsumer::new(
            Arc::new(PaymentLedger::new()),
            Arc::new(ResilientNotifier::new(Duration::from_millis(100), BreakerConfig::default())),
            AmountPolicy { unit_fallback_price: 50_000.0, default_method: "credit_card".into() },
            "http://127.0.0.1:1",
            RetryPolicy { max_attempts: 1, base_delay: Duration::from_millis(1) },
        ))
    }

    fn spawn(
        broker: &Arc<ScriptedBroker>,
        mgr: &Arc<ConnectionManager>,
        cfg: SupervisorCfg,
    ) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::clone(broker), Arc::clone(mgr), consumer(), cfg, rx));
        (tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_cycle_cools_down_then_starts_fresh() {
        let broker = ScriptedBroker::new(2, true);
        let mgr = manager();
        let mut link = mgr.subscribe();
        let started = Instant::now();
        let (tx, handle) = spawn(&broker, &mgr, cfg(2, Some(Duration::from_secs(60))));

        link.wait_for(|s| s.connected).await.unwrap();

        // 1s backoff inside the failed cycle, then the 60s cooldown
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(61) && elapsed < Duration::from_secs(62), "{elapsed:?}");
        assert_eq!(mgr.snapshot().attempts, 0);
        assert_eq!(broker.dials.load(Ordering::SeqCst), 3);
        assert_eq!(broker.opens.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(broker.closes.load(Ordering::SeqCst), 1);
        assert!(!mgr.snapshot().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn without_cooldown_stays_degraded_until_shutdown() {
        let broker = ScriptedBroker::new(u32::MAX, true);
        let mgr = manager();
        let mut link = mgr.subscribe();
        let (tx, handle) = spawn(&broker, &mgr, cfg(3, None));

        link.wait_for(|s| s.attempts == 3 && s.phase == LinkPhase::Disconnected).await.unwrap();
        sleep(Duration::from_secs(3600)).await;

        assert_eq!(broker.dials.load(Ordering::SeqCst), 3);
        assert!(!mgr.snapshot().connected);
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(broker.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_connect_cycle() {
        let broker = ScriptedBroker::new(u32::MAX, true);
        let mgr = manager();
        let mut link = mgr.subscribe();
        let (tx, handle) = spawn(&broker, &mgr, cfg(10, Some(Duration::from_secs(60))));

        link.wait_for(|s| s.attempts >= 2).await.unwrap();
        tx.send(true).unwrap();

        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(broker.dials.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_the_cooldown() {
        let broker = ScriptedBroker::new(u32::MAX, true);
        let mgr = manager();
        let mut link = mgr.subscribe();
        let (tx, handle) = spawn(&broker, &mgr, cfg(1, Some(Duration::from_secs(600))));

        link.wait_for(|s| s.attempts == 1 && s.phase == LinkPhase::Disconnected).await.unwrap();
        tx.send(true).unwrap();

        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(broker.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_drop_marks_not_ready_and_reconnects() {
        let broker = ScriptedBroker::new(0, false);
        let mgr = manager();
        let mut link = mgr.subscribe();
        let started = Instant::now();
        let (tx, handle) = spawn(&broker, &mgr, cfg(3, None));

        link.wait_for(|s| !s.connected && s.last_error.as_deref() == Some("consume stream closed"))
            .await
            .unwrap();
        assert_eq!(broker.closes.load(Ordering::SeqCst), 1);

        while broker.opens.load(Ordering::SeqCst) < 2 {
            sleep(Duration::from_millis(100)).await;
        }
        assert!(started.elapsed() >= Duration::from_secs(5));

        tx.send(true).unwrap();
        timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
        assert!(!mgr.snapshot().connected);
    }
}
