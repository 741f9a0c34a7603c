/// Connection transport whose behaviour tests control
use async_trait::async_trait;
use recovery_core::ConnectionTransport;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct FakeTransport {
    /// Outcomes of upcoming handshakes; once empty, `reachable` decides
    scripted: Mutex<VecDeque<bool>>,
    unreachable: AtomicBool,
    connect_delay: Mutex<Duration>,
    ping_delay: Mutex<Duration>,
    connects: AtomicU32,
    pings: AtomicU32,
    closes: AtomicU32,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handshakes succeed or fail in this order
    pub fn scripted(outcomes: &[bool]) -> Arc<Self> {
        let transport = Self::default();
        *transport.scripted.lock().unwrap() = outcomes.iter().copied().collect();
        Arc::new(transport)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap() = delay;
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionTransport for FakeTransport {
    async fn connect(&self) -> anyhow::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let scripted = self.scripted.lock().unwrap().pop_front();
        let ok = scripted.unwrap_or(!self.unreachable.load(Ordering::SeqCst));
        if ok {
            Ok(())
        } else {
            anyhow::bail!("network unreachable")
        }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
