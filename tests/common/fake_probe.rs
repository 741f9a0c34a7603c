/// Component health probe whose answers tests control
use async_trait::async_trait;
use recovery_core::HealthProbe;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ProbeAnswer {
    /// Answer after this long
    After(Duration),

    /// Fail with this message
    Fail(String),
}

#[derive(Default)]
pub struct FakeProbe {
    answers: Mutex<HashMap<String, ProbeAnswer>>,
    calls: AtomicU32,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, path: &str, answer: ProbeAnswer) {
        self.answers
            .lock()
            .unwrap()
            .insert(path.to_string(), answer);
    }

    pub fn fail(&self, path: &str, message: &str) {
        self.answer(path, ProbeAnswer::Fail(message.to_string()));
    }

    pub fn heal(&self, path: &str) {
        self.answer(path, ProbeAnswer::After(Duration::ZERO));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn check(&self, path: &str, _timeout: Duration) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answers
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or(ProbeAnswer::After(Duration::ZERO));

        match answer {
            ProbeAnswer::After(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ProbeAnswer::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }
}
