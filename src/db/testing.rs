//! In-memory engine for tests: scripted replies, a statement log, optional
//! slowness and an interrupt that behaves like a server-side cancel.

use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, RecycleResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::error::{Error, Result, StructuredError};
use super::query::RawResult;
use super::session::{Interrupt, Session};

pub enum MockReply {
    Rows(RawResult),
    Affected(u64),
}

type Script = dyn Fn(&str) -> Result<MockReply> + Send + Sync;

pub struct MockEngine {
    script: Box<Script>,
    log: Mutex<Vec<String>>,
    slow: Option<(String, Duration)>,
    interruptible: bool,
    interrupt: Notify,
    interrupts: AtomicUsize,
    created: AtomicUsize,
    fail_connect: AtomicBool,
}

impl MockEngine {
    pub fn new(script: impl Fn(&str) -> Result<MockReply> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            log: Mutex::new(Vec::new()),
            slow: None,
            interruptible: false,
            interrupt: Notify::new(),
            interrupts: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        }
    }

    /// Statements containing `pattern` take `delay` to answer.
    pub fn slow(mut self, pattern: &str, delay: Duration) -> Self {
        self.slow = Some((pattern.to_string(), delay));
        self
    }

    /// Sessions expose an interrupt that aborts the slow statement in flight.
    pub fn interruptible(mut self) -> Self {
        self.interruptible = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    async fn run(&self, sql: &str) -> Result<MockReply> {
        if let Ok(mut log) = self.log.lock() {
            log.push(sql.to_string());
        }
        if let Some((pattern, delay)) = &self.slow {
            if sql.contains(pattern.as_str()) {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    _ = self.interrupt.notified() => {
                        return Err(Error::Statement(
                            StructuredError::from_string("canceling statement due to user request")
                                .with_code("57014"),
                        ));
                    }
                }
            }
        }
        (self.script)(sql)
    }
}

pub struct MockSession {
    engine: Arc<MockEngine>,
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession").finish_non_exhaustive()
    }
}

impl MockSession {
    pub fn new(engine: Arc<MockEngine>) -> Self {
        Self { engine }
    }

    /// A standalone session whose every statement is answered with rows.
    pub fn scripted(script: impl Fn(&str) -> Result<RawResult> + Send + Sync + 'static) -> Self {
        Self::new(MockEngine::new(move |sql| script(sql).map(MockReply::Rows)).shared())
    }

    pub fn statements(&self) -> Vec<String> {
        self.engine.statements()
    }
}

#[async_trait]
impl Session for MockSession {
    async fn fetch(&self, sql: &str) -> Result<RawResult> {
        match self.engine.run(sql).await? {
            MockReply::Rows(raw) => Ok(raw),
            MockReply::Affected(_) => Ok(RawResult::default()),
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        match self.engine.run(sql).await? {
            MockReply::Rows(raw) => Ok(raw.rows.len() as u64),
            MockReply::Affected(n) => Ok(n),
        }
    }

    fn interrupt_handle(&self) -> Option<Box<dyn Interrupt>> {
        if !self.engine.interruptible {
            return None;
        }
        Some(Box::new(MockInterrupt {
            engine: self.engine.clone(),
        }))
    }
}

struct MockInterrupt {
    engine: Arc<MockEngine>,
}

#[async_trait]
impl Interrupt for MockInterrupt {
    async fn interrupt(&self) -> Result<()> {
        self.engine.interrupts.fetch_add(1, Ordering::SeqCst);
        self.engine.interrupt.notify_one();
        Ok(())
    }
}

pub struct MockManager {
    engine: Arc<MockEngine>,
}

impl std::fmt::Debug for MockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockManager").finish_non_exhaustive()
    }
}

impl MockManager {
    pub fn new(engine: Arc<MockEngine>) -> Self {
        Self { engine }
    }
}

impl Manager for MockManager {
    type Type = MockSession;
    type Error = Error;

    async fn create(&self) -> Result<MockSession> {
        if self.engine.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connection("password authentication failed".to_string()));
        }
        self.engine.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession::new(self.engine.clone()))
    }

    async fn recycle(
        &self,
        _session: &mut MockSession,
        _metrics: &Metrics,
    ) -> RecycleResult<Error> {
        Ok(())
    }
}
