use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::OnceCell;

use super::{LocalAgent, LoopbackAgent};
use crate::error::{BridgeError, BridgeResult};

/// Builds the process-wide local agent.
pub type LocalAgentFactory = Arc<dyn Fn() -> BridgeResult<Arc<dyn LocalAgent>> + Send + Sync>;

/// Resolve a local agent factory by its configured name.
pub fn local_agent_factory(name: &str) -> BridgeResult<LocalAgentFactory> {
    match name {
        "loopback" => {
            let factory: LocalAgentFactory =
                Arc::new(|| Ok(Arc::new(LoopbackAgent) as Arc<dyn LocalAgent>));
            Ok(factory)
        }
        other => Err(BridgeError::Config(format!(
            "unknown local agent '{other}' (available: loopback)"
        ))),
    }
}

/// Local backend: one lazily built agent shared by all sessions.
pub struct LocalProvider {
    factory: LocalAgentFactory,
    agent: OnceCell<Arc<dyn LocalAgent>>,
    warmup: Duration,
}

impl LocalProvider {
    /// `warmup` is waited before each session's handshake.
    pub fn new(factory: LocalAgentFactory, warmup: Duration) -> Self {
        Self {
            factory,
            agent: OnceCell::new(),
            warmup,
        }
    }

    /// Provider around an already built agent.
    pub fn with_agent(agent: Arc<dyn LocalAgent>, warmup: Duration) -> Self {
        let factory: LocalAgentFactory = Arc::new(move || Ok(agent.clone()));
        Self::new(factory, warmup)
    }

    pub fn warmup(&self) -> Duration {
        self.warmup
    }

    /// The shared agent, built on first use.
    ///
    /// Concurrent first callers wait for a single initialization; a failed
    /// initialization is retried by the next caller.
    pub async fn agent(&self) -> BridgeResult<Arc<dyn LocalAgent>> {
        let agent = self
            .agent
            .get_or_try_init(|| async {
                info!("Initializing local agent");
                (self.factory)()
            })
            .await?;
        Ok(agent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_agent_is_built_once() {
        let builds = Arc::new(AtomicU32::new(0));
        let counter = builds.clone();
        let factory: LocalAgentFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LoopbackAgent) as Arc<dyn LocalAgent>)
        });
        let provider = LocalProvider::new(factory, Duration::ZERO);

        let first = provider.agent().await.unwrap();
        let second = provider.agent().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_surfaces_error() {
        let factory: LocalAgentFactory =
            Arc::new(|| Err(BridgeError::Agent("model weights missing".into())));
        let provider = LocalProvider::new(factory, Duration::ZERO);

        let err = provider.agent().await.err().unwrap();
        assert!(matches!(err, BridgeError::Agent(_)));
    }

    #[test]
    fn test_unknown_factory_name() {
        assert!(local_agent_factory("loopback").is_ok());
        assert!(matches!(
            local_agent_factory("..agent_engine_app.agent_engine"),
            Err(BridgeError::Config(_))
        ));
    }
}
