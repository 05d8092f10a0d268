//! Idle session eviction.
//!
//! A single task sweeps the registry on a fixed interval and terminates
//! every session whose inactivity exceeds the configured timeout. Having
//! subscribers does not keep a session alive; only actual input or output
//! counts as activity.

use std::time::Duration;

use crate::session::SessionRegistry;

pub struct Reaper {
    registry: SessionRegistry,
    idle_timeout: Duration,
    sweep_interval: Duration,
}

impl Reaper {
    pub fn new(registry: SessionRegistry, idle_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            registry,
            idle_timeout,
            sweep_interval,
        }
    }

    /// Run the sweep loop forever. Spawn this on the runtime; aborting the
    /// task stops the reaper.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.sweep();
        }
    }

    /// One pass: evict every session idle beyond the timeout. Expired ids are
    /// collected first so termination never runs under the registry lock.
    pub fn sweep(&self) -> usize {
        let expired: Vec<(String, Duration)> = self
            .registry
            .sessions_snapshot()
            .into_iter()
            .filter_map(|session| {
                let idle = session.activity.idle_for();
                (idle >= self.idle_timeout).then(|| (session.id.clone(), idle))
            })
            .collect();

        let mut evicted = 0;
        for (id, idle) in expired {
            // The session may have exited on its own since the snapshot.
            if self.registry.terminate(&id).is_ok() {
                tracing::info!(session = %id, idle_secs = idle.as_secs(), "evicting idle session");
                evicted += 1;
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::SpawnParams;
    use std::collections::HashMap;

    fn sh_params() -> SpawnParams {
        SpawnParams {
            shell: "/bin/sh".to_string(),
            cwd: None,
            env: HashMap::new(),
            cols: 80,
            rows: 24,
            scrollback_limit: 1000,
        }
    }

    #[tokio::test]
    async fn sweep_evicts_idle_sessions() {
        let registry = SessionRegistry::new();
        let session = registry.create(sh_params()).await.unwrap();

        // Let the shell finish its startup output, then wait past the timeout.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let reaper = Reaper::new(
            registry.clone(),
            Duration::from_millis(100),
            Duration::from_secs(60),
        );
        let evicted = reaper.sweep();
        assert_eq!(evicted, 1);
        assert!(registry.get(&session.id).is_none());
    }

    #[tokio::test]
    async fn sweep_spares_active_sessions() {
        let registry = SessionRegistry::new();
        let session = registry.create(sh_params()).await.unwrap();
        session.activity.touch();

        let reaper = Reaper::new(
            registry.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        let evicted = reaper.sweep();
        assert_eq!(evicted, 0);
        assert!(registry.get(&session.id).is_some());

        registry.terminate(&session.id).unwrap();
    }

    #[tokio::test]
    async fn sweep_evicts_watched_sessions_too() {
        let registry = SessionRegistry::new();
        let session = registry.create(sh_params()).await.unwrap();

        let conn = uuid::Uuid::new_v4();
        let (_snap, _rx, _guard) = session
            .join(conn, crate::screen::state::Format::Plain)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        let reaper = Reaper::new(
            registry.clone(),
            Duration::from_millis(100),
            Duration::from_secs(60),
        );
        assert_eq!(reaper.sweep(), 1);
        assert!(registry.get(&session.id).is_none());
    }

    #[tokio::test]
    async fn sweep_on_empty_registry_is_noop() {
        let registry = SessionRegistry::new();
        let reaper = Reaper::new(
            registry,
            Duration::from_millis(1),
            Duration::from_secs(60),
        );
        assert_eq!(reaper.sweep(), 0);
    }
}
