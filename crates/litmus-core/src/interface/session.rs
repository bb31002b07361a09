use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::Mutex;

/// A reusable, closable handle such as a browser driver session.
#[async_trait]
pub trait Session: Send + Sync {
    fn is_alive(&self) -> bool {
        true
    }

    async fn close(&mut self) -> anyhow::Result<()>;
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Factory<S> = Box<dyn Fn() -> BoxFuture<anyhow::Result<S>> + Send + Sync>;

/// Owns at most one live session. `acquire` reuses it while alive and opens a
/// fresh one otherwise; `release` closes it.
pub struct SessionManager<S: Session> {
    open: Factory<S>,
    current: Mutex<Option<S>>,
}

impl<S: Session + 'static> SessionManager<S> {
    pub fn new<F, Fut>(open: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<S>> + Send + 'static,
    {
        Self {
            open: Box::new(move || Box::pin(open())),
            current: Mutex::new(None),
        }
    }

    /// Returns a clone of the live session, opening one if none is held or
    /// the held one is dead.
    pub async fn acquire(&self) -> anyhow::Result<S>
    where
        S: Clone,
    {
        let mut guard = self.current.lock().await;
        if let Some(s) = guard.as_ref() {
            if s.is_alive() {
                return Ok(s.clone());
            }
            tracing::debug!(event = "session.stale", "dropping dead session");
        }
        let fresh = (self.open)().await?;
        tracing::debug!(event = "session.opened");
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    pub async fn is_held(&self) -> bool {
        self.current.lock().await.is_some()
    }

    pub async fn release(&self) -> anyhow::Result<()> {
        let taken = self.current.lock().await.take();
        if let Some(mut s) = taken {
            s.close().await?;
            tracing::debug!(event = "session.released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct FakeSession {
        id: u32,
        closed: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn close(&mut self) -> anyhow::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(opened: Arc<AtomicU32>, closed: Arc<AtomicU32>) -> SessionManager<FakeSession> {
        SessionManager::new(move || {
            let opened = opened.clone();
            let closed = closed.clone();
            async move {
                let id = opened.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(FakeSession { id, closed })
            }
        })
    }

    #[tokio::test]
    async fn acquire_reuses_until_released() {
        let opened = Arc::new(AtomicU32::new(0));
        let closed = Arc::new(AtomicU32::new(0));
        let m = manager(opened.clone(), closed.clone());

        let a = m.acquire().await.unwrap();
        let b = m.acquire().await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        m.release().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!m.is_held().await);

        let c = m.acquire().await.unwrap();
        assert_eq!(c.id, 2);
    }

    #[tokio::test]
    async fn release_without_session_is_noop() {
        let m = manager(Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));
        m.release().await.unwrap();
    }
}
