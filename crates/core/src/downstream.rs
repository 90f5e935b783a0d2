//! Non-owning references between components.

use crate::Component;
use std::fmt;
use std::sync::{Arc, Weak};
use sysdesign_types::{ComponentError, ComponentId, Request, Response};
use tracing::debug;

/// Handle to a collaborator a component forwards requests to.
///
/// Holds only a weak reference: whoever registered the target owns its
/// lifetime. A call through a handle whose target has been dropped fails
/// with [`ComponentError::DownstreamGone`]. A call in progress keeps its
/// target alive until it returns.
#[derive(Clone)]
pub struct Downstream {
    id: ComponentId,
    target: Weak<dyn Component>,
}

impl Downstream {
    /// Handle to a type-erased component.
    pub fn new(target: &Arc<dyn Component>) -> Self {
        Self {
            id: target.id().clone(),
            target: Arc::downgrade(target),
        }
    }

    /// Handle to a concrete component.
    pub fn of<C: Component + 'static>(target: &Arc<C>) -> Self {
        let weak: Weak<C> = Arc::downgrade(target);
        Self {
            id: target.id().clone(),
            target: weak,
        }
    }

    /// Id of the target, valid even after the target is gone.
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Strong reference to the target, if it still exists.
    pub fn upgrade(&self) -> Result<Arc<dyn Component>, ComponentError> {
        self.target
            .upgrade()
            .ok_or_else(|| ComponentError::DownstreamGone(self.id.clone()))
    }

    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Alive and reporting healthy.
    pub fn is_healthy(&self) -> bool {
        self.target
            .upgrade()
            .map(|target| target.is_healthy())
            .unwrap_or(false)
    }

    /// Process `request` on the target.
    ///
    /// A gone target yields a failed response with an empty hop trace; the
    /// caller prepends itself as it would for any downstream response.
    pub async fn forward(&self, request: &Request) -> Response {
        match self.upgrade() {
            Ok(target) => target.process(request).await,
            Err(error) => {
                debug!(downstream = %self.id, request = %request.id, "Downstream component gone");
                Response::rejected(request.id, error)
            }
        }
    }
}

impl fmt::Debug for Downstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downstream")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ComponentKind;
    use async_trait::async_trait;
    use std::time::Duration;
    use sysdesign_types::ComponentMetrics;

    struct Echo {
        id: ComponentId,
    }

    #[async_trait]
    impl Component for Echo {
        fn id(&self) -> &ComponentId {
            &self.id
        }
        fn kind(&self) -> ComponentKind {
            ComponentKind::Custom("echo".into())
        }
        async fn process(&self, request: &Request) -> Response {
            Response::success(request.id, self.id.clone(), Duration::ZERO, request.data_size)
        }
        fn metrics(&self) -> ComponentMetrics {
            ComponentMetrics::default()
        }
        fn cost(&self) -> f64 {
            0.0
        }
        fn is_healthy(&self) -> bool {
            true
        }
        fn set_healthy(&self, _healthy: bool) {}
    }

    #[tokio::test]
    async fn test_forward_to_live_target() {
        let echo = Arc::new(Echo { id: "echo".into() });
        let handle = Downstream::of(&echo);
        assert!(handle.is_alive());
        assert!(handle.is_healthy());

        let resp = handle.forward(&Request::read(1, "/a")).await;
        assert!(resp.is_success());
        assert_eq!(resp.hops, vec!["echo"]);
    }

    #[tokio::test]
    async fn test_forward_to_dropped_target() {
        let echo: Arc<dyn Component> = Arc::new(Echo { id: "echo".into() });
        let handle = Downstream::new(&echo);
        drop(echo);

        assert!(!handle.is_alive());
        assert!(!handle.is_healthy());
        let resp = handle.forward(&Request::read(1, "/a")).await;
        assert!(!resp.is_success());
        assert!(resp.hops.is_empty());
        assert_eq!(
            resp.error,
            Some(ComponentError::DownstreamGone(ComponentId::new("echo")))
        );
    }
}
