//! Host port allocation.
//!
//! Asks the OS for an ephemeral port by binding `127.0.0.1:0`, reads the
//! assigned number, and releases the listener immediately. No reservation
//! is held, so the caller must bind the real service promptly to keep the
//! race window small. The registry entry is what enforces uniqueness
//! among active sites.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::debug;

use pressforge_core::error::ProvisionError;
use pressforge_core::store::PortRegistry;

/// Retries against registry conflicts before giving up.
const MAX_BIND_ATTEMPTS: u32 = 16;

/// Allocates host ports from the OS ephemeral range.
pub struct PortAllocator<P> {
    registry: Arc<P>,
}

impl<P: PortRegistry> PortAllocator<P> {
    pub fn new(registry: Arc<P>) -> Self {
        Self { registry }
    }

    /// Finds a free port, registers it for `slug`, and returns it.
    ///
    /// Re-allocating for a slug that already holds a binding returns
    /// the existing port.
    pub async fn allocate(&self, slug: &str) -> Result<u16, ProvisionError> {
        if let Some(existing) = self.registry.resolve(slug).await {
            debug!(slug, port = existing, "reusing registered port");
            return Ok(existing);
        }

        for _ in 0..MAX_BIND_ATTEMPTS {
            let port = ephemeral_port(slug).await?;
            match self.registry.bind(slug, port).await {
                Ok(()) => {
                    debug!(slug, port, "port allocated");
                    return Ok(port);
                }
                // The OS handed out a port another site already holds
                // registered; ask again.
                Err(_) => continue,
            }
        }

        Err(ProvisionError::Container {
            name: slug.to_owned(),
            reason: format!("no conflict-free host port after {MAX_BIND_ATTEMPTS} attempts"),
        })
    }

    /// Releases the registry binding for `slug`.
    pub async fn release(&self, slug: &str) {
        self.registry.release(slug).await;
    }
}

/// Binds port 0, reads the assignment, and drops the listener.
async fn ephemeral_port(slug: &str) -> Result<u16, ProvisionError> {
    let listener =
        TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| ProvisionError::Container {
                name: slug.to_owned(),
                reason: format!("ephemeral port bind failed: {e}"),
            })?;
    let port = listener
        .local_addr()
        .map_err(|e| ProvisionError::Container {
            name: slug.to_owned(),
            reason: format!("ephemeral port lookup failed: {e}"),
        })?
        .port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressforge_core::store::InMemoryPortRegistry;

    fn allocator(registry: Arc<InMemoryPortRegistry>) -> PortAllocator<InMemoryPortRegistry> {
        PortAllocator::new(registry)
    }

    #[tokio::test]
    async fn allocate_returns_unprivileged_port() {
        let registry = Arc::new(InMemoryPortRegistry::new());
        let port = allocator(Arc::clone(&registry)).allocate("acme-cafe").await.unwrap();
        assert!(port >= 1024);
        assert_eq!(registry.resolve("acme-cafe").await, Some(port));
    }

    #[tokio::test]
    async fn allocate_is_stable_per_slug() {
        let registry = Arc::new(InMemoryPortRegistry::new());
        let alloc = allocator(registry);
        let first = alloc.allocate("acme-cafe").await.unwrap();
        let second = alloc.allocate("acme-cafe").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn distinct_slugs_get_distinct_ports() {
        let registry = Arc::new(InMemoryPortRegistry::new());
        let alloc = allocator(registry);
        let a = alloc.allocate("site-a").await.unwrap();
        let b = alloc.allocate("site-b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn release_clears_the_registry_binding() {
        let registry = Arc::new(InMemoryPortRegistry::new());
        let alloc = allocator(Arc::clone(&registry));
        alloc.allocate("site-a").await.unwrap();
        alloc.release("site-a").await;
        assert_eq!(registry.resolve("site-a").await, None);
    }

    #[tokio::test]
    async fn registered_conflicts_are_retried() {
        let registry = Arc::new(InMemoryPortRegistry::new());
        // Pre-register a wide slice of ports to force at least the
        // possibility of a conflict; allocation must still succeed.
        for (i, port) in (40000u16..40064).enumerate() {
            registry.bind(&format!("pre-{i}"), port).await.unwrap();
        }
        let alloc = allocator(Arc::clone(&registry));
        let port = alloc.allocate("site-a").await.unwrap();
        assert!(!(40000..40064).contains(&port));
    }
}
