use std::sync::atomic::{AtomicUsize, Ordering};

/// Resolves the `paddleocr_vl_vllm` worker-to-upstream mapping the spec
/// leaves as an opaque policy (§9 Open Questions): a fixed list of vLLM
/// server endpoints, assigned round-robin to each worker loop as it starts
/// up from a shared counter. The spec only requires that each worker end up
/// with exactly one endpoint, not that the assignment be stable across
/// restarts, so a process-lifetime counter is sufficient.
pub struct VllmEndpointPool {
    endpoints: Vec<String>,
    next: AtomicUsize,
}

impl VllmEndpointPool {
    pub fn from_env() -> Self {
        let endpoints = std::env::var("PADDLEOCR_VLLM_ENDPOINTS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            endpoints,
            next: AtomicUsize::new(0),
        }
    }

    /// Assigns the next endpoint in round-robin order, or `None` if no
    /// endpoints were configured (the vllm backend then fails dispatch the
    /// same way any other unavailable explicit backend would).
    pub fn assign(&self) -> Option<String> {
        if self.endpoints.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::SeqCst) % self.endpoints.len();
        Some(self.endpoints[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_configured_endpoints() {
        std::env::set_var("PADDLEOCR_VLLM_ENDPOINTS", "http://a:1,http://b:2");
        let pool = VllmEndpointPool::from_env();
        assert_eq!(pool.assign().as_deref(), Some("http://a:1"));
        assert_eq!(pool.assign().as_deref(), Some("http://b:2"));
        assert_eq!(pool.assign().as_deref(), Some("http://a:1"));
        std::env::remove_var("PADDLEOCR_VLLM_ENDPOINTS");
    }

    #[test]
    fn empty_configuration_assigns_nothing() {
        std::env::remove_var("PADDLEOCR_VLLM_ENDPOINTS");
        let pool = VllmEndpointPool::from_env();
        assert_eq!(pool.assign(), None);
    }
}
