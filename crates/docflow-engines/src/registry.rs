use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::{Engine, EngineError};

/// One row of the `/api/v1/engines` catalog: the static roster entry for a
/// registered backend plus its auto-dispatch rank.
#[derive(Debug, Clone, Serialize)]
pub struct EngineCatalogEntry {
    pub name: &'static str,
    pub extensions: Vec<&'static str>,
    pub auto_dispatch_order: usize,
}

/// Maps `(file_extension, backend)` onto a registered `Engine`. Explicit
/// backend names look the engine up directly, bypassing the auto-dispatch
/// order, but still have to support the file's extension; `auto` walks an
/// ordered list of predicates: domain-format registry, then audio, then
/// video, then the PDF/image pipeline, then the office/text fallback.
pub struct EngineRegistry {
    by_name: HashMap<&'static str, Arc<dyn Engine>>,
    auto_order: Vec<Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn builder() -> EngineRegistryBuilder {
        EngineRegistryBuilder::default()
    }

    pub fn dispatch(&self, file_path: &Path, backend: &str) -> Result<Arc<dyn Engine>, EngineError> {
        if backend != "auto" {
            let engine = self
                .by_name
                .get(backend)
                .cloned()
                .ok_or_else(|| EngineError::Unsupported {
                    engine: "registry",
                    reason: format!("unknown backend '{backend}'"),
                })?;
            // An explicit backend bypasses auto-routing order, not the
            // extension check: a named engine that can't take this file is
            // still an unsupported-extension failure, not a silent attempt.
            if !engine.supports(file_path, backend) {
                return Err(EngineError::Unsupported {
                    engine: "registry",
                    reason: format!(
                        "backend '{backend}' does not support {}",
                        file_path.display()
                    ),
                });
            }
            return Ok(engine);
        }

        self.auto_order
            .iter()
            .find(|engine| engine.supports(file_path, backend))
            .cloned()
            .ok_or_else(|| EngineError::Unsupported {
                engine: "registry",
                reason: format!(
                    "no engine in the auto routing order supports {}",
                    file_path.display()
                ),
            })
    }

    /// The static half of the engine catalog: every registered backend, in
    /// auto-dispatch order. Capability probing (whether the underlying
    /// external command is actually reachable) is layered on by the caller.
    pub fn catalog(&self) -> Vec<EngineCatalogEntry> {
        self.auto_order
            .iter()
            .enumerate()
            .map(|(rank, engine)| EngineCatalogEntry {
                name: engine.name(),
                extensions: engine.extensions().to_vec(),
                auto_dispatch_order: rank,
            })
            .collect()
    }
}

#[derive(Default)]
pub struct EngineRegistryBuilder {
    auto_order: Vec<Arc<dyn Engine>>,
    by_name: HashMap<&'static str, Arc<dyn Engine>>,
}

impl EngineRegistryBuilder {
    /// Registers an engine both by name (for explicit backend selection)
    /// and, in the given call order, as an `auto` candidate. Registration
    /// order IS the auto routing order: domain formats first, then audio,
    /// video, the pdf/image pipeline, and finally the office/text fallback.
    pub fn register(mut self, engine: Arc<dyn Engine>) -> Self {
        self.by_name.insert(engine.name(), engine.clone());
        self.auto_order.push(engine);
        self
    }

    pub fn build(self) -> EngineRegistry {
        EngineRegistry {
            by_name: self.by_name,
            auto_order: self.auto_order,
        }
    }
}
