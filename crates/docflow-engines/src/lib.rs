//! The polymorphic engine registry, the built-in external-process engines,
//! the pre-processing hooks (watermark removal, office-to-PDF conversion),
//! and the PDF splitter/merger fan-out coordinator.

pub mod builtins;
pub mod engine;
pub mod merge;
pub mod office;
pub mod registry;
pub mod split;
pub mod watermark;

pub use builtins::{default_registry, EngineBinaries, ExternalCommandEngine};
pub use engine::{Engine, EngineError};
pub use registry::{EngineRegistry, EngineRegistryBuilder};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn auto_dispatch_prefers_registration_order() {
        let binaries = EngineBinaries::default();
        let registry = default_registry(&binaries);

        let pdf = registry.dispatch(Path::new("a.pdf"), "auto").unwrap();
        assert_eq!(pdf.name(), "pipeline");

        let wav = registry.dispatch(Path::new("a.wav"), "auto").unwrap();
        assert_eq!(wav.name(), "sensevoice");

        let docx = registry.dispatch(Path::new("a.docx"), "auto").unwrap();
        assert_eq!(docx.name(), "office-text");
    }

    #[test]
    fn explicit_backend_bypasses_routing() {
        let binaries = EngineBinaries::default();
        let registry = default_registry(&binaries);
        let engine = registry.dispatch(Path::new("a.pdf"), "paddleocr-vl").unwrap();
        assert_eq!(engine.name(), "paddleocr-vl");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let binaries = EngineBinaries::default();
        let registry = default_registry(&binaries);
        assert!(registry.dispatch(Path::new("a.pdf"), "not-a-backend").is_err());
    }
}
