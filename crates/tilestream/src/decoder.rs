//! Tile payload decoders, dispatched by file extension.
//!
//! Format-specific parsing (meshes, point clouds, batched meshes) lives
//! outside this crate. A decoder turns a payload into renderer primitives
//! and optionally reports an absolute ECEF anchor for the content.

use std::collections::HashMap;
use std::rc::Rc;

use glam::DVec3;

use crate::LocalBoxFuture;
use crate::error::Result;
use crate::scene::{NodeId, Scene};

/// The result of decoding one tile payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedContent {
    /// Renderer primitives created for the payload, unparented.
    pub primitives: Vec<NodeId>,
    /// Absolute ECEF position embedded in the payload, if any
    /// (for example an RTC center).
    pub anchor_ecef: Option<DVec3>,
}

/// Decodes one kind of tile payload.
pub trait ContentDecoder {
    /// Decode `bytes` into primitives created through `scene`.
    ///
    /// `name` identifies the content in logs and renderer debug names.
    fn decode<'a>(
        &'a self,
        bytes: Vec<u8>,
        name: &'a str,
        scene: &'a Rc<dyn Scene>,
    ) -> LocalBoxFuture<'a, Result<DecodedContent>>;
}

/// Maps lowercase file extensions to decoders.
#[derive(Default, Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Rc<dyn ContentDecoder>>,
}

impl DecoderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decoder` for an extension, given with or without the dot.
    /// Replaces any decoder previously registered for it.
    pub fn register(&mut self, extension: &str, decoder: Rc<dyn ContentDecoder>) {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.decoders.insert(key, decoder);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, extension: &str, decoder: Rc<dyn ContentDecoder>) -> Self {
        self.register(extension, decoder);
        self
    }

    /// The decoder for a content URL, if its extension is registered.
    #[must_use]
    pub fn decoder_for(&self, url: &str) -> Option<Rc<dyn ContentDecoder>> {
        extension_of(url).and_then(|ext| self.decoders.get(&ext).cloned())
    }

    /// Registered extensions, sorted.
    #[must_use]
    pub fn extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        extensions.sort_unstable();
        extensions
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

/// Lowercase extension of the last path segment of a URL.
///
/// Query strings and fragments are ignored.
#[must_use]
pub fn extension_of(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl ContentDecoder for Empty {
        fn decode<'a>(
            &'a self,
            _bytes: Vec<u8>,
            _name: &'a str,
            _scene: &'a Rc<dyn Scene>,
        ) -> LocalBoxFuture<'a, Result<DecodedContent>> {
            Box::pin(async { Ok(DecodedContent::default()) })
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("https://a.com/t/0.B3DM").as_deref(), Some("b3dm"));
        assert_eq!(extension_of("tiles/x.pnts?v=2#frag").as_deref(), Some("pnts"));
        assert_eq!(extension_of("https://a.com/v1.2/tile"), None);
        assert_eq!(extension_of("tiles/.hidden"), None);
        assert_eq!(extension_of("tiles/trailing."), None);
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = DecoderRegistry::new()
            .with(".b3dm", Rc::new(Empty))
            .with("PNTS", Rc::new(Empty));

        assert_eq!(registry.extensions(), vec!["b3dm", "pnts"]);
        assert!(registry.decoder_for("a/b.b3dm").is_some());
        assert!(registry.decoder_for("a/b.Pnts").is_some());
        assert!(registry.decoder_for("a/b.glb").is_none());
        assert!(registry.decoder_for("a/b").is_none());
    }
}
