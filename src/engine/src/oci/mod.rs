//! OCI image model and registry access.
//!
//! Images, layers and indexes are immutable values; every change yields a
//! new value whose digest is recomputed from its serialized manifest.

pub mod credentials;
pub mod digest;
pub mod image;
pub mod index;
pub mod layer;
pub mod manifest;
pub mod media_type;
pub mod platform;
pub mod reference;
pub mod registry;

pub use credentials::CredentialStore;
pub use digest::{sha256_bytes, sha256_digest, ContentAddressed};
pub use image::Image;
pub use index::{Artifact, EntryMetadata, ImageIndex, ManifestEntry};
pub use layer::{Layer, LayerReader};
pub use manifest::{Annotations, Descriptor, ImageManifest, IndexManifest};
pub use media_type::ManifestKind;
pub use platform::Platform;
pub use reference::ImageReference;
pub use registry::{OciRegistry, Registry, RegistryAuth};
