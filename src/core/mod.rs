pub mod extractor;
pub mod fallback;
pub mod gatekeeper;
pub mod index;
pub mod matcher;

pub use extractor::{decode_image, CommandExtractor, EmbeddingExtractor, Extraction, NullExtractor};
pub use fallback::{sign_qr_token, verify_qr_token, QrClaims};
pub use gatekeeper::Gatekeeper;
pub use index::{euclidean_distance, Embedding, LinearScanIndex, NearestNeighborIndex, Neighbor};
pub use matcher::{Matcher, ProbeResult};
