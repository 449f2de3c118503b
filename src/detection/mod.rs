pub mod autodetector;
pub mod classifier;

pub use autodetector::{DetectionPhase, DetectionState, TokenAutoDetector};
pub use classifier::{ClassifiedContract, ContractClassifier};
