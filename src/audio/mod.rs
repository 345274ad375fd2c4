pub mod microphone;
pub mod source;

pub use microphone::CpalMicrophone;
pub use source::{AudioClip, CaptureError, ListenOutcome, MicrophoneSource};
