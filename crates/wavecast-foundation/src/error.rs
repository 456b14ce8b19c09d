use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Sample source init failed: {0}")]
    SourceInit(String),

    #[error("Sample source read failed: {0}")]
    SourceRead(String),

    #[error("Unsupported sample rate: {rate} Hz")]
    UnsupportedRate { rate: u32 },

    #[error("Client slot {id} out of range")]
    ClientOutOfRange { id: usize },

    #[error("Client slot {id} already registered")]
    ClientAlreadyRegistered { id: usize },

    #[error("Client slot {id} not registered")]
    ClientNotRegistered { id: usize },

    #[error("All client slots in use")]
    RegistryFull,

    #[error("CPAL stream error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

impl AudioError {
    /// Transient errors are counted and retried in place; everything else
    /// propagates to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, AudioError::SourceRead(_))
    }
}
