use crate::sink::SinkInitError;

#[derive(Debug, thiserror::Error)]
pub enum OutputInitError {
    #[error("Failed to create the sink for output \"{0}\".")]
    Sink(String, #[source] SinkInitError),
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Output \"{0}\" has no sink.")]
    NoSink(String),

    #[error("Output \"{0}\" is already active.")]
    AlreadyActive(String),

    #[error("Output \"{0}\" requires a service but none is bound.")]
    NoService(String),

    #[error("The service bound to output \"{0}\" rejected initialization.")]
    ServiceRejected(String),

    #[error("The sink for output \"{0}\" failed to start.")]
    SinkRejected(String),

    #[error("Output \"{0}\" is missing encoders or sources for its declared capabilities.")]
    MissingMedia(String),

    #[error("An encoder bound to output \"{0}\" failed to initialize.")]
    EncoderFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PauseError {
    #[error("Output \"{0}\" does not support pausing.")]
    NotPausable(String),

    #[error("Output \"{0}\" is not active.")]
    NotActive(String),

    #[error("Pause state transition rejected for output \"{0}\".")]
    InvalidTransition(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("Cannot rebind output \"{0}\" while it is active.")]
    ActiveOutput(String),

    #[error("Audio track index {1} is out of range for output \"{0}\".")]
    TrackOutOfRange(String, usize),

    #[error("Encoder kind does not match the slot it was bound to on output \"{0}\".")]
    WrongKind(String),

    #[error("The service is already active on another output.")]
    ServiceBusy,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("Output \"{0}\" is not active.")]
    NotActive(String),
}
