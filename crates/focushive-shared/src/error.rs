use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed `{event}` payload: {source}")]
    Decode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode `{event}` payload: {source}")]
    Encode {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}
