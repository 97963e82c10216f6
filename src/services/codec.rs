use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Unknown codec '{0}'")]
    Unknown(String),
}

/// Symmetric string codec applied to payloads on the socket and in the store.
pub trait PayloadCodec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, plain: &str) -> String;
    fn decode(&self, encoded: &str) -> Result<String, CodecError>;
}

/// Passes payloads through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl PayloadCodec for PlainCodec {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn encode(&self, plain: &str) -> String {
        plain.to_string()
    }

    fn decode(&self, encoded: &str) -> Result<String, CodecError> {
        Ok(encoded.to_string())
    }
}

/// Standard base64 over the UTF-8 bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Codec;

impl PayloadCodec for Base64Codec {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, plain: &str) -> String {
        general_purpose::STANDARD.encode(plain.as_bytes())
    }

    fn decode(&self, encoded: &str) -> Result<String, CodecError> {
        let bytes = general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(String::from_utf8(bytes)?)
    }
}

pub fn codec_from_name(name: &str) -> Result<Arc<dyn PayloadCodec>, CodecError> {
    match name.trim().to_lowercase().as_str() {
        "plain" | "" => Ok(Arc::new(PlainCodec)),
        "base64" => Ok(Arc::new(Base64Codec)),
        other => Err(CodecError::Unknown(other.to_string())),
    }
}
