//! Per-process MQTT client identifier

use anyhow::{Context, Result};
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;

use crate::constants::identity::CLIENT_ID_BYTES;

/// Hex-encoded random client id, regenerated on every start and never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(String);

impl ClientId {
    /// Draw fresh bytes from the OS CSPRNG
    pub fn generate() -> Result<Self> {
        Self::generate_with(&mut OsRng)
    }

    fn generate_with(rng: &mut impl RngCore) -> Result<Self> {
        let mut bytes = [0u8; CLIENT_ID_BYTES];
        rng.try_fill_bytes(&mut bytes)
            .context("Failed to generate random client id")?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
