// SPDX-License-Identifier: MIT
//! The direct-API model client: streams completions against the Anthropic
//! Messages endpoint (spec §4.2).

mod anthropic;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use types::*;

use conduit_config::Config;

/// Construct the configured [`ModelProvider`].
///
/// The direct-API backend currently has one vendor: Anthropic. Keeping this
/// as a function (rather than inlining it at the call site) mirrors the
/// selection point a second vendor would plug into.
pub fn from_config(cfg: &Config) -> anyhow::Result<Box<dyn ModelProvider>> {
    let api_key = cfg
        .vendor_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("CONDUIT_VENDOR_API_KEY not set"))?;
    Ok(Box::new(AnthropicProvider::new(cfg.model_name.clone(), api_key)))
}
