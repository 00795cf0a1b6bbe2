// SPDX-License-Identifier: MIT
use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent};

/// Streams completions against Anthropic's Messages endpoint (§4.2, §6.1).
pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    /// Attach `cache_control` to the system prompt and tool definitions so
    /// Anthropic caches the stable prefix, cutting input-token cost on
    /// repeated turns within the same session.
    cache_prompt: bool,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: String, api_key: String) -> Self {
        Self::with_options(model, api_key, None, None, true)
    }

    pub fn with_options(
        model: String,
        api_key: String,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        cache_prompt: bool,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens: max_tokens.unwrap_or(8192),
            cache_prompt,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let (system_text, messages) = build_anthropic_messages(&req.messages);

        let cache_ctrl = json!({ "type": "ephemeral" });

        let tools: Vec<Value> = if !req.tools.is_empty() && self.cache_prompt {
            let last = req.tools.len() - 1;
            req.tools
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let mut v = json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    });
                    if i == last {
                        v["cache_control"] = cache_ctrl.clone();
                    }
                    v
                })
                .collect()
        } else {
            req.tools
                .iter()
                .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
                .collect()
        };

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "stream": true,
        });

        if !system_text.is_empty() {
            if self.cache_prompt {
                body["system"] = json!([{ "type": "text", "text": system_text, "cache_control": cache_ctrl }]);
            } else {
                body["system"] = json!(system_text);
            }
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(model = %self.model, cache_prompt = self.cache_prompt, "sending anthropic request");

        let mut request_builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01");

        if self.cache_prompt {
            request_builder = request_builder.header("anthropic-beta", "prompt-caching-2024-07-31");
        }

        let resp = request_builder.json(&body).send().await.context("Anthropic request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("API error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE lines can be split across TCP chunks, so a remainder buffer
        // carries forward; only complete lines are parsed.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let text = match chunk {
                    Ok(b) => String::from_utf8_lossy(&b).to_string(),
                    Err(e) => return futures::future::ready(Some(vec![Err(anyhow::anyhow!(e))])),
                };
                buf.push_str(&text);
                let mut events = Vec::new();
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    if let Some(data) = line.strip_prefix("data: ") {
                        let data = data.trim();
                        if let Ok(v) = serde_json::from_str::<Value>(data) {
                            events.push(parse_anthropic_event(&v));
                        }
                    }
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

pub(crate) fn parse_anthropic_event(v: &Value) -> anyhow::Result<ResponseEvent> {
    let event_type = v["type"].as_str().unwrap_or("");
    match event_type {
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => Ok(ResponseEvent::TextDelta(delta["text"].as_str().unwrap_or("").to_string())),
                "input_json_delta" => Ok(ResponseEvent::ToolCall {
                    index,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                }),
                "thinking_delta" => {
                    let thinking = delta["thinking"].as_str().unwrap_or("").to_string();
                    if thinking.is_empty() {
                        Ok(ResponseEvent::TextDelta(String::new()))
                    } else {
                        Ok(ResponseEvent::ThinkingDelta(thinking))
                    }
                }
                // Integrity signature for the preceding thinking block; opaque, never shown.
                "signature_delta" => Ok(ResponseEvent::TextDelta(String::new())),
                _ => Ok(ResponseEvent::TextDelta(String::new())),
            }
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                Ok(ResponseEvent::ToolCall {
                    index,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                })
            } else {
                Ok(ResponseEvent::TextDelta(String::new()))
            }
        }
        "message_delta" => {
            match v["delta"]["stop_reason"].as_str() {
                Some("max_tokens") => return Ok(ResponseEvent::MaxTokens),
                Some("tool_use") => return Ok(ResponseEvent::StopForToolUse),
                _ => {}
            }
            if let Some(usage) = v.get("usage") {
                return Ok(ResponseEvent::Usage {
                    input_tokens: 0,
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                });
            }
            Ok(ResponseEvent::TextDelta(String::new()))
        }
        "message_start" => {
            if let Some(usage) = v["message"].get("usage") {
                return Ok(ResponseEvent::Usage {
                    input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: 0,
                    cache_read_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32,
                    cache_write_tokens: usage["cache_creation_input_tokens"].as_u64().unwrap_or(0) as u32,
                });
            }
            Ok(ResponseEvent::TextDelta(String::new()))
        }
        "message_stop" => Ok(ResponseEvent::Done),
        _ => Ok(ResponseEvent::TextDelta(String::new())),
    }
}

/// Convert conversation history into Anthropic's wire format.
/// Returns `(system_text, conversation_messages)`.
pub(crate) fn build_anthropic_messages(messages: &[crate::Message]) -> (String, Vec<Value>) {
    use crate::{ContentPart, MessageContent, Role};

    let mut system_text = String::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        if m.role == Role::System {
            if let Some(t) = m.as_text() {
                system_text = t.to_string();
            }
            continue;
        }
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "user",
            Role::System => unreachable!(),
        };
        match &m.content {
            MessageContent::Text(t) => out.push(json!({ "role": role, "content": t })),
            MessageContent::ContentParts(parts) if !parts.is_empty() => {
                let content: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { image_url } => {
                            if let Ok((mime, data)) = crate::types::parse_data_url_parts(image_url) {
                                json!({ "type": "image", "source": { "type": "base64", "media_type": mime, "data": data } })
                            } else {
                                json!({ "type": "image", "source": { "type": "url", "url": image_url } })
                            }
                        }
                    })
                    .collect();
                out.push(json!({ "role": role, "content": content }));
            }
            MessageContent::ContentParts(_) => out.push(json!({ "role": role, "content": "" })),
            MessageContent::ToolCall { tool_call_id, function } => {
                out.push(json!({
                    "role": "assistant",
                    "content": [{
                        "type": "tool_use",
                        "id": tool_call_id,
                        "name": function.name,
                        "input": serde_json::from_str::<Value>(&function.arguments).unwrap_or(json!({})),
                    }]
                }));
            }
            MessageContent::ToolResult { tool_call_id, content, is_error } => {
                out.push(json!({
                    "role": "user",
                    "content": [tool_result_block(tool_call_id, content, *is_error)]
                }));
            }
            MessageContent::AssistantTurn { text, tool_calls } => {
                let mut content: Vec<Value> = Vec::new();
                if let Some(t) = text {
                    if !t.is_empty() {
                        content.push(json!({ "type": "text", "text": t }));
                    }
                }
                for call in tool_calls {
                    content.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": serde_json::from_str::<Value>(&call.arguments).unwrap_or(json!({})),
                    }));
                }
                out.push(json!({ "role": "assistant", "content": content }));
            }
            MessageContent::ToolResults(blocks) => {
                let content: Vec<Value> = blocks
                    .iter()
                    .map(|b| tool_result_block(&b.tool_call_id, &b.content, b.is_error))
                    .collect();
                out.push(json!({ "role": "user", "content": content }));
            }
        }
    }
    (system_text, out)
}

fn tool_result_block(tool_call_id: &str, content: &crate::ToolResultContent, is_error: bool) -> Value {
    use crate::{ToolContentPart, ToolResultContent};

    let wire_content: Value = match content {
        ToolResultContent::Text(t) => json!(t),
        ToolResultContent::Parts(parts) if !parts.is_empty() => {
            let arr: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ToolContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ToolContentPart::Image { image_url } => {
                        if let Ok((mime, data)) = crate::types::parse_data_url_parts(image_url) {
                            json!({ "type": "image", "source": { "type": "base64", "media_type": mime, "data": data } })
                        } else {
                            json!({ "type": "image", "source": { "type": "url", "url": image_url } })
                        }
                    }
                })
                .collect();
            json!(arr)
        }
        ToolResultContent::Parts(_) => json!(""),
    };
    let mut block = json!({ "type": "tool_result", "tool_use_id": tool_call_id, "content": wire_content });
    if is_error {
        block["is_error"] = json!(true);
    }
    block
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelProvider;

    #[test]
    fn provider_name_and_model() {
        let p = AnthropicProvider::new("claude-sonnet-4-5".into(), "key".into());
        assert_eq!(p.name(), "anthropic");
        assert_eq!(p.model_name(), "claude-sonnet-4-5");
    }

    #[test]
    fn message_start_yields_input_usage() {
        let v = json!({ "type": "message_start", "message": { "usage": { "input_tokens": 42, "output_tokens": 0 } } });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(ev, ResponseEvent::Usage { input_tokens: 42, output_tokens: 0, .. }));
    }

    #[test]
    fn message_start_parses_cache_tokens() {
        let v = json!({
            "type": "message_start",
            "message": { "usage": { "input_tokens": 100, "output_tokens": 0, "cache_read_input_tokens": 80, "cache_creation_input_tokens": 20 } }
        });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(ev, ResponseEvent::Usage { input_tokens: 100, cache_read_tokens: 80, cache_write_tokens: 20, .. }));
    }

    #[test]
    fn content_block_start_tool_use_emits_tool_call() {
        let v = json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "tool_use", "id": "toolu_01", "name": "Bash" } });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(&ev, ResponseEvent::ToolCall { index, id, name, arguments }
            if *index == 0 && id == "toolu_01" && name == "Bash" && arguments.is_empty()));
    }

    #[test]
    fn content_block_delta_text_delta() {
        let v = json!({ "type": "content_block_delta", "delta": { "type": "text_delta", "text": "world" } });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "world"));
    }

    #[test]
    fn content_block_delta_input_json_delta_accumulates_by_index() {
        let v = json!({ "index": 2, "type": "content_block_delta", "delta": { "type": "input_json_delta", "partial_json": "{\"key\":" } });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(&ev, ResponseEvent::ToolCall { index: 2, arguments, .. } if arguments == "{\"key\":"));
    }

    #[test]
    fn content_block_delta_thinking_delta_produces_thinking_event() {
        let v = json!({ "type": "content_block_delta", "delta": { "type": "thinking_delta", "thinking": "reasoning" } });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(&ev, ResponseEvent::ThinkingDelta(t) if t == "reasoning"));
    }

    #[test]
    fn message_delta_tool_use_stop_reason_yields_stop_for_tool_use() {
        let v = json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" } });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(ev, ResponseEvent::StopForToolUse));
    }

    #[test]
    fn message_delta_max_tokens_stop_reason_yields_max_tokens() {
        let v = json!({ "type": "message_delta", "delta": { "stop_reason": "max_tokens" } });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(ev, ResponseEvent::MaxTokens));
    }

    #[test]
    fn message_stop_yields_done() {
        let v = json!({ "type": "message_stop" });
        let ev = parse_anthropic_event(&v).unwrap();
        assert!(matches!(ev, ResponseEvent::Done));
    }

    #[test]
    fn build_anthropic_messages_separates_system_text() {
        let messages = vec![crate::Message::system("be terse"), crate::Message::user("hi")];
        let (system, out) = build_anthropic_messages(&messages);
        assert_eq!(system, "be terse");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["role"], "user");
    }

    #[test]
    fn build_anthropic_messages_translates_tool_result_to_user_role() {
        let messages = vec![crate::Message::tool_result("tc_1", "output text")];
        let (_, out) = build_anthropic_messages(&messages);
        assert_eq!(out[0]["role"], "user");
        assert_eq!(out[0]["content"][0]["type"], "tool_result");
        assert_eq!(out[0]["content"][0]["tool_use_id"], "tc_1");
    }
}
