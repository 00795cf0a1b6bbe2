// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// A single content part in a multi-part message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { image_url: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image { image_url: image_url.into() }
    }
}

/// Content returned by a tool — either a plain string or structured parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Parts(Vec<ToolContentPart>),
}

impl ToolResultContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Parts(_) => None,
        }
    }
}

impl From<String> for ToolResultContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolResultContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl std::fmt::Display for ToolResultContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(t) => write!(f, "{t}"),
            Self::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|p| match p {
                        ToolContentPart::Text { text } => Some(text.as_str()),
                        ToolContentPart::Image { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                write!(f, "{text}")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContentPart {
    Text { text: String },
    Image { image_url: String },
}

/// Parse a data URL of the form `data:<mime>;base64,<b64>`.
pub fn parse_data_url_parts(url: &str) -> Result<(String, String), &'static str> {
    let rest = url.strip_prefix("data:").ok_or("not a data URL")?;
    let (meta, b64) = rest.split_once(',').ok_or("malformed data URL")?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    Ok((mime, b64.to_string()))
}

/// A single message in the conversation history (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: FunctionCall { name: name.into(), arguments: arguments.into() },
            },
        }
    }

    /// An assistant turn that may carry narration text alongside one or more
    /// tool invocations — the shape a direct-API turn finalizes into when the
    /// model requests tools, possibly several at once.
    pub fn assistant_turn(text: Option<String>, tool_calls: Vec<ToolUseBlock>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::AssistantTurn { text, tool_calls } }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: ToolResultContent::Text(content.into()),
                is_error: false,
            },
        }
    }

    pub fn tool_result_error(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: ToolResultContent::Text(content.into()),
                is_error: true,
            },
        }
    }

    /// A single `user`-role message batching every tool result from one
    /// direct-API tool loop, in call order (§4.6 step "after all tool-use
    /// blocks ... append a single user-role message").
    pub fn tool_results(blocks: Vec<ToolResultBlock>) -> Self {
        Self { role: Role::Tool, content: MessageContent::ToolResults(blocks) }
    }

    /// Plain text of this message, if it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The content of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ContentParts(Vec<ContentPart>),
    ToolCall { tool_call_id: String, function: FunctionCall },
    ToolResult { tool_call_id: String, content: ToolResultContent, is_error: bool },
    AssistantTurn { text: Option<String>, tool_calls: Vec<ToolUseBlock> },
    ToolResults(Vec<ToolResultBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, possibly assembled from streamed deltas.
    pub arguments: String,
}

/// One finalized tool invocation the model requested, after its streamed
/// `input_json_delta` fragments have been joined (§4.6 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// One entry of a batched tool-result message (§4.6: "a single user-role
/// message whose content is the ordered list of tool_result blocks").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_call_id: String,
    pub content: ToolResultContent,
    pub is_error: bool,
}

/// A tool schema sent to the model alongside the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request sent to a model provider (§6.2 SendPrompt).
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// A single streamed event from the model (§4.2).
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// The model wants to call a tool. Streamed across multiple deltas sharing
    /// the same `index`; `arguments` accumulates the partial JSON.
    ToolCall { index: u32, id: String, name: String, arguments: String },
    Usage { input_tokens: u32, output_tokens: u32, cache_read_tokens: u32, cache_write_tokens: u32 },
    /// The model's turn ended because it wants to invoke one or more tools.
    StopForToolUse,
    /// The stream finished with no further tool calls pending.
    Done,
    /// The model hit its output-token limit mid-stream.
    MaxTokens,
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
