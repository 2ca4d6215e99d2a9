use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message in the conversation history, shaped like the wire format the
/// completion endpoint speaks. Option fields are skipped on serialization so
/// a plain user message never carries null tool fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present only on tool-role messages; correlates to the ToolCall id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Legacy single-call form some endpoints still emit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// A tool-role message; `tool_call_id` correlates it to the originating call.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            function_call: None,
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            function_call: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

/// A single tool invocation requested by the model. The id is an opaque
/// correlation token issued by the completion endpoint and must be echoed
/// back verbatim on the matching tool-role message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// `arguments` is JSON-encoded text; it is only parsed at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// One document returned by the retrieval pipeline. No similarity score is
/// carried: after reranking, the rerank service's ordering is the only
/// authority on relevance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub document: String,
    pub metadata: Map<String, Value>,
}

/// The atomic unit appended to a conversation log: a message plus the
/// documents the tool call behind it retrieved, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDocuments {
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<RetrievedDocument>>,
}

impl MessageDocuments {
    pub fn bare(message: Message) -> Self {
        Self {
            message,
            documents: None,
        }
    }

    pub fn with_documents(message: Message, documents: Vec<RetrievedDocument>) -> Self {
        Self {
            message,
            documents: Some(documents),
        }
    }
}

/// Events emitted by the streaming turn variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token { content: String },
    Done,
    Error { content: String },
}

/// One partial tool call inside a streamed completion chunk. The stream-local
/// `index` identifies the call; the id only shows up in the first delta for
/// that index.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    pub function: FunctionDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// One normalized chunk of a streamed completion.
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
}

/// Incrementally rebuilds complete `ToolCall`s from streamed deltas.
///
/// Builders are keyed by the stream-local index, never by the call id, and
/// argument fragments are always appended, never replaced.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    builders: BTreeMap<u32, ToolCallBuilder>,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, deltas: &[ToolCallDelta]) {
        for delta in deltas {
            let builder = self.builders.entry(delta.index).or_default();
            if builder.id.is_empty() {
                if let Some(id) = &delta.id {
                    builder.id = id.clone();
                }
            }
            if builder.name.is_empty() {
                if let Some(name) = &delta.function.name {
                    builder.name = name.clone();
                }
            }
            if let Some(fragment) = &delta.function.arguments {
                builder.arguments.push_str(fragment);
            }
        }
    }

    /// Consume the accumulator, yielding calls in stream-index order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.builders
            .into_values()
            .map(|b| ToolCall::function(b.id, b.name, b.arguments))
            .collect()
    }
}
