pub mod registry;

pub use registry::{ToolDefinition, TOOLS};

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info};

use crate::traits::Retriever;
use crate::types::{Message, MessageDocuments, ToolCall};

pub const UNKNOWN_TOOL_MESSAGE: &str = "There is no tool with that name.";
pub const UNIMPLEMENTED_TOOL_MESSAGE: &str = "Tool not found.";

/// The closed set of tools this build can actually execute, each bound to
/// its collection. A registry entry with no arm here is a configuration
/// gap the dispatcher reports, not a user error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    GdprQuery,
    GdprGet,
    EdpbQuery,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gdpr_query" => Some(ToolKind::GdprQuery),
            "gdpr_get" => Some(ToolKind::GdprGet),
            "edpb_query" => Some(ToolKind::EdpbQuery),
            _ => None,
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            ToolKind::GdprQuery | ToolKind::GdprGet => "gdpr",
            ToolKind::EdpbQuery => "edpb_guidance",
        }
    }
}

/// Maps model-requested tool calls to retrieval entry points. Every per-call
/// outcome, including failures, becomes a tool-role message, so one bad call
/// never aborts the batch or the turn.
pub struct ToolDispatcher {
    retriever: Arc<dyn Retriever>,
}

impl ToolDispatcher {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    /// One output per input call, same order as the input.
    pub async fn dispatch(&self, message: &Message) -> Vec<MessageDocuments> {
        let calls: &[ToolCall] = message.tool_calls.as_deref().unwrap_or(&[]);
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            outputs.push(self.dispatch_one(call).await);
        }
        outputs
    }

    async fn dispatch_one(&self, call: &ToolCall) -> MessageDocuments {
        let name = call.function.name.as_str();

        if registry::find(name).is_none() {
            error!(
                tool = name,
                "The model tried to call a tool that is not in the registry"
            );
            return MessageDocuments::bare(Message::tool(&call.id, UNKNOWN_TOOL_MESSAGE));
        }

        let Some(kind) = ToolKind::from_name(name) else {
            // Registered but no handler arm: an implementation gap, not the
            // model misbehaving.
            error!(
                tool = name,
                "Tool is registered but has no dispatch handler"
            );
            return MessageDocuments::bare(Message::tool(&call.id, UNIMPLEMENTED_TOOL_MESSAGE));
        };

        let arguments: Map<String, Value> = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                error!(tool = name, "Tool call arguments are not a JSON object: {}", e);
                return MessageDocuments::bare(Message::tool(
                    &call.id,
                    format!("Tool call arguments could not be parsed: {}", e),
                ));
            }
        };

        info!(tool = name, arguments = %call.function.arguments, "Dispatching tool call");

        let result = match kind {
            ToolKind::GdprQuery | ToolKind::EdpbQuery => {
                self.retriever
                    .semantic_query(&arguments, kind.collection(), &call.id)
                    .await
            }
            ToolKind::GdprGet => {
                self.retriever
                    .metadata_query(&arguments, kind.collection(), &call.id)
                    .await
            }
        };

        match result {
            Ok(msg_docs) => msg_docs,
            Err(e) => {
                error!(tool = name, "Tool call failed: {}", e);
                MessageDocuments::bare(Message::tool(&call.id, e.to_string()))
            }
        }
    }
}
