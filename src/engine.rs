use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::chat::Chat;
use crate::providers::CompletionClient;
use crate::state::{ChatStore, StoreError};
use crate::tools::{registry, ToolDispatcher};
use crate::types::{
    Message, MessageDocuments, RetrievedDocument, Role, StreamEvent, ToolCallAccumulator,
};

/// Shown to the user when the completion backend stays unreachable after
/// all retries. The turn still commits, so the conversation can continue.
const COMPLETION_UNAVAILABLE: &str =
    "I ran into a problem reaching the language model. Please try again in a moment.";

/// Look up a user by name, turning absence into an error the caller can
/// surface directly.
pub async fn resolve_user(store: &Arc<dyn ChatStore>, user_name: &str) -> Result<i64, StoreError> {
    store
        .check_user(user_name)
        .await?
        .ok_or_else(|| StoreError::UserNotFound(user_name.to_string()))
}

/// Drives one conversation end to end: user prompt in, assistant answer out,
/// with the retrieval tool round-trip in between when the model asks for it.
///
/// Every message is persisted before it joins the in-memory log, so a crash
/// mid-turn never leaves the stored chat ahead of or behind what the model
/// was shown.
pub struct ConversationEngine {
    client: CompletionClient,
    dispatcher: ToolDispatcher,
    store: Arc<dyn ChatStore>,
    user_id: i64,
    chat: Chat,
}

impl ConversationEngine {
    pub fn new(
        client: CompletionClient,
        dispatcher: ToolDispatcher,
        store: Arc<dyn ChatStore>,
        user_id: i64,
        system_prompt: &str,
    ) -> Self {
        let chat = Chat::new(store.clone(), user_id, system_prompt);
        Self {
            client,
            dispatcher,
            store,
            user_id,
            chat,
        }
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Swap the current chat for a stored one.
    pub async fn load_chat(&mut self, chat_id: i64) -> Result<(), StoreError> {
        self.chat = Chat::load(self.store.clone(), self.user_id, chat_id).await?;
        Ok(())
    }

    /// Map requested tool names to wire schemas. Unknown names are logged
    /// and skipped rather than failing the turn.
    fn resolve_tools(tool_names: &[String]) -> Vec<Value> {
        let mut tools = Vec::with_capacity(tool_names.len());
        for name in tool_names {
            match registry::find(name) {
                Some(def) => tools.push(def.to_wire()),
                None => warn!(tool = %name, "Unknown tool requested, skipping"),
            }
        }
        tools
    }

    async fn commit_prompt(&mut self, prompt: &str) -> Result<(), StoreError> {
        if self.chat.is_new() {
            self.chat.init(prompt).await
        } else {
            self.chat
                .add_message(MessageDocuments::bare(Message::user(prompt)))
                .await
        }
    }

    /// Append a canned assistant apology so a failed completion still leaves
    /// the log consistent, and hand the same message back to the caller.
    async fn soft_fail(&mut self) -> anyhow::Result<MessageDocuments> {
        let msg = MessageDocuments::bare(Message::assistant(COMPLETION_UNAVAILABLE));
        self.chat.add_message(msg.clone()).await?;
        Ok(msg)
    }

    /// Run one full turn and return the final assistant message, paired with
    /// whatever documents the retrieval tools surfaced along the way.
    pub async fn process_prompt(
        &mut self,
        prompt: &str,
        tool_names: &[String],
    ) -> anyhow::Result<MessageDocuments> {
        self.commit_prompt(prompt).await?;

        let tools = Self::resolve_tools(tool_names);
        let tools = (!tools.is_empty()).then_some(tools.as_slice());

        let response = match self.client.send(self.chat.messages(), tools).await {
            Ok(message) => message,
            Err(e) => {
                error!("Completion failed, answering with fallback: {}", e);
                return self.soft_fail().await;
            }
        };

        if !response.has_tool_calls() {
            let answer = MessageDocuments::bare(response);
            self.chat.add_message(answer.clone()).await?;
            return Ok(answer);
        }

        let documents = self.run_tool_round(response).await?;

        let final_message = match self.client.send(self.chat.messages(), None).await {
            Ok(message) => message,
            Err(e) => {
                error!("Follow-up completion failed, answering with fallback: {}", e);
                return self.soft_fail().await;
            }
        };

        let answer = match documents {
            Some(docs) => MessageDocuments::with_documents(final_message, docs),
            None => MessageDocuments::bare(final_message),
        };
        self.chat.add_message(answer.clone()).await?;
        Ok(answer)
    }

    /// Persist the tool-calling assistant message, dispatch every call, and
    /// persist the tool results in call order. Returns the documents the
    /// successful retrievals produced, if any.
    async fn run_tool_round(
        &mut self,
        assistant: Message,
    ) -> anyhow::Result<Option<Vec<RetrievedDocument>>> {
        info!(
            calls = assistant.tool_calls.as_ref().map_or(0, Vec::len),
            "Model requested tool calls"
        );
        self.chat
            .add_message(MessageDocuments::bare(assistant.clone()))
            .await?;

        let results = self.dispatcher.dispatch(&assistant).await;
        let mut documents: Vec<RetrievedDocument> = Vec::new();
        for result in results {
            if let Some(docs) = &result.documents {
                documents.extend(docs.iter().cloned());
            }
            self.chat.add_message(result).await?;
        }

        Ok((!documents.is_empty()).then_some(documents))
    }

    /// Streaming variant of `process_prompt`. Content tokens are forwarded
    /// on `tx` as they arrive; the turn ends with a single `Done` or `Error`
    /// event. A dropped receiver aborts the turn without persisting a final
    /// assistant message.
    pub async fn process_prompt_streaming(
        &mut self,
        prompt: &str,
        tool_names: &[String],
        tx: mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<()> {
        self.commit_prompt(prompt).await?;

        let tools = Self::resolve_tools(tool_names);
        let tools = (!tools.is_empty()).then_some(tools.as_slice());

        let first = match self.stream_once(tools, &tx).await? {
            StreamOutcome::Finished(msg) => msg,
            StreamOutcome::Failed => {
                self.soft_fail().await?;
                return Ok(());
            }
            StreamOutcome::Cancelled => return Ok(()),
        };

        if !first.has_tool_calls() {
            self.chat.add_message(MessageDocuments::bare(first)).await?;
            let _ = tx.send(StreamEvent::Done).await;
            return Ok(());
        }

        let documents = self.run_tool_round(first).await?;

        let final_message = match self.stream_once(None, &tx).await? {
            StreamOutcome::Finished(msg) => msg,
            StreamOutcome::Failed => {
                self.soft_fail().await?;
                return Ok(());
            }
            StreamOutcome::Cancelled => return Ok(()),
        };

        let answer = match documents {
            Some(docs) => MessageDocuments::with_documents(final_message, docs),
            None => MessageDocuments::bare(final_message),
        };
        self.chat.add_message(answer).await?;
        let _ = tx.send(StreamEvent::Done).await;
        Ok(())
    }

    /// Consume one streamed completion, forwarding content tokens and
    /// rebuilding any tool calls from their deltas.
    async fn stream_once(
        &self,
        tools: Option<&[Value]>,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<StreamOutcome> {
        let mut rx = match self.client.send_streaming(self.chat.messages(), tools).await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Failed to open completion stream: {}", e);
                let _ = tx
                    .send(StreamEvent::Error {
                        content: COMPLETION_UNAVAILABLE.to_string(),
                    })
                    .await;
                return Ok(StreamOutcome::Failed);
            }
        };

        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();

        while let Some(delta) = rx.recv().await {
            let delta = match delta {
                Ok(delta) => delta,
                Err(e) => {
                    error!("Completion stream broke mid-turn: {}", e);
                    let _ = tx
                        .send(StreamEvent::Error {
                            content: COMPLETION_UNAVAILABLE.to_string(),
                        })
                        .await;
                    return Ok(StreamOutcome::Failed);
                }
            };

            accumulator.apply(&delta.tool_calls);

            if let Some(token) = delta.content {
                if !token.is_empty() {
                    content.push_str(&token);
                    let event = StreamEvent::Token { content: token };
                    if tx.send(event).await.is_err() {
                        info!("Stream receiver dropped, abandoning turn");
                        return Ok(StreamOutcome::Cancelled);
                    }
                }
            }
        }

        let tool_calls = accumulator.finish();
        let message = Message {
            role: Role::Assistant,
            content: (!content.is_empty()).then_some(content),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            function_call: None,
        };
        Ok(StreamOutcome::Finished(message))
    }
}

enum StreamOutcome {
    Finished(Message),
    Failed,
    Cancelled,
}
