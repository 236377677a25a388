//! Scripted model for unit tests.

use std::sync::Mutex;

use serde_json::Value;

use super::{LlmCaller, LlmError, LlmFuture, LlmResponse, Message, OutputContract, ToolDefinition};

/// Replays chat and structured responses in order, recording every request.
#[derive(Default)]
pub struct ScriptedLlm {
    chat: Mutex<Vec<Result<LlmResponse, LlmError>>>,
    structured: Mutex<Vec<Result<Value, LlmError>>>,
    pub seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chat_reply(self, response: Result<LlmResponse, LlmError>) -> Self {
        self.chat.lock().unwrap().insert(0, response);
        self
    }

    pub fn structured_reply(self, response: Result<Value, LlmError>) -> Self {
        self.structured.lock().unwrap().insert(0, response);
        self
    }

    pub fn requests(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl LlmCaller for ScriptedLlm {
    fn chat<'a>(
        &'a self,
        messages: &'a [Message],
        _tools: &'a [ToolDefinition],
    ) -> LlmFuture<'a, LlmResponse> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let next = self
            .chat
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(LlmError::Api("no scripted chat response".into())));
        Box::pin(async move { next })
    }

    fn structured<'a>(
        &'a self,
        messages: &'a [Message],
        _contract: &'a OutputContract,
    ) -> LlmFuture<'a, Value> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let next = self
            .structured
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(LlmError::Api("no scripted structured response".into())));
        Box::pin(async move { next })
    }
}
