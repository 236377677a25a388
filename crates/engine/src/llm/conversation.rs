use super::types::{Message, ToolCall};

/// Append-only conversation log owned by one agent session.
///
/// Always starts with exactly one system message followed by the initial user
/// message. Growing the log consumes it and hands back the extended log, so
/// earlier entries can never be mutated or reordered.
#[derive(Clone, Debug)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(user_message)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append an assistant reply (with any tool calls it carries).
    pub fn with_assistant(mut self, content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        self.messages.push(Message::Assistant {
            content,
            tool_calls,
        });
        self
    }

    /// Append one tool-result message answering `call`.
    pub fn with_tool_result(mut self, call: &ToolCall, content: String, is_error: bool) -> Self {
        self.messages.push(Message::Tool {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            is_error,
        });
        self
    }

    /// Ids of tool calls that have no tool-result message yet.
    ///
    /// Must be empty whenever the log is sent to the model.
    pub fn unanswered_calls(&self) -> Vec<&str> {
        let mut pending: Vec<&str> = Vec::new();
        for message in &self.messages {
            match message {
                Message::Assistant { tool_calls, .. } => {
                    pending.extend(tool_calls.iter().map(|c| c.id.as_str()));
                }
                Message::Tool { tool_call_id, .. } => {
                    if let Some(pos) = pending.iter().position(|id| id == tool_call_id) {
                        pending.remove(pos);
                    }
                }
                _ => {}
            }
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "execute_code".into(),
            arguments: json!({"code": "print(1)"}),
        }
    }

    #[test]
    fn test_starts_with_single_system_message() {
        let conv = Conversation::new("sys", "hello");
        assert_eq!(conv.len(), 2);
        assert!(matches!(conv.messages()[0], Message::System { .. }));
        assert!(matches!(conv.messages()[1], Message::User { .. }));
        assert_eq!(
            conv.messages()
                .iter()
                .filter(|m| matches!(m, Message::System { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_unanswered_calls_tracks_correlation() {
        let (a, b) = (call("call_a"), call("call_b"));
        let conv = Conversation::new("sys", "hello").with_assistant(None, vec![a.clone(), b.clone()]);
        assert_eq!(conv.unanswered_calls(), vec!["call_a", "call_b"]);

        let conv = conv.with_tool_result(&a, "1\n".into(), false);
        assert_eq!(conv.unanswered_calls(), vec!["call_b"]);

        let conv = conv.with_tool_result(&b, "boom".into(), true);
        assert!(conv.unanswered_calls().is_empty());
    }
}
