//! Rebuild the live event sequence of an active session

use super::session::StreamSession;
use crate::events::StreamEvent;
use cmux_session::MessagePart;

impl StreamSession {
    /// Events a subscriber would have seen had it been attached since
    /// `stream-start`: one event per accumulated part, in part order.
    pub fn replay(&self) -> Vec<StreamEvent> {
        let message_id = self.message_id.clone();
        let parts = self.parts();

        let mut events = Vec::with_capacity(parts.len() + 1);
        events.push(StreamEvent::StreamStart {
            message_id: message_id.clone(),
            model: self.model.clone(),
            history_sequence: self.history_sequence,
        });

        for part in parts {
            match part {
                MessagePart::Text { text } => events.push(StreamEvent::StreamDelta {
                    message_id: message_id.clone(),
                    delta: text,
                }),
                MessagePart::Reasoning { text } => events.push(StreamEvent::ReasoningDelta {
                    message_id: message_id.clone(),
                    delta: text,
                }),
                MessagePart::DynamicTool {
                    tool_call_id,
                    tool_name,
                    input,
                    output,
                    ..
                } => {
                    events.push(StreamEvent::ToolCallStart {
                        message_id: message_id.clone(),
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                        args: input,
                    });
                    if let Some(result) = output {
                        events.push(StreamEvent::ToolCallEnd {
                            message_id: message_id.clone(),
                            tool_call_id,
                            tool_name,
                            result,
                        });
                    }
                }
            }
        }

        events
    }
}
