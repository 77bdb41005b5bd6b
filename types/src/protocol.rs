use crate::audio::Base64EncodedAudioBytes;
use crate::message::ChatMessage;

/// Records this side writes to the channel.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    AudioInput { data: Base64EncodedAudioBytes },
    UserMessage { message: ChatMessage },
    Pong,
}

impl OutboundMessage {
    pub fn audio_input(data: Base64EncodedAudioBytes) -> Self {
        OutboundMessage::AudioInput { data }
    }

    pub fn user_message(message: ChatMessage) -> Self {
        OutboundMessage::UserMessage { message }
    }
}

/// Records the agent writes back. Tags outside this set fail to parse and
/// are dropped by the channel, never surfaced as session failures.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    TextResponse { text: String },
    Ping,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn serialize_outbound() {
        let msg = OutboundMessage::audio_input("UklGRg==".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"audio_input","data":"UklGRg=="}"#);

        let msg = OutboundMessage::user_message(ChatMessage::user("hello"));
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"user_message","message":{"role":"user","content":"hello"}}"#
        );

        let json = serde_json::to_string(&OutboundMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn deserialize_inbound() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"text_response","text":"hi there"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::TextResponse {
                text: "hi there".to_string()
            }
        );

        let msg: InboundMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Ping);

        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"error","message":"overloaded"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Error {
                message: "overloaded".to_string()
            }
        );
    }

    #[test]
    fn unknown_tag_is_a_parse_error() {
        let res = serde_json::from_str::<InboundMessage>(r#"{"type":"telemetry","data":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn chat_message_roles() {
        let msg = ChatMessage::system("greet the user");
        assert_eq!(msg.role(), Role::System);
        assert_eq!(msg.content(), "greet the user");
    }
}
