//! Inbound command protocol
//!
//! Commands arrive as `{"command_name": "...", "paras": {...}}` on a topic under
//! `<root>/sys/commands/`. The name is decoded once, here, into a closed set of
//! [`ActuatorRequest`]s; nothing downstream matches on raw strings.

use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker preceding the correlation id in a command topic
pub const REQUEST_ID_MARKER: &str = "request_id=";

/// Rainbow frame delay when the command does not say
pub const DEFAULT_RAINBOW_SPEED_MS: u16 = 20;

/// Fixed acknowledgement body
pub const SUCCESS_BODY: &str =
    r#"{"result_code":0,"response_name":"COMMAND_RESPONSE","paras":{"result":"success"}}"#;

/// Topic templates derived from the per-device root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub report: String,
    pub commands: String,
    pub downstream: String,
    pub response: String,
}

impl Topics {
    pub fn new(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            report: format!("{root}/sys/properties/report"),
            commands: format!("{root}/sys/commands/"),
            downstream: format!("{root}/sys/messages/down"),
            response: format!("{root}/sys/commands/response/{REQUEST_ID_MARKER}"),
        }
    }

    /// Subscription filter covering every command topic
    pub fn command_filter(&self) -> String {
        format!("{}#", self.commands)
    }

    pub fn response_topic(&self, correlation_id: Option<&str>) -> String {
        format!("{}{}", self.response, correlation_id.unwrap_or_default())
    }

    pub fn is_command(&self, topic: &str) -> bool {
        topic.starts_with(&self.commands) && !self.is_response(topic)
    }

    /// Our own acknowledgements share the command prefix
    pub fn is_response(&self, topic: &str) -> bool {
        topic.starts_with(self.response.trim_end_matches(REQUEST_ID_MARKER))
    }

    pub fn is_downstream(&self, topic: &str) -> bool {
        topic == self.downstream
    }
}

/// Everything after `request_id=` in the topic, verbatim
pub fn correlation_id(topic: &str) -> Option<&str> {
    topic
        .find(REQUEST_ID_MARKER)
        .map(|at| &topic[at + REQUEST_ID_MARKER.len()..])
}

/// A decoded command message, consumed by one dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCommand {
    pub topic: String,
    pub command_name: Option<String>,
    pub params: Map<String, Value>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    command_name: Option<String>,
    #[serde(default)]
    paras: Option<Map<String, Value>>,
}

impl InboundCommand {
    /// Parses the JSON body; any parse failure rejects the whole message
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        let body: CommandBody = serde_json::from_slice(payload)?;
        Ok(Self {
            topic: topic.to_string(),
            command_name: body.command_name,
            params: body.paras.unwrap_or_default(),
            correlation_id: correlation_id(topic).map(str::to_string),
        })
    }

    pub fn kind(&self) -> CommandKind {
        match self.command_name.as_deref() {
            Some(name) => CommandKind::from_name(name),
            None => CommandKind::Missing,
        }
    }

    /// Turns the command into the single request it asks for
    pub fn decode(&self) -> Result<ActuatorRequest, CommandError> {
        let params = Params(&self.params);
        match self.kind() {
            CommandKind::Rgb => decode_rgb(params),
            CommandKind::Alarm => Ok(decode_alarm(params)),
            CommandKind::PlaySong => decode_play_song(params),
            CommandKind::Unknown(name) => Err(CommandError::Unknown(name)),
            CommandKind::Missing => Err(CommandError::MissingName),
        }
    }
}

/// Closed set of command names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Rgb,
    Alarm,
    PlaySong,
    Unknown(String),
    Missing,
}

impl CommandKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "RGB" => CommandKind::Rgb,
            "Alarm" => CommandKind::Alarm,
            "play_song" => CommandKind::PlaySong,
            other => CommandKind::Unknown(other.to_string()),
        }
    }
}

/// How a song request takes over the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackMode {
    /// Full player view
    Foreground,
    /// Lightweight player view
    Lite,
    /// No UI change
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActuatorRequest {
    LedSingle { index: usize, r: u8, g: u8, b: u8 },
    LedAll { r: u8, g: u8, b: u8 },
    LedRainbow { speed: u16 },
    LedOff,
    AlarmUpsert { slot: usize, hour: u8, minute: u8, day_mask: u8, enabled: bool },
    PlaySong { index: usize, mode: PlaybackMode },
}

/// Maps `Sunday`..`Saturday` to bits 0..6
pub fn day_mask(day: &str) -> u8 {
    const DAYS: [&str; 7] = [
        "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
    ];
    DAYS.iter()
        .position(|d| *d == day)
        .map(|bit| 1u8 << bit)
        .unwrap_or(0)
}

struct Params<'a>(&'a Map<String, Value>);

impl Params<'_> {
    fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f as i64))
        })
    }

    /// Colour channel, clamped; missing means 0
    fn channel(&self, key: &str) -> u8 {
        self.int(key).unwrap_or(0).clamp(0, u8::MAX as i64) as u8
    }

    fn index(&self, key: &str) -> usize {
        self.int(key).unwrap_or(0).max(0) as usize
    }

    fn bool(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
            _ => false,
        }
    }
}

fn decode_rgb(params: Params<'_>) -> Result<ActuatorRequest, CommandError> {
    let invalid = |reason: String| CommandError::InvalidParams { command: "RGB", reason };

    match params.str("mode") {
        Some("single") => Ok(ActuatorRequest::LedSingle {
            index: params.index("index"),
            r: params.channel("Red"),
            g: params.channel("Green"),
            b: params.channel("Blue"),
        }),
        Some("all") => Ok(ActuatorRequest::LedAll {
            r: params.channel("Red"),
            g: params.channel("Green"),
            b: params.channel("Blue"),
        }),
        Some("rainbow") => {
            let speed = params
                .int("speed")
                .map(|s| s.clamp(1, u16::MAX as i64) as u16)
                .unwrap_or(DEFAULT_RAINBOW_SPEED_MS);
            Ok(ActuatorRequest::LedRainbow { speed })
        }
        Some("off") => Ok(ActuatorRequest::LedOff),
        Some(other) => Err(invalid(format!("unknown mode {other:?}"))),
        None => Err(invalid("missing mode".to_string())),
    }
}

fn decode_alarm(params: Params<'_>) -> ActuatorRequest {
    ActuatorRequest::AlarmUpsert {
        slot: 0,
        hour: params.int("Hour").unwrap_or(0).clamp(0, u8::MAX as i64) as u8,
        minute: params.int("Minute").unwrap_or(0).clamp(0, u8::MAX as i64) as u8,
        day_mask: params.str("Week").map(day_mask).unwrap_or(0),
        enabled: params.bool("On"),
    }
}

fn decode_play_song(params: Params<'_>) -> Result<ActuatorRequest, CommandError> {
    let mode = match params.str("UI") {
        Some("Full") => PlaybackMode::Foreground,
        Some("Lite") => PlaybackMode::Lite,
        Some("No") => PlaybackMode::Background,
        other => {
            return Err(CommandError::InvalidParams {
                command: "play_song",
                reason: format!("unknown UI mode {other:?}"),
            })
        }
    };
    Ok(ActuatorRequest::PlaySong {
        index: params.index("Song_index"),
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "root";

    fn command(payload: &str) -> InboundCommand {
        InboundCommand::parse("root/sys/commands/request_id=abc", payload.as_bytes()).unwrap()
    }

    #[test]
    fn test_topic_templates() {
        let topics = Topics::new(ROOT);
        assert_eq!(topics.report, "root/sys/properties/report");
        assert_eq!(topics.commands, "root/sys/commands/");
        assert_eq!(topics.command_filter(), "root/sys/commands/#");
        assert_eq!(topics.downstream, "root/sys/messages/down");
        assert_eq!(
            topics.response_topic(Some("XYZ123")),
            "root/sys/commands/response/request_id=XYZ123"
        );
    }

    #[test]
    fn test_topic_classification() {
        let topics = Topics::new(ROOT);
        assert!(topics.is_command("root/sys/commands/foo/request_id=1"));
        assert!(!topics.is_command("root/sys/commands/response/request_id=1"));
        assert!(topics.is_response("root/sys/commands/response/request_id=1"));
        assert!(topics.is_downstream("root/sys/messages/down"));
        assert!(!topics.is_command("other/sys/commands/x"));
    }

    #[test]
    fn test_correlation_id_is_verbatim_tail() {
        assert_eq!(correlation_id("a/b/request_id=XYZ123"), Some("XYZ123"));
        assert_eq!(correlation_id("a/request_id=x/y=z"), Some("x/y=z"));
        assert_eq!(correlation_id("a/request_id="), Some(""));
        assert_eq!(correlation_id("a/b"), None);
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(InboundCommand::parse("t", b"{not json").is_err());
        assert!(InboundCommand::parse("t", b"[1,2]").is_err());
    }

    #[test]
    fn test_rgb_all() {
        let cmd = command(r#"{"command_name":"RGB","paras":{"mode":"all","Red":10,"Green":20,"Blue":30}}"#);
        assert_eq!(cmd.decode(), Ok(ActuatorRequest::LedAll { r: 10, g: 20, b: 30 }));
    }

    #[test]
    fn test_rgb_single_clamps_channels() {
        let cmd = command(
            r#"{"command_name":"RGB","paras":{"mode":"single","index":3,"Red":300,"Green":-5}}"#,
        );
        assert_eq!(
            cmd.decode(),
            Ok(ActuatorRequest::LedSingle { index: 3, r: 255, g: 0, b: 0 })
        );
    }

    #[test]
    fn test_rainbow_speed_defaults() {
        let cmd = command(r#"{"command_name":"RGB","paras":{"mode":"rainbow"}}"#);
        assert_eq!(
            cmd.decode(),
            Ok(ActuatorRequest::LedRainbow { speed: DEFAULT_RAINBOW_SPEED_MS })
        );

        let cmd = command(r#"{"command_name":"RGB","paras":{"mode":"rainbow","speed":5}}"#);
        assert_eq!(cmd.decode(), Ok(ActuatorRequest::LedRainbow { speed: 5 }));
    }

    #[test]
    fn test_rgb_bad_mode_is_invalid() {
        let cmd = command(r#"{"command_name":"RGB","paras":{"mode":"strobe"}}"#);
        assert!(matches!(cmd.decode(), Err(CommandError::InvalidParams { command: "RGB", .. })));

        let cmd = command(r#"{"command_name":"RGB"}"#);
        assert!(matches!(cmd.decode(), Err(CommandError::InvalidParams { .. })));
    }

    #[test]
    fn test_alarm_upsert() {
        let cmd = command(
            r#"{"command_name":"Alarm","paras":{"Hour":7,"Minute":30,"Week":"Monday","On":true}}"#,
        );
        assert_eq!(
            cmd.decode(),
            Ok(ActuatorRequest::AlarmUpsert { slot: 0, hour: 7, minute: 30, day_mask: 0b10, enabled: true })
        );
    }

    #[test]
    fn test_day_mask() {
        assert_eq!(day_mask("Sunday"), 1);
        assert_eq!(day_mask("Saturday"), 1 << 6);
        assert_eq!(day_mask("Someday"), 0);
    }

    #[test]
    fn test_play_song_modes() {
        for (ui, mode) in [
            ("Full", PlaybackMode::Foreground),
            ("Lite", PlaybackMode::Lite),
            ("No", PlaybackMode::Background),
        ] {
            let cmd = command(&format!(
                r#"{{"command_name":"play_song","paras":{{"Song_index":4,"UI":"{ui}"}}}}"#
            ));
            assert_eq!(cmd.decode(), Ok(ActuatorRequest::PlaySong { index: 4, mode }));
        }

        let cmd = command(r#"{"command_name":"play_song","paras":{"Song_index":4}}"#);
        assert!(cmd.decode().is_err());
    }

    #[test]
    fn test_unknown_and_missing_names() {
        let cmd = command(r#"{"command_name":"Bogus","paras":{}}"#);
        assert_eq!(cmd.kind(), CommandKind::Unknown("Bogus".to_string()));
        assert_eq!(cmd.decode(), Err(CommandError::Unknown("Bogus".to_string())));

        let cmd = command(r#"{"paras":{}}"#);
        assert_eq!(cmd.decode(), Err(CommandError::MissingName));
    }
}
