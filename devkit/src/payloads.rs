/*!
Command and telegram builders

Produces the exact bodies the cloud and the host feeder send, so tests do not
hand-write JSON.
*/

use deskclock_link::command::{Topics, REQUEST_ID_MARKER};
use serde_json::{json, Value};

/// Builds command topics and bodies for one device root
pub struct CommandBuilder {
    topics: Topics,
}

impl CommandBuilder {
    pub fn new(root: &str) -> Self {
        Self {
            topics: Topics::new(root),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// `<root>/sys/commands/request_id=<id>`
    pub fn command_topic(&self, request_id: &str) -> String {
        format!("{}{}{}", self.topics.commands, REQUEST_ID_MARKER, request_id)
    }

    pub fn response_topic(&self, request_id: &str) -> String {
        self.topics.response_topic(Some(request_id))
    }

    pub fn command(command_name: &str, paras: Value) -> Value {
        json!({
            "command_name": command_name,
            "paras": paras
        })
    }

    pub fn rgb_single(index: usize, red: u8, green: u8, blue: u8) -> Value {
        Self::command(
            "RGB",
            json!({ "mode": "single", "index": index, "Red": red, "Green": green, "Blue": blue }),
        )
    }

    pub fn rgb_all(red: u8, green: u8, blue: u8) -> Value {
        Self::command(
            "RGB",
            json!({ "mode": "all", "Red": red, "Green": green, "Blue": blue }),
        )
    }

    pub fn rainbow(speed: Option<u16>) -> Value {
        match speed {
            Some(speed) => Self::command("RGB", json!({ "mode": "rainbow", "speed": speed })),
            None => Self::command("RGB", json!({ "mode": "rainbow" })),
        }
    }

    pub fn rgb_off() -> Value {
        Self::command("RGB", json!({ "mode": "off" }))
    }

    pub fn alarm(hour: u8, minute: u8, week: &str, on: bool) -> Value {
        Self::command(
            "Alarm",
            json!({ "Hour": hour, "Minute": minute, "Week": week, "On": on }),
        )
    }

    /// `ui` is one of `Full`, `Lite`, `No`
    pub fn play_song(index: usize, ui: &str) -> Value {
        Self::command("play_song", json!({ "Song_index": index, "UI": ui }))
    }
}

/// One host telegram line; the GPU segment is left out when unknown
pub fn telegram(cpu_load: i32, gpu: Option<(i32, i32)>, ram_load: f32) -> String {
    match gpu {
        Some((temp, load)) => format!("CCc {} G{}c{} RL{}\n", cpu_load, temp, load, ram_load),
        None => format!("CCc {} RL{}\n", cpu_load, ram_load),
    }
}
