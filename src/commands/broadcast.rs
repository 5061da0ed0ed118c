use crate::client::broadcast::Broadcaster;
use crate::media::audio;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastCommand {
    Key(String),
    Start,
    Stop,
    Devices,
    Help,
    Quit,
}

pub fn parse(line: &str) -> Result<Option<BroadcastCommand>, String> {
    let Some((verb, rest)) = super::split(line) else {
        return Ok(None);
    };
    let command = match verb.as_str() {
        "key" if !rest.is_empty() => BroadcastCommand::Key(rest.to_string()),
        "key" => return Err("usage: key <stream key>".to_string()),
        "start" | "live" => BroadcastCommand::Start,
        "stop" => BroadcastCommand::Stop,
        "devices" => BroadcastCommand::Devices,
        "help" | "?" => BroadcastCommand::Help,
        "quit" | "exit" | "q" => BroadcastCommand::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

/// Change the stream key. Refused while a broadcast is running.
pub fn set_key(broadcaster: &mut Broadcaster, key: &str) -> Result<(), String> {
    broadcaster
        .set_key(key)
        .map_err(|e| format!("Failed to set key: {}", e))
}

pub fn start(broadcaster: &mut Broadcaster) -> Result<(), String> {
    broadcaster.start().map_err(|e| e.to_string())
}

pub async fn stop(broadcaster: &mut Broadcaster) {
    broadcaster.stop().await;
}

/// Input devices, default first.
pub fn list_devices() -> Vec<String> {
    audio::list_input_devices()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broadcast_commands() {
        assert_eq!(
            parse("key web_abc123"),
            Ok(Some(BroadcastCommand::Key("web_abc123".into())))
        );
        assert_eq!(parse("START"), Ok(Some(BroadcastCommand::Start)));
        assert_eq!(parse("stop"), Ok(Some(BroadcastCommand::Stop)));
        assert_eq!(parse("devices"), Ok(Some(BroadcastCommand::Devices)));
        assert!(parse("key").is_err());
        assert!(parse("record").is_err());
    }
}
