use crate::client::player::Player;
use crate::client::poller::ViewerState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    List,
    Watch(String),
    Close,
    Help,
    Quit,
}

pub fn parse(line: &str) -> Result<Option<ViewerCommand>, String> {
    let Some((verb, rest)) = super::split(line) else {
        return Ok(None);
    };
    let command = match verb.as_str() {
        "list" | "ls" => ViewerCommand::List,
        "watch" | "play" if !rest.is_empty() => ViewerCommand::Watch(rest.to_string()),
        "watch" | "play" => return Err("usage: watch <stream name>".to_string()),
        "close" | "stop" => ViewerCommand::Close,
        "help" | "?" => ViewerCommand::Help,
        "quit" | "exit" | "q" => ViewerCommand::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

/// Select a live stream and start playing it.
pub async fn watch(state: &mut ViewerState, player: &mut Player, name: &str) -> Result<(), String> {
    let stream = state
        .select(name)
        .cloned()
        .ok_or_else(|| format!("{} is not live", name))?;
    player.play(stream).await;
    Ok(())
}

/// Clear the selection and release the playback session.
pub async fn close(state: &mut ViewerState, player: &mut Player) {
    state.close();
    player.stop().await;
}
