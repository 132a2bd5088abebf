//! Interactive console commands.
//!
//! A line starting with `/` is a command; anything else is a chat message.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Call(String),
    Accept(String),
    Reject(String),
    HangUp(String),
    Peers,
    Calls,
    Help,
    Quit,
    Chat(String),
    /// Unusable input, with a hint for the user
    Invalid(String),
}

pub const HELP: &str = "\
/call <peer-id>     call a peer
/accept <peer-id>   accept an incoming call
/reject <peer-id>   reject an incoming call
/hangup <peer-id>   end a call
/peers              list peers in the lobby
/calls              list calls
/quit               leave the lobby
anything else       chat";

/// `None` for blank lines
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Chat(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::to_string);
    let with_peer = |make: fn(String) -> Command| match &arg {
        Some(peer_id) => make(peer_id.clone()),
        None => Command::Invalid(format!("/{name} needs a peer id")),
    };

    let cmd = match name {
        "call" => with_peer(Command::Call),
        "accept" => with_peer(Command::Accept),
        "reject" => with_peer(Command::Reject),
        "hangup" => with_peer(Command::HangUp),
        "peers" => Command::Peers,
        "calls" => Command::Calls,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command /{other}, try /help")),
    };
    Some(cmd)
}
