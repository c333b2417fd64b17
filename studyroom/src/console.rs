use once_cell::sync::Lazy;
use regex::Regex;

static NOTE_ADD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/note\s+add\s+(.+?)\s*\|\s*(.+)$").unwrap());
static NOTE_EDIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/note\s+edit\s+(\S+)\s+(.+?)\s*\|\s*(.+)$").unwrap());
static PUSH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/push\s+(.+?)\s*\|\s*(.+)$").unwrap());
static NOTE_RM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/note\s+rm\s+(\S+)\s*$").unwrap());

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Rooms,
    Join(String),
    Leave,
    Who,
    Notes,
    NoteAdd { title: String, content: String },
    NoteEdit { id: String, title: String, content: String },
    NoteRm(String),
    Hide,
    Show,
    /// Simulated push message delivered while the client runs.
    Push { title: String, body: String },
    Login(String),
    Logout,
    Quit,
    /// Chat text.
    Say(String),
    Empty,
    /// Malformed command, with a usage hint.
    Invalid(&'static str),
}

pub const HELP: &str = "\
/rooms                          list rooms and who is online
/join <room>                    enter a room (leaves the current one)
/leave                          back to the lobby
/who                            people in this room
/notes                          notes of this room
/note add <title> | <content>   share a note
/note edit <id> <title> | <content>
/note rm <id>                   delete one of your notes
/hide, /show                    simulate the window losing or gaining focus
/push <title> | <body>          simulate an incoming push message
/login <name>, /logout
/quit
anything else is sent as a chat message";

pub fn parse(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Say(line.to_string());
    }
    if let Some(c) = NOTE_ADD_RE.captures(line) {
        return Command::NoteAdd {
            title: c[1].to_string(),
            content: c[2].to_string(),
        };
    }
    if let Some(c) = NOTE_EDIT_RE.captures(line) {
        return Command::NoteEdit {
            id: c[1].to_string(),
            title: c[2].to_string(),
            content: c[3].to_string(),
        };
    }
    if let Some(c) = NOTE_RM_RE.captures(line) {
        return Command::NoteRm(c[1].to_string());
    }
    if let Some(c) = PUSH_RE.captures(line) {
        return Command::Push {
            title: c[1].to_string(),
            body: c[2].to_string(),
        };
    }
    let mut parts = line.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();
    match (cmd, arg.is_empty()) {
        ("/help", _) => Command::Help,
        ("/rooms", true) => Command::Rooms,
        ("/join", false) => Command::Join(arg.to_string()),
        ("/join", true) => Command::Invalid("usage: /join <room>"),
        ("/leave", true) => Command::Leave,
        ("/who", true) => Command::Who,
        ("/notes", true) => Command::Notes,
        ("/note", _) => Command::Invalid("usage: /note add|edit|rm ..."),
        ("/push", _) => Command::Invalid("usage: /push <title> | <body>"),
        ("/hide", true) => Command::Hide,
        ("/show", true) => Command::Show,
        ("/login", false) => Command::Login(arg.to_string()),
        ("/login", true) => Command::Invalid("usage: /login <name>"),
        ("/logout", true) => Command::Logout,
        ("/quit", true) => Command::Quit,
        _ => Command::Invalid("unknown command, try /help"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(parse("  hello there "), Command::Say("hello there".into()));
        assert_eq!(parse("   "), Command::Empty);
    }

    #[test]
    fn note_commands() {
        assert_eq!(
            parse("/note add Week 3 | Limits and continuity"),
            Command::NoteAdd {
                title: "Week 3".into(),
                content: "Limits and continuity".into()
            }
        );
        assert_eq!(
            parse("/note edit abc123 New title|New body"),
            Command::NoteEdit {
                id: "abc123".into(),
                title: "New title".into(),
                content: "New body".into()
            }
        );
        assert_eq!(parse("/note rm abc123"), Command::NoteRm("abc123".into()));
        assert!(matches!(parse("/note add missing pipe"), Command::Invalid(_)));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("/join math-101"), Command::Join("math-101".into()));
        assert!(matches!(parse("/join"), Command::Invalid(_)));
        assert_eq!(parse("/who"), Command::Who);
        assert_eq!(parse("/quit"), Command::Quit);
        assert_eq!(
            parse("/push Exam | moved to Friday"),
            Command::Push {
                title: "Exam".into(),
                body: "moved to Friday".into()
            }
        );
        assert!(matches!(parse("/dance"), Command::Invalid(_)));
    }
}
