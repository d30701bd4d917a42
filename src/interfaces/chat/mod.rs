//! Line-oriented chat surface: turns message text into engine input and
//! replies back into text.

pub mod console;
pub mod texts;

pub use console::Console;
pub use texts::render;

use crate::application::turn::Input;

/// Prefix marking an uploaded photo or document in a console line.
pub const ATTACHMENT_PREFIX: &str = "attach:";

/// Parses one inbound message.
///
/// Commands are matched exactly and case-sensitively. Control words (`back`,
/// `skip`, `confirm`, `edit`, `paid`) stand in for the chat buttons.
pub fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("/start") {
        if rest.is_empty() {
            return Input::Start(None);
        }
        if rest.starts_with(char::is_whitespace) {
            return Input::Start(Some(rest.trim().to_string()));
        }
    }
    match line {
        "/cancel" => return Input::Cancel,
        "/status" => return Input::Status,
        "/lang" => return Input::ToggleLanguage,
        "/help" => return Input::Help,
        _ => {}
    }
    if let Some(reference) = line.strip_prefix(ATTACHMENT_PREFIX)
        && !reference.trim().is_empty()
    {
        return Input::Attachment(reference.trim().to_string());
    }
    match line.to_lowercase().as_str() {
        "back" | "назад" => Input::Back,
        "skip" | "пропустить" => Input::Skip,
        "confirm" | "подтвердить" => Input::Confirm,
        "edit" | "изменить" => Input::Edit,
        "paid" | "оплатил" => Input::Paid,
        _ => Input::Text(line.to_string()),
    }
}
