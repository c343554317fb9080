use crate::charset::{BACKSPACE, CR, ESCAPE, PROMPT};
use crate::port::CharacterPort;

/// Size of the input buffer. A line may hold one byte less than this plus
/// its CR.
pub const LINE_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Escape,
    /// Backspace past the start of the line.
    Backspace,
    Overflow,
    /// The interpreter found no hex where a value was needed.
    Malformed,
}

impl RestartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartReason::Escape => "escape",
            RestartReason::Backspace => "backspace",
            RestartReason::Overflow => "overflow",
            RestartReason::Malformed => "malformed",
        }
    }

    /// Everything except backspacing off the line shows the prompt.
    fn shows_prompt(&self) -> bool {
        !matches!(self, RestartReason::Backspace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditEvent {
    Accepted,
    Restarted(RestartReason),
    /// A CR closed the line; fetch it with [`LineEditor::line`].
    LineComplete,
}

/// Accumulates keystrokes into the input line, echoing each one.
#[derive(Debug, Clone)]
pub struct LineEditor {
    buffer: [u8; LINE_CAPACITY],
    cursor: usize,
    completed: usize,
}

impl LineEditor {
    pub fn new() -> Self {
        Self {
            buffer: [0; LINE_CAPACITY],
            cursor: 0,
            completed: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Text typed so far on the current line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[..self.cursor]
    }

    /// The last completed line, CR included.
    pub fn line(&self) -> &[u8] {
        &self.buffer[..self.completed]
    }

    pub fn accept<P: CharacterPort>(&mut self, key: u8, port: &mut P) -> EditEvent {
        self.buffer[self.cursor] = key;
        port.write_display(key);

        match key {
            CR => {
                self.completed = self.cursor + 1;
                self.cursor = 0;
                EditEvent::LineComplete
            }
            BACKSPACE => {
                if self.cursor == 0 {
                    self.restart(RestartReason::Backspace, port);
                    EditEvent::Restarted(RestartReason::Backspace)
                } else {
                    self.cursor -= 1;
                    EditEvent::Accepted
                }
            }
            ESCAPE => {
                self.restart(RestartReason::Escape, port);
                EditEvent::Restarted(RestartReason::Escape)
            }
            _ => {
                self.cursor += 1;
                if self.cursor >= LINE_CAPACITY {
                    self.restart(RestartReason::Overflow, port);
                    EditEvent::Restarted(RestartReason::Overflow)
                } else {
                    EditEvent::Accepted
                }
            }
        }
    }

    /// Drop the current line and start a fresh one.
    pub fn restart<P: CharacterPort>(&mut self, reason: RestartReason, port: &mut P) {
        if reason.shows_prompt() {
            port.write_display(PROMPT);
        }
        self.new_line(port);
    }

    /// Move the display to a new line and empty the buffer.
    pub fn new_line<P: CharacterPort>(&mut self, port: &mut P) {
        port.write_display(CR);
        self.cursor = 0;
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::encode_keys;
    use crate::port::ScriptedPort;

    fn type_keys(editor: &mut LineEditor, port: &mut ScriptedPort, keys: &[u8]) -> Vec<EditEvent> {
        keys.iter().map(|&k| editor.accept(k, port)).collect()
    }

    #[test]
    fn test_every_key_is_echoed_once() {
        let mut editor = LineEditor::new();
        let mut port = ScriptedPort::new();
        let keys = encode_keys("0300\n");
        let events = type_keys(&mut editor, &mut port, &keys);

        assert_eq!(port.output(), keys.as_slice());
        assert_eq!(events.last(), Some(&EditEvent::LineComplete));
        assert_eq!(editor.line(), keys.as_slice());
        assert_eq!(editor.cursor(), 0);
    }

    #[test]
    fn test_backspace_replaces_previous_key() {
        let mut editor = LineEditor::new();
        let mut port = ScriptedPort::new();
        let mut keys = encode_keys("12");
        keys.push(BACKSPACE);
        keys.extend(encode_keys("3\n"));
        type_keys(&mut editor, &mut port, &keys);

        assert_eq!(editor.line(), encode_keys("13\n").as_slice());
        // The backspace itself was still echoed.
        assert_eq!(port.output_text(), "12_3\n");
    }

    #[test]
    fn test_backspace_on_empty_line_restarts_without_prompt() {
        let mut editor = LineEditor::new();
        let mut port = ScriptedPort::new();
        let event = editor.accept(BACKSPACE, &mut port);

        assert_eq!(event, EditEvent::Restarted(RestartReason::Backspace));
        assert_eq!(port.output(), &[BACKSPACE, CR]);
        assert_eq!(editor.cursor(), 0);
    }

    #[test]
    fn test_escape_restarts_with_prompt() {
        let mut editor = LineEditor::new();
        let mut port = ScriptedPort::new();
        type_keys(&mut editor, &mut port, &encode_keys("12"));
        let event = editor.accept(ESCAPE, &mut port);

        assert_eq!(event, EditEvent::Restarted(RestartReason::Escape));
        assert_eq!(editor.cursor(), 0);
        assert!(port.output().ends_with(&[ESCAPE, PROMPT, CR]));
    }

    #[test]
    fn test_overflow_behaves_like_escape() {
        let mut editor = LineEditor::new();
        let mut port = ScriptedPort::new();
        let keys = vec![b'1' | 0x80; LINE_CAPACITY - 1];
        let events = type_keys(&mut editor, &mut port, &keys);
        assert!(events.iter().all(|e| *e == EditEvent::Accepted));
        assert_eq!(editor.cursor(), LINE_CAPACITY - 1);

        // The longest line still fits its CR.
        let mut full = editor.clone();
        assert_eq!(full.accept(CR, &mut port), EditEvent::LineComplete);
        assert_eq!(full.line().len(), LINE_CAPACITY);

        let event = editor.accept(b'1' | 0x80, &mut port);
        assert_eq!(event, EditEvent::Restarted(RestartReason::Overflow));
        assert_eq!(editor.cursor(), 0);
        assert!(port.output().ends_with(&[PROMPT, CR]));
    }
}
