//! Key, mouse and paste encoding into the bytes a shell expects.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

use crate::protocol::{MouseMode, TerminalState};

/// Terminal modes that change how local input is encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputModes {
    pub application_cursor_keys: bool,
    pub bracketed_paste: bool,
    pub mouse_mode: MouseMode,
    pub sgr_mouse: bool,
}

impl From<&TerminalState> for InputModes {
    fn from(state: &TerminalState) -> Self {
        Self {
            application_cursor_keys: state.application_cursor_keys,
            bracketed_paste: state.bracketed_paste,
            mouse_mode: state.mouse_mode,
            sgr_mouse: state.sgr_mouse,
        }
    }
}

pub fn encode_key(key: &KeyEvent, modes: &InputModes) -> Option<Vec<u8>> {
    let cursor = |code: u8| {
        if modes.application_cursor_keys {
            vec![0x1b, b'O', code]
        } else {
            vec![0x1b, b'[', code]
        }
    };
    match key.code {
        KeyCode::Char(c) => {
            let mut bytes = Vec::new();
            if key.modifiers.contains(KeyModifiers::ALT) {
                bytes.push(0x1b);
            }
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                let lower = c.to_ascii_lowercase();
                if !lower.is_ascii_lowercase() {
                    return None;
                }
                bytes.push(lower as u8 - b'a' + 1);
            } else {
                let mut utf8 = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
            Some(bytes)
        }
        KeyCode::Enter => Some(vec![b'\r']),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => Some(cursor(b'A')),
        KeyCode::Down => Some(cursor(b'B')),
        KeyCode::Right => Some(cursor(b'C')),
        KeyCode::Left => Some(cursor(b'D')),
        KeyCode::Home => Some(cursor(b'H')),
        KeyCode::End => Some(cursor(b'F')),
        KeyCode::PageUp => Some(b"\x1b[5~".to_vec()),
        KeyCode::PageDown => Some(b"\x1b[6~".to_vec()),
        KeyCode::Delete => Some(b"\x1b[3~".to_vec()),
        KeyCode::Insert => Some(b"\x1b[2~".to_vec()),
        _ => None,
    }
}

/// Pasted text, wrapped in bracketed-paste markers when the shell asked for them.
pub fn encode_paste(text: &str, modes: &InputModes) -> Vec<u8> {
    if !modes.bracketed_paste {
        return text.as_bytes().to_vec();
    }
    let mut bytes = Vec::with_capacity(text.len() + 12);
    bytes.extend_from_slice(b"\x1b[200~");
    bytes.extend_from_slice(text.as_bytes());
    bytes.extend_from_slice(b"\x1b[201~");
    bytes
}

/// SGR mouse report, or `None` when the program has not requested this kind
/// of mouse event.
pub fn encode_mouse(mouse: &MouseEvent, modes: &InputModes) -> Option<Vec<u8>> {
    if !modes.sgr_mouse || !mouse_mode_reports(modes.mouse_mode, mouse.kind) {
        return None;
    }
    let (mut code, suffix) = match mouse.kind {
        MouseEventKind::Down(button) => (mouse_button_code(button), 'M'),
        MouseEventKind::Up(button) => (mouse_button_code(button), 'm'),
        MouseEventKind::Drag(button) => (mouse_button_code(button) + 32, 'M'),
        MouseEventKind::Moved => (35, 'M'),
        MouseEventKind::ScrollUp => (64, 'M'),
        MouseEventKind::ScrollDown => (65, 'M'),
        _ => return None,
    };

    if mouse.modifiers.contains(KeyModifiers::SHIFT) {
        code += 4;
    }
    if mouse.modifiers.contains(KeyModifiers::ALT) {
        code += 8;
    }
    if mouse.modifiers.contains(KeyModifiers::CONTROL) {
        code += 16;
    }

    let column = mouse.column.saturating_add(1);
    let row = mouse.row.saturating_add(1);
    Some(format!("\u{1b}[<{code};{column};{row}{suffix}").into_bytes())
}

fn mouse_mode_reports(mode: MouseMode, kind: MouseEventKind) -> bool {
    match kind {
        MouseEventKind::Down(_) | MouseEventKind::ScrollUp | MouseEventKind::ScrollDown => {
            mode != MouseMode::None
        }
        MouseEventKind::Up(_) => {
            matches!(mode, MouseMode::PressRelease | MouseMode::Drag | MouseMode::Motion)
        }
        MouseEventKind::Drag(_) => matches!(mode, MouseMode::Drag | MouseMode::Motion),
        MouseEventKind::Moved => mode == MouseMode::Motion,
        _ => false,
    }
}

fn mouse_button_code(button: MouseButton) -> u16 {
    match button {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn control_and_alt_chords() {
        let modes = InputModes::default();
        assert_eq!(
            encode_key(&key(KeyCode::Char('c'), KeyModifiers::CONTROL), &modes),
            Some(vec![0x03])
        );
        assert_eq!(
            encode_key(&key(KeyCode::Char('b'), KeyModifiers::ALT), &modes),
            Some(vec![0x1b, b'b'])
        );
        assert_eq!(
            encode_key(&key(KeyCode::Char('1'), KeyModifiers::CONTROL), &modes),
            None
        );
        assert_eq!(
            encode_key(&key(KeyCode::Char('é'), KeyModifiers::NONE), &modes),
            Some("é".as_bytes().to_vec())
        );
    }

    #[test]
    fn cursor_keys_follow_application_mode() {
        let mut modes = InputModes::default();
        let up = key(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(encode_key(&up, &modes), Some(b"\x1b[A".to_vec()));
        modes.application_cursor_keys = true;
        assert_eq!(encode_key(&up, &modes), Some(b"\x1bOA".to_vec()));
        assert_eq!(
            encode_key(&key(KeyCode::Enter, KeyModifiers::NONE), &modes),
            Some(vec![b'\r'])
        );
    }

    #[test]
    fn paste_is_bracketed_on_request() {
        let mut modes = InputModes::default();
        assert_eq!(encode_paste("ls", &modes), b"ls".to_vec());
        modes.bracketed_paste = true;
        assert_eq!(encode_paste("ls", &modes), b"\x1b[200~ls\x1b[201~".to_vec());
    }

    #[test]
    fn mouse_reports_respect_mode() {
        let click = MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 4,
            row: 1,
            modifiers: KeyModifiers::NONE,
        };
        let moved = MouseEvent {
            kind: MouseEventKind::Moved,
            ..click
        };
        let mut modes = InputModes {
            sgr_mouse: true,
            mouse_mode: MouseMode::Press,
            ..InputModes::default()
        };
        assert_eq!(encode_mouse(&click, &modes), Some(b"\x1b[<0;5;2M".to_vec()));
        assert_eq!(encode_mouse(&moved, &modes), None);

        modes.mouse_mode = MouseMode::Motion;
        assert_eq!(encode_mouse(&moved, &modes), Some(b"\x1b[<35;5;2M".to_vec()));

        modes.sgr_mouse = false;
        assert_eq!(encode_mouse(&click, &modes), None);
    }
}
