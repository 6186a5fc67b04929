use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub key: &'static str,
    pub description: &'static str,
}

/// What a key press asks the main loop to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    TogglePause,
    ToggleHelp,
}

/// Get all keybindings
pub fn get_all_keybindings() -> Vec<KeyBinding> {
    vec![
        KeyBinding {
            key: "p/Space",
            description: "Pause or resume the display",
        },
        KeyBinding {
            key: "h/?",
            description: "Toggle this help",
        },
        KeyBinding {
            key: "q/Esc/Ctrl+C",
            description: "Quit",
        },
    ]
}

/// Get keybindings for the status bar
pub fn get_status_bar_keybindings() -> Vec<(&'static str, &'static str)> {
    vec![("p", "Pause"), ("h", "Help"), ("q", "Quit")]
}

pub fn action_for(key: &KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Quit);
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char('p') | KeyCode::Char(' ') => Some(Action::TogglePause),
        KeyCode::Char('h') | KeyCode::Char('?') => Some(Action::ToggleHelp),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_actions() {
        assert_eq!(action_for(&key(KeyCode::Char('q'))), Some(Action::Quit));
        assert_eq!(action_for(&key(KeyCode::Esc)), Some(Action::Quit));
        assert_eq!(
            action_for(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Action::Quit)
        );
        assert_eq!(action_for(&key(KeyCode::Char(' '))), Some(Action::TogglePause));
        assert_eq!(action_for(&key(KeyCode::Char('p'))), Some(Action::TogglePause));
        assert_eq!(action_for(&key(KeyCode::Char('?'))), Some(Action::ToggleHelp));
        assert_eq!(action_for(&key(KeyCode::Char('c'))), None);
    }
}
