//! Embedded page-context JavaScript.
//!
//! Keeping the picker overlay in its own `.js` file gives editors proper
//! syntax highlighting while still bundling it as a string at compile time.

/// Overlay script backing the interactive `pick` command.
pub const PICKER_SCRIPT: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/picker.js"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_script_is_non_empty() {
        assert!(!PICKER_SCRIPT.trim().is_empty());
    }

    #[test]
    fn embedded_script_installs_the_picker_entry_point() {
        assert!(
            PICKER_SCRIPT.contains("window.__browserToolsPick"),
            "picker script should install its page-side entry point"
        );
    }
}
