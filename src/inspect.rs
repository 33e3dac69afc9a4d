//! Page inspection: HTML dumps, ad-hoc JavaScript, screenshots, and tab
//! management.

use std::path::{Path, PathBuf};

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use log::debug;
use serde_json::Value as JsonValue;

use crate::actions::ToolError;
use crate::connection::BrowserHandle;

/// Full serialized HTML of the current page.
pub async fn page_html(page: &Page) -> Result<String, ToolError> {
    Ok(page.content().await?)
}

/// A needle match inside the HTML with its surrounding lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMatch {
    /// 1-based line number of the matching line.
    pub line_number: usize,
    /// 1-based line number of the first context line.
    pub start: usize,
    pub lines: Vec<String>,
}

impl ContextMatch {
    pub fn format(&self) -> String {
        let mut out = format!("--- Match at line {} ---\n", self.line_number);
        for (offset, line) in self.lines.iter().enumerate() {
            let number = self.start + offset;
            let prefix = if number == self.line_number {
                ">>> "
            } else {
                "    "
            };
            out.push_str(&format!("{prefix}{number}: {line}\n"));
        }
        out
    }
}

/// Find every line containing `needle` and collect `context_lines` lines of
/// context on each side.
pub fn find_context(html: &str, needle: &str, context_lines: usize) -> Vec<ContextMatch> {
    let lines: Vec<&str> = html.split('\n').collect();
    let mut matches = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if line.contains(needle) {
            let start = index.saturating_sub(context_lines);
            let end = (index + context_lines + 1).min(lines.len());
            matches.push(ContextMatch {
                line_number: index + 1,
                start: start + 1,
                lines: lines[start..end].iter().map(|l| l.to_string()).collect(),
            });
        }
    }
    matches
}

/// Resolve the `evaluate` argument: a path to a `.js` file is read, anything
/// else is treated as inline code.
pub fn evaluate_source(argument: &str) -> Result<String, ToolError> {
    let path = Path::new(argument);
    if path.is_file() {
        Ok(std::fs::read_to_string(path)?)
    } else {
        Ok(argument.to_string())
    }
}

/// Run JavaScript in the page and return its JSON result, if any. Promises
/// are awaited before the value comes back.
pub async fn evaluate(page: &Page, source: &str) -> Result<Option<JsonValue>, ToolError> {
    let result = page.evaluate(source).await?;
    Ok(result.value().cloned())
}

/// Capture a PNG screenshot of the visible viewport, defaulting to a
/// timestamped file in the system temp directory.
pub async fn screenshot(page: &Page, output: Option<PathBuf>) -> Result<PathBuf, ToolError> {
    let path = output.unwrap_or_else(default_screenshot_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let params = ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .build();
    page.save_screenshot(params, &path).await?;
    debug!("screenshot written to {}", path.display());
    Ok(path)
}

fn default_screenshot_path() -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    std::env::temp_dir().join(format!("screenshot_{timestamp}.png"))
}

/// One open tab, in Chrome's target order.
#[derive(Debug, Clone)]
pub struct TabInfo {
    pub index: usize,
    pub title: String,
    pub url: String,
}

/// List every open tab with its title and URL.
pub async fn list_tabs(handle: &BrowserHandle) -> Result<Vec<TabInfo>, ToolError> {
    let pages = handle.pages().await?;
    let mut tabs = Vec::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        tabs.push(TabInfo {
            index,
            title: page.get_title().await?.unwrap_or_default(),
            url: page.url().await?.unwrap_or_default(),
        });
    }
    Ok(tabs)
}

/// Bring the tab at `index` to the front. Returns its URL.
pub async fn switch_tab(handle: &BrowserHandle, index: usize) -> Result<String, ToolError> {
    let pages = handle.pages().await?;
    let page = pick_tab(&pages, index)?;
    page.bring_to_front().await?;
    Ok(page.url().await?.unwrap_or_default())
}

/// Close the tab at `index`. Returns the URL it was showing.
pub async fn close_tab(handle: &BrowserHandle, index: usize) -> Result<String, ToolError> {
    let mut pages = handle.pages().await?;
    pick_tab(&pages, index)?;
    let page = pages.remove(index);
    let url = page.url().await?.unwrap_or_default();
    page.close().await?;
    Ok(url)
}

fn pick_tab(pages: &[Page], index: usize) -> Result<&Page, ToolError> {
    validate_tab_index(pages.len(), index)?;
    Ok(&pages[index])
}

/// Check a 0-based tab index against the number of open tabs.
fn validate_tab_index(len: usize, index: usize) -> Result<(), ToolError> {
    if len == 0 {
        return Err(ToolError::InvalidArgument("No tabs found".to_string()));
    }
    if index >= len {
        return Err(ToolError::InvalidArgument(format!(
            "Invalid tab index: {index}. Valid range: 0-{}",
            len - 1
        )));
    }
    Ok(())
}

/// A page as seen by `debug-pages`, including browser-internal targets.
#[derive(Debug, Clone)]
pub struct DebugPage {
    pub index: usize,
    pub url: String,
    pub title: String,
    pub internal: bool,
}

/// Every attached page, flagged when it is browser UI rather than content.
pub async fn debug_pages(handle: &BrowserHandle) -> Result<Vec<DebugPage>, ToolError> {
    let pages = handle.pages().await?;
    let mut out = Vec::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        let url = page.url().await?.unwrap_or_default();
        out.push(DebugPage {
            index,
            internal: url.starts_with("chrome://"),
            title: page.get_title().await?.unwrap_or_default(),
            url,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = "<html>\n<head>\n<title>T</title>\n</head>\n<body>\n<div id=\"app\">hello</div>\n<p>bye</p>\n</body>\n</html>";

    #[test]
    fn context_search_finds_line_with_surroundings() {
        let matches = find_context(HTML, "id=\"app\"", 1);
        assert_eq!(matches.len(), 1);
        let hit = &matches[0];
        assert_eq!(hit.line_number, 6);
        assert_eq!(hit.start, 5);
        assert_eq!(
            hit.lines,
            vec!["<body>", "<div id=\"app\">hello</div>", "<p>bye</p>"]
        );
    }

    #[test]
    fn context_search_clamps_at_document_edges() {
        let matches = find_context(HTML, "<html>", 3);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, 1);
        assert_eq!(matches[0].lines.len(), 4);
    }

    #[test]
    fn context_search_reports_every_match() {
        let html = "a\nneedle\nb\nneedle\nc";
        let matches = find_context(html, "needle", 0);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line_number, 2);
        assert_eq!(matches[1].line_number, 4);
    }

    #[test]
    fn match_formatting_marks_the_hit_line() {
        let matches = find_context("one\ntwo\nthree", "two", 1);
        let rendered = matches[0].format();
        assert!(rendered.contains("--- Match at line 2 ---"));
        assert!(rendered.contains(">>> 2: two"));
        assert!(rendered.contains("    1: one"));
        assert!(rendered.contains("    3: three"));
    }

    #[test]
    fn evaluate_source_reads_files_and_passes_inline_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("snippet.js");
        std::fs::write(&script, "1 + 1").expect("write script");

        let from_file = evaluate_source(script.to_str().expect("utf-8 path")).expect("read");
        assert_eq!(from_file, "1 + 1");

        let inline = evaluate_source("document.title").expect("inline");
        assert_eq!(inline, "document.title");
    }

    #[test]
    fn tab_index_out_of_range_reports_valid_range() {
        let err = validate_tab_index(3, 5).expect_err("index past end");
        assert_eq!(err.to_string(), "invalid argument: Invalid tab index: 5. Valid range: 0-2");

        let err = validate_tab_index(1, 1).expect_err("one past end");
        assert!(err.to_string().contains("Valid range: 0-0"));

        assert!(validate_tab_index(3, 0).is_ok());
        assert!(validate_tab_index(3, 2).is_ok());
    }

    #[test]
    fn tab_index_with_no_tabs_is_rejected() {
        let err = validate_tab_index(0, 0).expect_err("no tabs");
        assert!(err.to_string().contains("No tabs found"));
    }

    #[test]
    fn default_screenshot_name_is_timestamped_png() {
        let path = default_screenshot_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("screenshot_"));
        assert!(name.ends_with(".png"));
    }
}
