//! Selector-driven page actions: navigation, clicking, form input, mouse
//! gestures, uploads and downloads.
//!
//! Elements are located with plain CSS selectors through `chromiumoxide`'s
//! DOM queries. Commands that need an element poll for it until the caller's
//! timeout elapses, mirroring how interactive pages attach content late.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::js_protocol::runtime::CallFunctionOnReturns;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;
use clap::ValueEnum;
use futures::StreamExt;
use log::{debug, info};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};

use crate::connection::{BrowserHandle, ConnectionError};

/// How often element lookups are retried while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors raised by page actions.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("element not found: {selector} (waited {timeout_ms}ms)")]
    ElementNotFound { selector: String, timeout_ms: u64 },
    #[error("no option matching '{value}' in dropdown: {selector}")]
    OptionNotFound { selector: String, value: String },
    #[error("checkbox {selector} did not become {expected}")]
    CheckboxUnchanged {
        selector: String,
        expected: &'static str,
    },
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },
    #[error("CDP request failed: {0}")]
    Cdp(#[from] CdpError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Poll for an element matching `selector` until `timeout_ms` elapses.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout_ms: u64,
) -> Result<Element, ToolError> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if Instant::now() >= deadline {
            return Err(ToolError::ElementNotFound {
                selector: selector.to_string(),
                timeout_ms,
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Normalise and validate a navigation target. Bare hostnames get an
/// `https://` scheme so `navigate example.com` does what the user meant.
pub fn normalize_url(raw: &str) -> Result<String, ToolError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") || trimmed.starts_with("about:") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    url::Url::parse(&candidate)
        .map(|parsed| parsed.to_string())
        .map_err(|err| ToolError::InvalidUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        })
}

/// Navigate the page (or a fresh tab) to `url`, waiting for the load to
/// commit.
pub async fn navigate(handle: &BrowserHandle, url: &str, new_tab: bool) -> Result<String, ToolError> {
    let url = normalize_url(url)?;
    let page = if new_tab {
        handle.new_page("about:blank").await?
    } else {
        handle.active_page().await?
    };

    page.goto(url.as_str()).await?;
    page.wait_for_navigation().await?;
    Ok(url)
}

/// Click the first element matching `selector`. With `force`, dispatch a DOM
/// `click()` directly so hidden or covered elements still receive it.
pub async fn click(
    page: &Page,
    selector: &str,
    timeout_ms: u64,
    force: bool,
) -> Result<(), ToolError> {
    let element = wait_for_element(page, selector, timeout_ms).await?;
    if force {
        element
            .call_js_fn("function() { this.click(); }", false)
            .await?;
    } else {
        element.scroll_into_view().await?.click().await?;
    }
    debug!("clicked {selector}");
    Ok(())
}

/// Set an input's value the way a framework-aware fill does: through the
/// native value setter, followed by `input` and `change` events.
pub async fn fill(
    page: &Page,
    selector: &str,
    text: &str,
    clear: bool,
    timeout_ms: u64,
) -> Result<(), ToolError> {
    let element = wait_for_element(page, selector, timeout_ms).await?;
    element.focus().await?;
    if clear {
        set_value(&element, "").await?;
    }
    set_value(&element, text).await?;
    debug!("filled {selector}");
    Ok(())
}

async fn set_value(element: &Element, text: &str) -> Result<(), ToolError> {
    let literal = js_string(text);
    let js = format!(
        r#"function() {{
            const value = {literal};
            const proto = Object.getPrototypeOf(this);
            const desc = Object.getOwnPropertyDescriptor(proto, 'value');
            if (desc && desc.set) {{ desc.set.call(this, value); }} else {{ this.value = value; }}
            this.dispatchEvent(new Event('input', {{ bubbles: true }}));
            this.dispatchEvent(new Event('change', {{ bubbles: true }}));
        }}"#
    );
    element.call_js_fn(js, false).await?;
    Ok(())
}

/// Check or uncheck a checkbox (or select a radio button). Returns `false`
/// when the element was already in the requested state.
pub async fn set_checked(
    page: &Page,
    selector: &str,
    checked: bool,
    force: bool,
    timeout_ms: u64,
) -> Result<bool, ToolError> {
    let element = wait_for_element(page, selector, timeout_ms).await?;

    if element_checked(&element).await? == checked {
        return Ok(false);
    }

    if force {
        element
            .call_js_fn("function() { this.click(); }", false)
            .await?;
    } else {
        element.scroll_into_view().await?.click().await?;
    }

    if element_checked(&element).await? != checked {
        return Err(ToolError::CheckboxUnchanged {
            selector: selector.to_string(),
            expected: if checked { "checked" } else { "unchecked" },
        });
    }
    Ok(true)
}

async fn element_checked(element: &Element) -> Result<bool, ToolError> {
    let ret = element
        .call_js_fn("function() { return !!this.checked; }", false)
        .await?;
    Ok(js_value(ret).as_bool().unwrap_or(false))
}

/// How a dropdown option is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectBy {
    Value,
    Label,
    Index,
}

/// Select an option in a `<select>` element, firing `input` and `change`
/// events. Returns the label of the option that was selected.
pub async fn select_option(
    page: &Page,
    selector: &str,
    value: &str,
    by: SelectBy,
    timeout_ms: u64,
) -> Result<String, ToolError> {
    let element = wait_for_element(page, selector, timeout_ms).await?;

    let matcher = match by {
        SelectBy::Value => format!(
            "options.findIndex((o) => o.value === {})",
            js_string(value)
        ),
        SelectBy::Label => format!(
            "options.findIndex((o) => (o.label || o.textContent || '').trim() === {})",
            js_string(value)
        ),
        SelectBy::Index => {
            let index: usize = value.parse().map_err(|_| {
                ToolError::InvalidArgument(format!("'{value}' is not a valid option index"))
            })?;
            index.to_string()
        }
    };

    let js = format!(
        r#"function() {{
            const options = Array.from(this.options);
            const index = {matcher};
            if (index < 0 || index >= options.length) return null;
            this.selectedIndex = index;
            this.dispatchEvent(new Event('input', {{ bubbles: true }}));
            this.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return (options[index].label || options[index].textContent || '').trim();
        }}"#
    );

    let ret = element.call_js_fn(js, false).await?;
    match js_value(ret) {
        JsonValue::String(label) => Ok(label),
        _ => Err(ToolError::OptionNotFound {
            selector: selector.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Press a keyboard key, optionally focusing `selector` first. Without a
/// selector the key goes to the focused element, falling back to `body`.
pub async fn press_key(
    page: &Page,
    key: &str,
    selector: Option<&str>,
    timeout_ms: u64,
) -> Result<(), ToolError> {
    let element = match selector {
        Some(selector) => {
            let element = wait_for_element(page, selector, timeout_ms).await?;
            element.focus().await?;
            element
        }
        None => match page.find_element(":focus").await {
            Ok(element) => element,
            Err(_) => page.find_element("body").await?,
        },
    };
    element.press_key(key).await?;
    debug!("pressed key {key}");
    Ok(())
}

/// Mouse gestures available to the `mouse` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MouseAction {
    Click,
    Dblclick,
    Hover,
    #[value(name = "right-click")]
    RightClick,
    Drag,
}

/// Perform a mouse gesture on the element matching `selector`. `to` names
/// the drop target for `drag`; `delay_ms` holds the button between press and
/// release.
pub async fn mouse(
    page: &Page,
    action: MouseAction,
    selector: &str,
    to: Option<&str>,
    delay_ms: Option<u64>,
    timeout_ms: u64,
) -> Result<(), ToolError> {
    let element = wait_for_element(page, selector, timeout_ms).await?;

    match action {
        MouseAction::Hover => {
            element.hover().await?;
        }
        MouseAction::Click => {
            let point = element.scroll_into_view().await?.clickable_point().await?;
            dispatch_clicks(page, point, MouseButton::Left, 1, delay_ms).await?;
        }
        MouseAction::Dblclick => {
            let point = element.scroll_into_view().await?.clickable_point().await?;
            dispatch_clicks(page, point, MouseButton::Left, 2, delay_ms).await?;
        }
        MouseAction::RightClick => {
            let point = element.scroll_into_view().await?.clickable_point().await?;
            dispatch_clicks(page, point, MouseButton::Right, 1, delay_ms).await?;
        }
        MouseAction::Drag => {
            let to = to.ok_or_else(|| {
                ToolError::InvalidArgument("--to selector is required for drag action".to_string())
            })?;
            let target = wait_for_element(page, to, timeout_ms).await?;
            let from = element.scroll_into_view().await?.clickable_point().await?;
            let dest = target.scroll_into_view().await?.clickable_point().await?;
            drag(page, from, dest).await?;
        }
    }
    Ok(())
}

async fn dispatch_clicks(
    page: &Page,
    point: Point,
    button: MouseButton,
    clicks: i64,
    delay_ms: Option<u64>,
) -> Result<(), ToolError> {
    mouse_event(page, DispatchMouseEventType::MouseMoved, point, None, 0).await?;
    for count in 1..=clicks {
        mouse_event(
            page,
            DispatchMouseEventType::MousePressed,
            point,
            Some(button.clone()),
            count,
        )
        .await?;
        if let Some(delay) = delay_ms {
            sleep(Duration::from_millis(delay)).await;
        }
        mouse_event(
            page,
            DispatchMouseEventType::MouseReleased,
            point,
            Some(button.clone()),
            count,
        )
        .await?;
    }
    Ok(())
}

async fn drag(page: &Page, from: Point, to: Point) -> Result<(), ToolError> {
    mouse_event(page, DispatchMouseEventType::MouseMoved, from, None, 0).await?;
    mouse_event(
        page,
        DispatchMouseEventType::MousePressed,
        from,
        Some(MouseButton::Left),
        1,
    )
    .await?;
    // A midpoint move lets drag handlers see motion before the drop.
    let mid = Point::new((from.x + to.x) / 2.0, (from.y + to.y) / 2.0);
    for point in [mid, to] {
        mouse_event(page, DispatchMouseEventType::MouseMoved, point, None, 0).await?;
        sleep(Duration::from_millis(50)).await;
    }
    mouse_event(
        page,
        DispatchMouseEventType::MouseReleased,
        to,
        Some(MouseButton::Left),
        1,
    )
    .await?;
    Ok(())
}

async fn mouse_event(
    page: &Page,
    kind: DispatchMouseEventType,
    point: Point,
    button: Option<MouseButton>,
    click_count: i64,
) -> Result<(), ToolError> {
    let mut builder = DispatchMouseEventParams::builder()
        .r#type(kind)
        .x(point.x)
        .y(point.y);
    if let Some(button) = button {
        builder = builder.button(button).click_count(click_count);
    }
    let params = builder.build().map_err(ToolError::Protocol)?;
    page.execute(params).await?;
    Ok(())
}

/// Attach local files to a file input. All paths must exist; they are
/// resolved to absolute paths before being handed to the browser.
pub async fn upload(
    page: &Page,
    selector: &str,
    files: &[PathBuf],
    timeout_ms: u64,
) -> Result<Vec<PathBuf>, ToolError> {
    let mut resolved = Vec::with_capacity(files.len());
    for file in files {
        let absolute = std::fs::canonicalize(file)
            .map_err(|_| ToolError::FileNotFound { path: file.clone() })?;
        resolved.push(absolute);
    }

    let element = wait_for_element(page, selector, timeout_ms).await?;
    let params = SetFileInputFilesParams::builder()
        .files(
            resolved
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>(),
        )
        .backend_node_id(element.backend_node_id)
        .build()
        .map_err(ToolError::Protocol)?;
    page.execute(params).await?;

    Ok(resolved)
}

/// Click a download trigger and wait for the resulting file, saving it to
/// `output` or the user's download directory under its suggested name.
pub async fn download(
    handle: &BrowserHandle,
    page: &Page,
    selector: &str,
    output: Option<&Path>,
    timeout_ms: u64,
) -> Result<PathBuf, ToolError> {
    let staging = std::env::temp_dir().join(format!("browser-tools-dl-{}", std::process::id()));
    std::fs::create_dir_all(&staging)?;

    let browser = handle.browser();
    let behavior = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::AllowAndName)
        .download_path(staging.display().to_string())
        .events_enabled(true)
        .build()
        .map_err(ToolError::Protocol)?;
    browser.execute(behavior).await?;

    let mut begins = browser.event_listener::<EventDownloadWillBegin>().await?;
    let mut progress = browser.event_listener::<EventDownloadProgress>().await?;

    let element = wait_for_element(page, selector, timeout_ms).await?;
    element.scroll_into_view().await?.click().await?;

    let deadline = Duration::from_millis(timeout_ms);
    let begin = timeout(deadline, begins.next())
        .await
        .map_err(|_| ToolError::Timeout {
            what: "download to start".to_string(),
            timeout_ms,
        })?
        .ok_or_else(|| ToolError::Protocol("download event stream closed".to_string()))?;
    let guid = begin.guid.clone();
    let suggested = begin.suggested_filename.clone();
    info!("download started: {suggested}");

    let wait_done = async {
        while let Some(event) = progress.next().await {
            if event.guid != guid {
                continue;
            }
            match event.state {
                DownloadProgressState::Completed => return Ok(()),
                DownloadProgressState::Canceled => {
                    return Err(ToolError::Protocol("download was canceled".to_string()))
                }
                DownloadProgressState::InProgress => {
                    debug!(
                        "download progress: {}/{} bytes",
                        event.received_bytes, event.total_bytes
                    );
                }
            }
        }
        Err(ToolError::Protocol(
            "download event stream closed".to_string(),
        ))
    };
    timeout(deadline, wait_done)
        .await
        .map_err(|_| ToolError::Timeout {
            what: "download to finish".to_string(),
            timeout_ms,
        })??;

    let destination = match output {
        Some(path) => path.to_path_buf(),
        None => default_download_dir().join(&suggested),
    };
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    collect_staged_download(&staging, &guid, &destination)?;

    Ok(destination)
}

/// Move a finished download out of the staging directory, then drop the
/// directory itself.
fn collect_staged_download(
    staging: &Path,
    guid: &str,
    destination: &Path,
) -> Result<(), ToolError> {
    let staged = staging.join(guid);
    // rename fails across filesystems; fall back to copy + remove
    if std::fs::rename(&staged, destination).is_err() {
        std::fs::copy(&staged, destination)?;
        let _ = std::fs::remove_file(&staged);
    }
    let _ = std::fs::remove_dir(staging);
    Ok(())
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("Downloads")
    })
}

/// Result value of a completed JS call, or `Null` when none was returned.
fn js_value(ret: CallFunctionOnReturns) -> JsonValue {
    ret.result.value.unwrap_or(JsonValue::Null)
}

/// A JS string literal for `text`, safely escaped.
fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_accepts_full_urls() {
        assert_eq!(
            normalize_url("https://example.com/a?b=c").unwrap(),
            "https://example.com/a?b=c"
        );
        assert_eq!(normalize_url("about:blank").unwrap(), "about:blank");
    }

    #[test]
    fn normalize_url_defaults_to_https() {
        assert_eq!(
            normalize_url("example.com").unwrap(),
            "https://example.com/"
        );
        assert_eq!(
            normalize_url("localhost:3000/app").unwrap(),
            "https://localhost:3000/app"
        );
    }

    #[test]
    fn normalize_url_rejects_garbage() {
        let err = normalize_url("http://[invalid").expect_err("should fail");
        assert!(matches!(err, ToolError::InvalidUrl { .. }));
    }

    #[test]
    fn js_string_escapes_quotes_and_newlines() {
        assert_eq!(js_string("plain"), "\"plain\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(js_string("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn staged_download_moves_file_and_removes_staging_dir() {
        let root = tempfile::tempdir().expect("tempdir");
        let staging = root.path().join("staging");
        std::fs::create_dir_all(&staging).expect("staging dir");
        std::fs::write(staging.join("guid-123"), b"payload").expect("staged file");

        let destination = root.path().join("out").join("report.pdf");
        std::fs::create_dir_all(destination.parent().unwrap()).expect("dest dir");
        collect_staged_download(&staging, "guid-123", &destination).expect("collect");

        assert_eq!(std::fs::read(&destination).expect("read dest"), b"payload");
        assert!(!staging.exists(), "staging dir should be removed");
    }

    #[test]
    fn missing_element_error_names_the_selector() {
        let err = ToolError::ElementNotFound {
            selector: "#submit".into(),
            timeout_ms: 10_000,
        };
        let message = err.to_string();
        assert!(message.contains("#submit"));
        assert!(message.contains("10000ms"));
    }
}
