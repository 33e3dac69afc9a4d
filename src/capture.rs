//! Console and network capture.
//!
//! Both captures share the same shape: subscribe to the relevant CDP event
//! streams, enable the domain (Chrome replays buffered events on enable),
//! collect into plain structs for a bounded window, and hand the result back
//! for printing. Network capture in reload mode ends early once the request
//! stream has been quiet for half a second.

use std::time::Duration;

use base64::Engine;
use chromiumoxide::cdp::browser_protocol::log::{
    EnableParams as LogEnableParams, EventEntryAdded, LogEntryLevel,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, Headers, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::ReloadParams;
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EnableParams as RuntimeEnableParams, EventConsoleApiCalled,
    EventExceptionThrown, RemoteObject, StackTrace,
};
use chromiumoxide::cdp::IntoEventKind;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use clap::ValueEnum;
use futures::StreamExt;
use log::{debug, info};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::actions::ToolError;

/// How long the request stream must stay quiet before a reload capture ends.
const QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Upper bound on a reload capture, matching a slow page load.
const RELOAD_DEADLINE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Console

/// Severity of a console entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

impl ConsoleLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warning => "warning",
            ConsoleLevel::Error => "error",
        }
    }

    /// Whether the entry survives `--errors-only`.
    pub fn is_severe(self) -> bool {
        matches!(self, ConsoleLevel::Warning | ConsoleLevel::Error)
    }
}

/// One captured console message, exception, or browser log entry.
#[derive(Debug, Clone)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub text: String,
    pub location: Option<String>,
}

impl ConsoleEntry {
    /// Filter and render entries the way the console command prints them.
    pub fn format(&self) -> String {
        let mut line = format!("[{}] {}", self.level.as_str().to_uppercase(), self.text);
        if let Some(location) = &self.location {
            line.push_str(&format!("\n  at {location}"));
        }
        line
    }
}

/// Collect console output for `duration`. Enabling the Runtime domain makes
/// Chrome replay its buffered console calls, so the backlog is included even
/// though this attaches after the fact.
pub async fn console_messages(
    page: &Page,
    duration: Duration,
    errors_only: bool,
) -> Result<Vec<ConsoleEntry>, ToolError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut listeners = Vec::new();

    listeners.push(forward_events(
        page.event_listener::<EventConsoleApiCalled>().await?,
        tx.clone(),
        console_api_entry,
    ));
    listeners.push(forward_events(
        page.event_listener::<EventExceptionThrown>().await?,
        tx.clone(),
        exception_entry,
    ));
    listeners.push(forward_events(
        page.event_listener::<EventEntryAdded>().await?,
        tx.clone(),
        log_entry,
    ));
    drop(tx);

    // Subscribe first, then enable: the replay happens at enable time.
    page.execute(RuntimeEnableParams::default()).await?;
    page.execute(LogEnableParams::default()).await?;

    let mut entries = Vec::new();
    let deadline = time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            maybe_entry = rx.recv() => {
                match maybe_entry {
                    Some(Some(entry)) => entries.push(entry),
                    Some(None) => {}
                    None => break,
                }
            }
            _ = &mut deadline => break,
        }
    }

    for handle in listeners {
        handle.abort();
    }

    if errors_only {
        entries.retain(|entry| entry.level.is_severe());
    }
    Ok(entries)
}

fn console_api_entry(event: EventConsoleApiCalled) -> Option<ConsoleEntry> {
    let level = match event.r#type {
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => ConsoleLevel::Error,
        ConsoleApiCalledType::Warning => ConsoleLevel::Warning,
        ConsoleApiCalledType::Info => ConsoleLevel::Info,
        ConsoleApiCalledType::Debug => ConsoleLevel::Debug,
        ConsoleApiCalledType::Log | ConsoleApiCalledType::Trace => ConsoleLevel::Log,
        // Grouping and profiling calls carry no message worth showing.
        _ => return None,
    };

    let text = event
        .args
        .iter()
        .map(remote_object_text)
        .collect::<Vec<_>>()
        .join(" ");

    Some(ConsoleEntry {
        level,
        text,
        location: event.stack_trace.as_ref().and_then(top_frame),
    })
}

fn exception_entry(event: EventExceptionThrown) -> Option<ConsoleEntry> {
    let details = event.exception_details;
    let text = details
        .exception
        .as_ref()
        .map(remote_object_text)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| details.text.clone());

    let location = details
        .url
        .as_ref()
        .map(|url| format!("{url}:{}:{}", details.line_number, details.column_number));

    Some(ConsoleEntry {
        level: ConsoleLevel::Error,
        text,
        location,
    })
}

fn log_entry(event: EventEntryAdded) -> Option<ConsoleEntry> {
    let entry = event.entry;
    let level = match entry.level {
        LogEntryLevel::Error => ConsoleLevel::Error,
        LogEntryLevel::Warning => ConsoleLevel::Warning,
        LogEntryLevel::Info => ConsoleLevel::Info,
        LogEntryLevel::Verbose => ConsoleLevel::Debug,
    };
    let location = entry.url.as_ref().map(|url| match entry.line_number {
        Some(line) => format!("{url}:{line}"),
        None => url.clone(),
    });
    Some(ConsoleEntry {
        level,
        text: entry.text,
        location,
    })
}

fn top_frame(stack: &StackTrace) -> Option<String> {
    stack.call_frames.first().map(|frame| {
        format!(
            "{}:{}:{}",
            frame.url, frame.line_number, frame.column_number
        )
    })
}

/// Human-readable rendering of a console argument.
fn remote_object_text(obj: &RemoteObject) -> String {
    if let Some(value) = &obj.value {
        match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    } else if let Some(description) = &obj.description {
        description.clone()
    } else {
        format!("[{:?}]", obj.r#type)
    }
}

// ---------------------------------------------------------------------------
// Network

/// Resource-type filter accepted by the network command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceFilter {
    All,
    Xhr,
    Fetch,
    Document,
    Script,
    Stylesheet,
    Image,
    Font,
    Media,
}

impl ResourceFilter {
    fn matches(self, resource_type: Option<&ResourceType>) -> bool {
        let wanted = match self {
            ResourceFilter::All => return true,
            ResourceFilter::Xhr => ResourceType::Xhr,
            ResourceFilter::Fetch => ResourceType::Fetch,
            ResourceFilter::Document => ResourceType::Document,
            ResourceFilter::Script => ResourceType::Script,
            ResourceFilter::Stylesheet => ResourceType::Stylesheet,
            ResourceFilter::Image => ResourceType::Image,
            ResourceFilter::Font => ResourceType::Font,
            ResourceFilter::Media => ResourceType::Media,
        };
        resource_type == Some(&wanted)
    }
}

/// Options for a network capture run.
#[derive(Debug)]
pub struct NetworkOptions {
    pub resource_type: ResourceFilter,
    pub show_headers: bool,
    pub show_body: bool,
    pub url_filter: Option<Regex>,
    /// Reload the page and capture until the stream settles; otherwise just
    /// listen for `duration`.
    pub reload: bool,
    pub duration: Duration,
}

/// One captured request/response pair.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub resource_type: String,
    pub status: Option<i64>,
    pub request_headers: Option<Vec<(String, String)>>,
    pub post_data: Option<String>,
    pub response_headers: Option<Vec<(String, String)>>,
    pub response_body: Option<String>,
    is_xhr_like: bool,
}

impl CapturedRequest {
    /// Whether body details apply (fetch/xhr only, matching browser devtools
    /// conventions for readable bodies).
    pub fn is_xhr_like(&self) -> bool {
        self.is_xhr_like
    }
}

enum NetworkEvent {
    Request(EventRequestWillBeSent),
    Response(EventResponseReceived),
}

/// Capture network traffic on `page` according to `options`.
pub async fn network_requests(
    page: &Page,
    options: &NetworkOptions,
) -> Result<Vec<CapturedRequest>, ToolError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut listeners = Vec::new();

    listeners.push(forward_events(
        page.event_listener::<EventRequestWillBeSent>().await?,
        tx.clone(),
        |event| Some(NetworkEvent::Request(event)),
    ));
    listeners.push(forward_events(
        page.event_listener::<EventResponseReceived>().await?,
        tx.clone(),
        |event| Some(NetworkEvent::Response(event)),
    ));
    drop(tx);

    page.execute(NetworkEnableParams::default()).await?;

    if options.reload {
        info!("reloading page to capture network requests...");
        page.execute(ReloadParams::default()).await?;
    } else {
        info!(
            "listening for network requests for {} seconds...",
            options.duration.as_secs()
        );
    }

    let deadline = if options.reload {
        RELOAD_DEADLINE
    } else {
        options.duration
    };

    let mut captured: Vec<CapturedRequest> = Vec::new();
    let hard_stop = time::sleep(deadline);
    tokio::pin!(hard_stop);
    let mut quiet = Box::pin(time::sleep(QUIET_WINDOW));

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let Some(Some(event)) = maybe_event else { break };
                quiet.as_mut().reset(Instant::now() + QUIET_WINDOW);
                handle_network_event(event, options, &mut captured);
            }
            _ = quiet.as_mut(), if options.reload => break,
            _ = &mut hard_stop => break,
        }
    }

    for handle in listeners {
        handle.abort();
    }

    if options.show_body {
        fetch_bodies(page, &mut captured).await;
    }

    Ok(captured)
}

fn handle_network_event(
    event: NetworkEvent,
    options: &NetworkOptions,
    captured: &mut Vec<CapturedRequest>,
) {
    match event {
        NetworkEvent::Request(event) => {
            if !options.resource_type.matches(event.r#type.as_ref()) {
                return;
            }
            if let Some(pattern) = &options.url_filter {
                if !pattern.is_match(&event.request.url) {
                    return;
                }
            }

            let is_xhr_like = matches!(
                event.r#type.as_ref(),
                Some(ResourceType::Xhr | ResourceType::Fetch)
            );
            captured.push(CapturedRequest {
                request_id: event.request_id.as_ref().to_string(),
                method: event.request.method.clone(),
                url: event.request.url.clone(),
                resource_type: event
                    .r#type
                    .as_ref()
                    .map(resource_type_name)
                    .unwrap_or("other")
                    .to_string(),
                status: None,
                request_headers: options
                    .show_headers
                    .then(|| header_pairs(&event.request.headers)),
                post_data: if options.show_body && is_xhr_like {
                    event.request.post_data_entries.as_ref().map(|entries| {
                        let bytes: Vec<u8> = entries
                            .iter()
                            .filter_map(|entry| entry.bytes.as_ref())
                            .filter_map(|data| {
                                base64::engine::general_purpose::STANDARD
                                    .decode(AsRef::<str>::as_ref(data))
                                    .ok()
                            })
                            .flatten()
                            .collect();
                        String::from_utf8_lossy(&bytes).into_owned()
                    })
                } else {
                    None
                },
                response_headers: None,
                response_body: None,
                is_xhr_like,
            });
        }
        NetworkEvent::Response(event) => {
            let id = event.request_id.as_ref();
            if let Some(entry) = captured
                .iter_mut()
                .find(|req| req.request_id == id && req.status.is_none())
            {
                entry.status = Some(event.response.status);
                if options.show_headers {
                    entry.response_headers = Some(header_pairs(&event.response.headers));
                }
            }
        }
    }
}

/// Fetch readable bodies for the xhr/fetch requests after capture ends.
async fn fetch_bodies(page: &Page, captured: &mut [CapturedRequest]) {
    for entry in captured.iter_mut() {
        if !entry.is_xhr_like || entry.status.is_none() {
            continue;
        }
        let params = GetResponseBodyParams::new(entry.request_id.clone());
        match page.execute(params).await {
            Ok(response) => {
                let body = &response.result;
                entry.response_body = Some(if body.base64_encoded {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(&body.body)
                        .map(|decoded| decoded.len())
                        .unwrap_or(0);
                    format!("<binary data, {bytes} bytes>")
                } else {
                    body.body.clone()
                });
            }
            Err(err) => {
                debug!("could not fetch body for {}: {err}", entry.url);
                entry.response_body = Some("<failed to read>".to_string());
            }
        }
    }
}

fn resource_type_name(resource_type: &ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Xhr => "xhr",
        ResourceType::Fetch => "fetch",
        ResourceType::Document => "document",
        ResourceType::Script => "script",
        ResourceType::Stylesheet => "stylesheet",
        ResourceType::Image => "image",
        ResourceType::Font => "font",
        ResourceType::Media => "media",
        ResourceType::WebSocket => "websocket",
        ResourceType::Manifest => "manifest",
        ResourceType::Ping => "ping",
        _ => "other",
    }
}

/// Flatten the CDP headers object into sorted key/value pairs.
fn header_pairs(headers: &Headers) -> Vec<(String, String)> {
    let value = serde_json::to_value(headers).unwrap_or(serde_json::Value::Null);
    let mut pairs: Vec<(String, String)> = value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, value)| {
                    let rendered = match value {
                        serde_json::Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default();
    pairs.sort();
    pairs
}

// ---------------------------------------------------------------------------

/// Forward mapped events from a CDP stream into an mpsc channel.
fn forward_events<T, U, F>(
    mut stream: EventStream<T>,
    tx: mpsc::UnboundedSender<Option<U>>,
    map: F,
) -> JoinHandle<()>
where
    T: IntoEventKind + Clone + Unpin + Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Option<U> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            let owned = (*event).clone();
            if tx.send(map(owned)).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_filter_keeps_errors_and_warnings() {
        assert!(ConsoleLevel::Error.is_severe());
        assert!(ConsoleLevel::Warning.is_severe());
        assert!(!ConsoleLevel::Log.is_severe());
        assert!(!ConsoleLevel::Info.is_severe());
        assert!(!ConsoleLevel::Debug.is_severe());
    }

    #[test]
    fn entry_format_includes_level_and_location() {
        let entry = ConsoleEntry {
            level: ConsoleLevel::Error,
            text: "boom".into(),
            location: Some("https://example.com/app.js:10:4".into()),
        };
        let rendered = entry.format();
        assert!(rendered.starts_with("[ERROR] boom"));
        assert!(rendered.contains("at https://example.com/app.js:10:4"));

        let bare = ConsoleEntry {
            level: ConsoleLevel::Log,
            text: "hello".into(),
            location: None,
        };
        assert_eq!(bare.format(), "[LOG] hello");
    }

    #[test]
    fn resource_filter_matches_expected_types() {
        assert!(ResourceFilter::All.matches(Some(&ResourceType::Image)));
        assert!(ResourceFilter::All.matches(None));
        assert!(ResourceFilter::Xhr.matches(Some(&ResourceType::Xhr)));
        assert!(!ResourceFilter::Xhr.matches(Some(&ResourceType::Fetch)));
        assert!(!ResourceFilter::Document.matches(None));
    }

    #[test]
    fn remote_object_prefers_value_over_description() {
        let obj: RemoteObject = serde_json::from_value(serde_json::json!({
            "type": "string",
            "value": "hello",
            "description": "ignored",
        }))
        .expect("remote object");
        assert_eq!(remote_object_text(&obj), "hello");

        let described: RemoteObject = serde_json::from_value(serde_json::json!({
            "type": "object",
            "description": "HTMLDivElement",
        }))
        .expect("remote object");
        assert_eq!(remote_object_text(&described), "HTMLDivElement");
    }

    #[test]
    fn header_pairs_flattens_and_sorts() {
        let headers: Headers = serde_json::from_value(serde_json::json!({
            "content-type": "application/json",
            "accept": "*/*",
        }))
        .expect("headers");
        let pairs = header_pairs(&headers);
        assert_eq!(
            pairs,
            vec![
                ("accept".to_string(), "*/*".to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ]
        );
    }
}
