//! Command-line tools for a Chrome instance running with remote debugging.
//!
//! Every subcommand is an independent connect → act → print → exit sequence;
//! nothing is shared between invocations beyond the browser itself.
//!
//! Usage examples:
//!   $ browser-tools start
//!   $ browser-tools navigate https://example.com
//!   $ browser-tools click "button#submit"
//!   $ browser-tools network --type xhr --show-body

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use browser_tools::actions::{self, MouseAction, SelectBy};
use browser_tools::capture::{self, NetworkOptions, ResourceFilter};
use browser_tools::config::ToolsConfig;
use browser_tools::connection::BrowserHandle;
use browser_tools::inspect;
use browser_tools::launch::{self, ChromeVariant};
use browser_tools::picker::{self, PickOutcome};
use browser_tools::state;
use clap::{Parser, Subcommand};
use log::info;
use regex::Regex;

#[derive(Parser)]
#[command(
    name = "browser-tools",
    author,
    version,
    about = "Drive an already-running Chrome over the DevTools protocol"
)]
struct Cli {
    /// Remote debugging port (default: 9222).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch Chrome with remote debugging and verify the connection.
    Start {
        /// Chrome browser variant to launch.
        #[arg(long, value_enum, default_value = "chrome-stable")]
        browser: ChromeVariant,
        /// Path to a custom Chrome/Chromium executable.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Navigate to a URL in the existing Chrome instance.
    Navigate {
        url: String,
        /// Open the URL in a new tab.
        #[arg(long)]
        new: bool,
    },
    /// Click on an element using a CSS selector.
    Click {
        selector: String,
        /// Timeout in milliseconds.
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
        /// Force click even if the element is not visible or enabled.
        #[arg(long)]
        force: bool,
    },
    /// Check/uncheck a checkbox or select a radio button.
    Check {
        selector: String,
        /// Uncheck instead of check.
        #[arg(long)]
        uncheck: bool,
        /// Force even if the element is not visible or enabled.
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
    },
    /// Fill a text field using a CSS selector.
    Fill {
        selector: String,
        text: String,
        /// Clear the field before filling.
        #[arg(long)]
        clear: bool,
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
    },
    /// Press a keyboard key.
    PressKey {
        key: String,
        /// CSS selector to focus before pressing the key.
        #[arg(long)]
        selector: Option<String>,
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
    },
    /// Perform mouse actions on elements.
    Mouse {
        #[arg(value_enum)]
        action: MouseAction,
        selector: String,
        /// Target selector for the drag action.
        #[arg(long)]
        to: Option<String>,
        /// Delay between mousedown and mouseup in milliseconds.
        #[arg(long)]
        delay: Option<u64>,
        /// Force the action even if the element is not visible or enabled.
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
    },
    /// Select an option from a dropdown.
    SelectDropdown {
        selector: String,
        value: String,
        /// Select by visible label instead of value.
        #[arg(long, conflicts_with = "by_index")]
        by_label: bool,
        /// Select by 0-based index.
        #[arg(long)]
        by_index: bool,
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
    },
    /// Upload files to a file input.
    Upload {
        selector: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = 30_000)]
        timeout: u64,
    },
    /// Click a download trigger and save the resulting file.
    Download {
        selector: String,
        /// Output path (default: downloads directory, suggested name).
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 30_000)]
        timeout: u64,
    },
    /// Execute JavaScript (inline code or a path to a .js file).
    Evaluate { javascript: String },
    /// Print the HTML of the current page.
    GetHtml {
        /// Search string; shows matching lines with context instead.
        #[arg(long)]
        context: Option<String>,
        /// Context lines before and after each match.
        #[arg(long, default_value_t = 5)]
        lines: usize,
    },
    /// Take a PNG screenshot of the current page.
    Screenshot {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Capture console messages from the current page.
    Console {
        /// Only show errors and warnings.
        #[arg(long)]
        errors_only: bool,
        /// Seconds to collect messages for.
        #[arg(long, default_value_t = 3)]
        duration: u64,
    },
    /// Capture network requests from the current page.
    Network {
        /// Filter by resource type.
        #[arg(long = "type", value_enum, default_value = "all")]
        resource_type: ResourceFilter,
        /// Show request and response headers.
        #[arg(long)]
        show_headers: bool,
        /// Show request and response bodies (fetch/xhr only).
        #[arg(long)]
        show_body: bool,
        /// Filter URLs by regex pattern.
        #[arg(long)]
        filter: Option<String>,
        /// Listen instead of reloading the page.
        #[arg(long)]
        no_reload: bool,
        /// Capture duration in seconds when using --no-reload.
        #[arg(long, default_value_t = 10)]
        duration: u64,
    },
    /// List open tabs, or switch to / close one by index.
    Tabs {
        /// Switch to a tab by 0-based index.
        #[arg(long, conflicts_with = "close")]
        switch: Option<usize>,
        /// Close a tab by 0-based index.
        #[arg(long)]
        close: Option<usize>,
    },
    /// List cookies visible to the current page.
    Cookies,
    /// Clear cookies (current page by default).
    ClearCookies {
        /// Clear all cookies from all origins.
        #[arg(long)]
        all: bool,
    },
    /// List localStorage and/or sessionStorage for the current page.
    Storage {
        #[arg(long)]
        local: bool,
        #[arg(long)]
        session: bool,
    },
    /// Clear localStorage and/or sessionStorage for the current page.
    ClearStorage {
        #[arg(long)]
        local: bool,
        #[arg(long)]
        session: bool,
    },
    /// Interactively pick elements on the page.
    Pick {
        /// Instruction shown in the on-page banner.
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Show every attached page, including browser-internal targets.
    DebugPages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_env_logger(cli.verbose);

    let config = ToolsConfig::from_env()
        .context("invalid environment configuration")?
        .with_port(cli.port);

    match cli.command {
        Command::Start { browser, path } => run_start(&config, browser, path).await,
        command => {
            let handle = BrowserHandle::connect(&config).await?;
            let result = dispatch(&handle, command).await;
            handle.shutdown().await;
            result
        }
    }
}

async fn dispatch(handle: &BrowserHandle, command: Command) -> Result<()> {
    match command {
        Command::Start { .. } => unreachable!("start is handled before connecting"),

        Command::Navigate { url, new } => {
            let navigated = actions::navigate(handle, &url, new).await?;
            println!("Navigated to {navigated}");
            Ok(())
        }

        Command::Click {
            selector,
            timeout,
            force,
        } => {
            let page = active_page(handle).await?;
            info!("looking for element: {selector}");
            actions::click(&page, &selector, timeout, force).await?;
            println!("Successfully clicked element: {selector}");
            Ok(())
        }

        Command::Check {
            selector,
            uncheck,
            force,
            timeout,
        } => {
            let page = active_page(handle).await?;
            info!("looking for element: {selector}");
            actions::set_checked(&page, &selector, !uncheck, force, timeout).await?;
            if uncheck {
                println!("Successfully unchecked: {selector}");
            } else {
                println!("Successfully checked: {selector}");
            }
            Ok(())
        }

        Command::Fill {
            selector,
            text,
            clear,
            timeout,
        } => {
            let page = active_page(handle).await?;
            info!("looking for field: {selector}");
            actions::fill(&page, &selector, &text, clear, timeout).await?;
            println!("Successfully filled field: {selector}");
            Ok(())
        }

        Command::PressKey {
            key,
            selector,
            timeout,
        } => {
            let page = active_page(handle).await?;
            actions::press_key(&page, &key, selector.as_deref(), timeout).await?;
            println!("Successfully pressed key: {key}");
            Ok(())
        }

        // Coordinate dispatch performs no visibility checks, so --force is
        // accepted for familiarity but changes nothing.
        Command::Mouse {
            action,
            selector,
            to,
            delay,
            timeout,
            ..
        } => {
            let page = active_page(handle).await?;
            info!("looking for element: {selector}");
            actions::mouse(&page, action, &selector, to.as_deref(), delay, timeout).await?;
            match action {
                MouseAction::Click => println!("Successfully clicked: {selector}"),
                MouseAction::Dblclick => println!("Successfully double-clicked: {selector}"),
                MouseAction::Hover => println!("Successfully hovered over: {selector}"),
                MouseAction::RightClick => println!("Successfully right-clicked: {selector}"),
                MouseAction::Drag => println!(
                    "Successfully dragged {selector} to {}",
                    to.as_deref().unwrap_or_default()
                ),
            }
            Ok(())
        }

        Command::SelectDropdown {
            selector,
            value,
            by_label,
            by_index,
            timeout,
        } => {
            let page = active_page(handle).await?;
            info!("looking for dropdown: {selector}");
            let by = if by_index {
                SelectBy::Index
            } else if by_label {
                SelectBy::Label
            } else {
                SelectBy::Value
            };
            actions::select_option(&page, &selector, &value, by, timeout).await?;
            match by {
                SelectBy::Index => {
                    println!("Successfully selected index {value} in dropdown: {selector}")
                }
                SelectBy::Label => {
                    println!("Successfully selected label '{value}' in dropdown: {selector}")
                }
                SelectBy::Value => {
                    println!("Successfully selected value '{value}' in dropdown: {selector}")
                }
            }
            Ok(())
        }

        Command::Upload {
            selector,
            files,
            timeout,
        } => {
            let page = active_page(handle).await?;
            info!("looking for file input: {selector}");
            let uploaded = actions::upload(&page, &selector, &files, timeout).await?;
            if let [single] = uploaded.as_slice() {
                println!("Successfully uploaded: {}", single.display());
            } else {
                println!("Successfully uploaded {} files", uploaded.len());
                for path in &uploaded {
                    println!("  - {}", path.display());
                }
            }
            Ok(())
        }

        Command::Download {
            selector,
            output,
            timeout,
        } => {
            let page = active_page(handle).await?;
            info!("looking for download element: {selector}");
            let saved = actions::download(handle, &page, &selector, output.as_deref(), timeout)
                .await?;
            println!("Downloaded to: {}", saved.display());
            Ok(())
        }

        Command::Evaluate { javascript } => {
            let page = active_page(handle).await?;
            let source = inspect::evaluate_source(&javascript)?;
            if let Some(value) = inspect::evaluate(&page, &source).await? {
                match value {
                    serde_json::Value::String(text) => println!("{text}"),
                    other => println!("{other}"),
                }
            }
            Ok(())
        }

        Command::GetHtml { context, lines } => {
            let page = active_page(handle).await?;
            let html = inspect::page_html(&page).await?;
            match context {
                Some(needle) => {
                    let matches = inspect::find_context(&html, &needle, lines);
                    if matches.is_empty() {
                        bail!("No matches found for '{needle}'");
                    }
                    for hit in matches {
                        println!("{}", hit.format());
                    }
                }
                None => println!("{html}"),
            }
            Ok(())
        }

        Command::Screenshot { output } => {
            let page = active_page(handle).await?;
            let path = inspect::screenshot(&page, output).await?;
            println!("Screenshot saved to {}", path.display());
            Ok(())
        }

        Command::Console {
            errors_only,
            duration,
        } => {
            let page = active_page(handle).await?;
            let entries =
                capture::console_messages(&page, Duration::from_secs(duration), errors_only)
                    .await?;
            if entries.is_empty() {
                println!("No console messages available.");
            } else {
                for entry in entries {
                    println!("{}", entry.format());
                }
            }
            Ok(())
        }

        Command::Network {
            resource_type,
            show_headers,
            show_body,
            filter,
            no_reload,
            duration,
        } => {
            let page = active_page(handle).await?;
            let url_filter = filter
                .map(|pattern| Regex::new(&pattern))
                .transpose()
                .context("invalid --filter regex")?;
            let options = NetworkOptions {
                resource_type,
                show_headers,
                show_body,
                url_filter,
                reload: !no_reload,
                duration: Duration::from_secs(duration),
            };
            let requests = capture::network_requests(&page, &options).await?;
            print_network(&requests, &options);
            Ok(())
        }

        Command::Tabs { switch, close } => {
            if let Some(index) = switch {
                let url = inspect::switch_tab(handle, index).await?;
                println!("Switched to tab {index}: {url}");
            } else if let Some(index) = close {
                let url = inspect::close_tab(handle, index).await?;
                println!("Closed tab {index}: {url}");
            } else {
                let tabs = inspect::list_tabs(handle).await?;
                if tabs.is_empty() {
                    bail!("No tabs found");
                }
                println!("Found {} tab(s):", tabs.len());
                for tab in tabs {
                    let title = if tab.title.is_empty() {
                        "(no title)".to_string()
                    } else {
                        tab.title
                    };
                    println!("  [{}] {title}", tab.index);
                    println!("      {}", tab.url);
                }
            }
            Ok(())
        }

        Command::Cookies => {
            let page = active_page(handle).await?;
            let cookies = state::list_cookies(&page).await?;
            if cookies.is_empty() {
                println!("No cookies found");
            } else {
                for cookie in cookies {
                    println!("{}\n", cookie.format());
                }
            }
            Ok(())
        }

        Command::ClearCookies { all } => {
            let page = active_page(handle).await?;
            if all {
                state::clear_all_cookies(&page).await?;
                println!("All cookies cleared");
            } else {
                let url = page.url().await?.unwrap_or_default();
                match state::clear_page_cookies(&page).await? {
                    0 => println!("No cookies to clear"),
                    count => println!("Cleared {count} cookie(s) for {url}"),
                }
            }
            Ok(())
        }

        Command::Storage { local, session } => {
            let page = active_page(handle).await?;
            for area in state::selected_areas(local, session) {
                println!("=== {} ===", area.js_name());
                let items = state::storage_items(&page, area).await?;
                if items.is_empty() {
                    println!("(empty)");
                } else {
                    for (key, value) in items {
                        println!("{key}: {value}");
                    }
                }
                println!();
            }
            Ok(())
        }

        Command::ClearStorage { local, session } => {
            let page = active_page(handle).await?;
            let areas = state::selected_areas(local, session);
            for area in &areas {
                state::clear_storage(&page, *area).await?;
            }
            let cleared = areas
                .iter()
                .map(|area| area.js_name())
                .collect::<Vec<_>>()
                .join(" and ");
            let url = page.url().await?.unwrap_or_default();
            println!("Cleared {cleared} for {url}");
            Ok(())
        }

        Command::Pick { message } => {
            let page = active_page(handle).await?;
            let message = message.join(" ");
            info!("starting picker with message: '{message}'");
            match picker::pick(&page, &message).await? {
                PickOutcome::Cancelled => {}
                PickOutcome::One(info) => println!("{}", info.format()),
                PickOutcome::Many(infos) => {
                    for (index, info) in infos.iter().enumerate() {
                        if index > 0 {
                            println!();
                        }
                        println!("{}", info.format());
                    }
                }
            }
            Ok(())
        }

        Command::DebugPages => {
            let pages = inspect::debug_pages(handle).await?;
            println!("Total pages: {}\n", pages.len());
            for page in pages {
                println!("  [{}] {}", page.index, page.url);
                println!("      Title: {}", page.title);
                println!("      Is chrome://: {}", page.internal);
                println!();
            }
            Ok(())
        }
    }
}

async fn run_start(
    config: &ToolsConfig,
    browser: ChromeVariant,
    path: Option<PathBuf>,
) -> Result<()> {
    if path.is_some() && browser != ChromeVariant::Stable {
        bail!("Cannot specify both --browser and --path");
    }
    let launched = launch::start(config, browser, path.as_deref()).await?;
    println!(
        "{} successfully started with remote debugging on port {}",
        launched.app_name, launched.port
    );
    Ok(())
}

async fn active_page(handle: &BrowserHandle) -> Result<chromiumoxide::page::Page> {
    let page = handle.active_page().await?;
    if let Some(url) = page.url().await? {
        info!("connected to page: {url}");
    }
    let _ = page.bring_to_front().await;
    Ok(page)
}

fn print_network(requests: &[capture::CapturedRequest], options: &NetworkOptions) {
    if requests.is_empty() {
        println!("No network requests captured.");
        return;
    }

    println!("{:<8} {:<7} {:<12} URL", "Method", "Status", "Type");
    for request in requests {
        let status = request
            .status
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:<7} {:<12} {}",
            request.method,
            status,
            request.resource_type,
            truncate(&request.url, 100)
        );
    }
    println!("\nTotal requests: {}", requests.len());

    if !(options.show_headers || options.show_body) {
        return;
    }

    println!("\nRequest/Response Details:");
    for (index, request) in requests.iter().enumerate() {
        if options.show_body && !request.is_xhr_like() {
            continue;
        }
        println!(
            "\n{}. {} {}",
            index + 1,
            request.method,
            truncate(&request.url, 80)
        );

        if let Some(headers) = &request.request_headers {
            println!("  Request Headers:");
            for (key, value) in headers {
                println!("    {key}: {}", truncate(value, 100));
            }
        }
        if let Some(body) = &request.post_data {
            println!("  Request Body:");
            println!("    {}", truncate(body, 500));
        }
        if let Some(headers) = &request.response_headers {
            println!("  Response Headers:");
            for (key, value) in headers {
                println!("    {key}: {}", truncate(value, 100));
            }
        }
        if let Some(body) = &request.response_body {
            println!("  Response Body:");
            println!("    {}", truncate(body, 500));
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

fn init_env_logger(verbose: u8) {
    let default = match verbose {
        0 => "info",
        _ => "debug",
    };
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", default);
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn click_defaults_to_ten_seconds() {
        let cli = Cli::try_parse_from(["browser-tools", "click", "#submit"]).expect("parse");
        match cli.command {
            Command::Click {
                selector,
                timeout,
                force,
            } => {
                assert_eq!(selector, "#submit");
                assert_eq!(timeout, 10_000);
                assert!(!force);
            }
            _ => panic!("expected click"),
        }
    }

    #[test]
    fn upload_and_download_default_to_thirty_seconds() {
        let cli = Cli::try_parse_from(["browser-tools", "upload", "input[type=file]", "a.txt"])
            .expect("parse");
        match cli.command {
            Command::Upload { timeout, files, .. } => {
                assert_eq!(timeout, 30_000);
                assert_eq!(files, vec![PathBuf::from("a.txt")]);
            }
            _ => panic!("expected upload"),
        }

        let cli = Cli::try_parse_from(["browser-tools", "download", "a.zip-link"]).expect("parse");
        match cli.command {
            Command::Download { timeout, .. } => assert_eq!(timeout, 30_000),
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn upload_requires_at_least_one_file() {
        assert!(Cli::try_parse_from(["browser-tools", "upload", "input"]).is_err());
    }

    #[test]
    fn mouse_actions_parse_by_name() {
        let cli = Cli::try_parse_from(["browser-tools", "mouse", "right-click", "#menu"])
            .expect("parse");
        match cli.command {
            Command::Mouse { action, .. } => assert_eq!(action, MouseAction::RightClick),
            _ => panic!("expected mouse"),
        }
    }

    #[test]
    fn select_dropdown_rejects_label_with_index() {
        assert!(Cli::try_parse_from([
            "browser-tools",
            "select-dropdown",
            "#country",
            "2",
            "--by-label",
            "--by-index",
        ])
        .is_err());
    }

    #[test]
    fn tabs_switch_conflicts_with_close() {
        assert!(
            Cli::try_parse_from(["browser-tools", "tabs", "--switch", "1", "--close", "2"])
                .is_err()
        );
    }

    #[test]
    fn network_flags_parse() {
        let cli = Cli::try_parse_from([
            "browser-tools",
            "network",
            "--type",
            "xhr",
            "--show-body",
            "--no-reload",
            "--duration",
            "5",
        ])
        .expect("parse");
        match cli.command {
            Command::Network {
                resource_type,
                show_body,
                no_reload,
                duration,
                ..
            } => {
                assert_eq!(resource_type, ResourceFilter::Xhr);
                assert!(show_body);
                assert!(no_reload);
                assert_eq!(duration, 5);
            }
            _ => panic!("expected network"),
        }
    }

    #[test]
    fn pick_requires_a_message() {
        assert!(Cli::try_parse_from(["browser-tools", "pick"]).is_err());
        let cli =
            Cli::try_parse_from(["browser-tools", "pick", "choose", "the", "button"])
                .expect("parse");
        match cli.command {
            Command::Pick { message } => assert_eq!(message.join(" "), "choose the button"),
            _ => panic!("expected pick"),
        }
    }

    #[test]
    fn global_port_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["browser-tools", "tabs", "--port", "9223"]).expect("parse");
        assert_eq!(cli.port, Some(9223));
    }

    #[test]
    fn truncation_is_character_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefgh", 4), "abcd");
        assert_eq!(truncate("héllo wörld", 5), "héllo");
    }
}
